use crate::sip::{Host, HostPort, Scheme, Transport, Uri};
use crate::Result;
use std::{fmt, hash::Hash, net::SocketAddr};

/// A SIP network address: host/port plus the transport used to reach it.
///
/// Used as the key for listen bindings and the connection pool, for Via
/// processing and for outbound destinations.
#[derive(Debug, Eq, PartialEq, Clone)]
pub struct SipAddr {
    pub r#type: Option<Transport>,
    pub addr: HostPort,
}

impl fmt::Display for SipAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SipAddr {
                r#type: Some(r#type),
                addr,
            } => write!(f, "{} {}", r#type, addr),
            SipAddr { r#type: None, addr } => write!(f, "{}", addr),
        }
    }
}

impl Hash for SipAddr {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.r#type.hash(state);
        match &self.addr.host {
            Host::Domain(domain) => domain.hash(state),
            Host::Ip(ip) => ip.hash(state),
        }
        self.addr.port.hash(state);
    }
}

impl SipAddr {
    pub fn new(transport: Transport, addr: HostPort) -> Self {
        SipAddr {
            r#type: Some(transport),
            addr,
        }
    }

    pub fn get_socketaddr(&self) -> Result<SocketAddr> {
        match &self.addr.host {
            Host::Domain(domain) => Err(crate::Error::Error(format!(
                "Cannot convert domain {} to SocketAddr",
                domain
            ))),
            Host::Ip(ip) => {
                let default = self
                    .r#type
                    .map(|t| t.default_port())
                    .unwrap_or(5060);
                Ok(SocketAddr::new(*ip, self.addr.port.unwrap_or(default)))
            }
        }
    }

    pub fn is_reliable(&self) -> bool {
        self.r#type.map(|t| t.is_reliable()).unwrap_or(false)
    }
}

impl From<&SipAddr> for Uri {
    fn from(addr: &SipAddr) -> Self {
        let scheme = match addr.r#type {
            Some(Transport::Tls) | Some(Transport::Wss) => Scheme::Sips,
            _ => Scheme::Sip,
        };
        Uri::new(scheme, addr.addr.clone())
    }
}

impl From<SocketAddr> for SipAddr {
    fn from(addr: SocketAddr) -> Self {
        SipAddr {
            r#type: None,
            addr: addr.into(),
        }
    }
}

impl From<HostPort> for SipAddr {
    fn from(addr: HostPort) -> Self {
        SipAddr { r#type: None, addr }
    }
}

impl TryFrom<&Uri> for SipAddr {
    type Error = crate::Error;

    fn try_from(uri: &Uri) -> Result<Self> {
        let transport = uri.transport().or(if uri.is_secure() {
            Some(Transport::Tls)
        } else {
            None
        });
        Ok(SipAddr {
            r#type: transport,
            addr: uri.host_port.clone(),
        })
    }
}
