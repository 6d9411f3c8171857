use super::parse::SipParseError;
use std::net::{IpAddr, SocketAddr};

/// Host part of a URI or Via sent-by: an IP literal or a domain name.
///
/// Domain names are stored lowercased; host comparison in SIP is always
/// case-insensitive (RFC 3261 §19.1.4).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Host {
    Ip(IpAddr),
    Domain(String),
}

impl Host {
    pub fn parse(input: &str) -> Result<Host, SipParseError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(SipParseError::UriSyntax("empty host".to_string()));
        }
        if let Some(inner) = trimmed.strip_prefix('[') {
            let inner = inner
                .strip_suffix(']')
                .ok_or_else(|| SipParseError::UriSyntax(format!("unterminated IPv6: {}", input)))?;
            let ip: IpAddr = inner
                .parse()
                .map_err(|_| SipParseError::UriSyntax(format!("bad IPv6 literal: {}", inner)))?;
            return Ok(Host::Ip(ip));
        }
        if let Ok(ip) = trimmed.parse::<IpAddr>() {
            return Ok(Host::Ip(ip));
        }
        Ok(Host::Domain(trimmed.to_ascii_lowercase()))
    }

    pub fn is_domain(&self) -> bool {
        matches!(self, Host::Domain(_))
    }
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Host::Ip(IpAddr::V6(ip)) => write!(f, "[{}]", ip),
            Host::Ip(IpAddr::V4(ip)) => write!(f, "{}", ip),
            Host::Domain(domain) => write!(f, "{}", domain),
        }
    }
}

impl From<IpAddr> for Host {
    fn from(ip: IpAddr) -> Self {
        Host::Ip(ip)
    }
}

/// Host with an optional port, as written in URIs and Via sent-by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostPort {
    pub host: Host,
    pub port: Option<u16>,
}

impl HostPort {
    pub fn new(host: Host, port: Option<u16>) -> Self {
        HostPort { host, port }
    }

    /// Splits `host[:port]` including the bracketed IPv6 reference form
    /// `[2001:db8::1]:5060`.
    pub fn parse(input: &str) -> Result<HostPort, SipParseError> {
        let trimmed = input.trim();
        if trimmed.starts_with('[') {
            let end = trimmed
                .find(']')
                .ok_or_else(|| SipParseError::UriSyntax(format!("unterminated IPv6: {}", input)))?;
            let host = Host::parse(&trimmed[..=end])?;
            let rest = &trimmed[end + 1..];
            let port = match rest.strip_prefix(':') {
                Some(port_str) => Some(parse_port(port_str)?),
                None if rest.is_empty() => None,
                None => {
                    return Err(SipParseError::UriSyntax(format!(
                        "trailing garbage after IPv6: {}",
                        input
                    )))
                }
            };
            return Ok(HostPort { host, port });
        }

        match trimmed.rfind(':') {
            // More than one colon without brackets is an unbracketed IPv6
            // literal, which the grammar forbids.
            Some(_) if trimmed.matches(':').count() > 1 => Err(SipParseError::UriSyntax(format!(
                "unbracketed IPv6 literal: {}",
                input
            ))),
            Some(idx) => {
                let host = Host::parse(&trimmed[..idx])?;
                let port = parse_port(&trimmed[idx + 1..])?;
                Ok(HostPort {
                    host,
                    port: Some(port),
                })
            }
            None => Ok(HostPort {
                host: Host::parse(trimmed)?,
                port: None,
            }),
        }
    }

    pub fn port_or(&self, default: u16) -> u16 {
        self.port.unwrap_or(default)
    }
}

fn parse_port(input: &str) -> Result<u16, SipParseError> {
    input
        .parse::<u16>()
        .map_err(|_| SipParseError::UriSyntax(format!("bad port: {}", input)))
}

impl std::fmt::Display for HostPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => write!(f, "{}", self.host),
        }
    }
}

impl From<SocketAddr> for HostPort {
    fn from(addr: SocketAddr) -> Self {
        HostPort {
            host: Host::Ip(addr.ip()),
            port: Some(addr.port()),
        }
    }
}

impl TryFrom<&HostPort> for SocketAddr {
    type Error = SipParseError;

    fn try_from(value: &HostPort) -> Result<Self, Self::Error> {
        match &value.host {
            Host::Ip(ip) => Ok(SocketAddr::new(*ip, value.port.unwrap_or(5060))),
            Host::Domain(domain) => Err(SipParseError::UriSyntax(format!(
                "cannot convert domain {} to socket address",
                domain
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ipv4_with_port() {
        let hp = HostPort::parse("192.168.1.10:5060").unwrap();
        assert_eq!(hp.port, Some(5060));
        assert!(matches!(hp.host, Host::Ip(IpAddr::V4(_))));
    }

    #[test]
    fn parses_bracketed_ipv6() {
        let hp = HostPort::parse("[2001:db8::1]:5061").unwrap();
        assert_eq!(hp.port, Some(5061));
        assert_eq!(hp.to_string(), "[2001:db8::1]:5061");

        let no_port = HostPort::parse("[::1]").unwrap();
        assert_eq!(no_port.port, None);
    }

    #[test]
    fn rejects_unbracketed_ipv6() {
        assert!(HostPort::parse("2001:db8::1").is_err());
    }

    #[test]
    fn domains_fold_to_lowercase() {
        let hp = HostPort::parse("Example.COM").unwrap();
        assert_eq!(hp.to_string(), "example.com");
    }
}
