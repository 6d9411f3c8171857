use super::{
    host::HostPort,
    param::{write_params, Param},
    parse::SipParseError,
    transport::Transport,
};

/// One Via hop: `SIP/2.0/UDP host:port;branch=z9hG4bK...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Via {
    pub transport: Transport,
    pub sent_by: HostPort,
    pub params: Vec<Param>,
}

impl Via {
    pub fn new(transport: Transport, sent_by: HostPort) -> Self {
        Via {
            transport,
            sent_by,
            params: Vec::new(),
        }
    }

    pub fn parse(input: &str) -> Result<Via, SipParseError> {
        let input = input.trim();
        let bad = |_| SipParseError::BadHeaderSyntax {
            name: "Via".to_string(),
            offset: 0,
        };

        let mut parts = input.splitn(3, '/');
        let protocol = parts.next().unwrap_or_default().trim();
        let version = parts.next().unwrap_or_default().trim();
        let rest = parts.next().ok_or(SipParseError::BadHeaderSyntax {
            name: "Via".to_string(),
            offset: 0,
        })?;

        if !protocol.eq_ignore_ascii_case("SIP") {
            return Err(SipParseError::BadHeaderSyntax {
                name: "Via".to_string(),
                offset: 0,
            });
        }
        if version != "2.0" {
            return Err(SipParseError::UnsupportedVersion {
                found: format!("{}/{}", protocol, version),
            });
        }

        // rest = "UDP host:port;params"
        let rest = rest.trim_start();
        let (transport_token, sent_by_and_params) = rest
            .split_once(|c: char| c.is_ascii_whitespace())
            .ok_or(SipParseError::BadHeaderSyntax {
                name: "Via".to_string(),
                offset: 0,
            })?;
        let transport =
            Transport::from_token(transport_token).ok_or(SipParseError::BadHeaderSyntax {
                name: "Via".to_string(),
                offset: 0,
            })?;

        let sent_by_and_params = sent_by_and_params.trim();
        let (sent_by_part, params_part) = match sent_by_and_params.split_once(';') {
            Some((sent_by, params)) => (sent_by, Some(params)),
            None => (sent_by_and_params, None),
        };

        let sent_by = HostPort::parse(sent_by_part).map_err(bad)?;
        let params = params_part.map(Param::parse_list).unwrap_or_default();

        Ok(Via {
            transport,
            sent_by,
            params,
        })
    }

    /// The transaction branch parameter.
    pub fn branch(&self) -> Option<&str> {
        self.params.iter().find_map(|p| match p {
            Param::Branch(branch) => Some(branch.as_str()),
            _ => None,
        })
    }

    pub fn received(&self) -> Option<&str> {
        self.params.iter().find_map(|p| match p {
            Param::Received(addr) => Some(addr.as_str()),
            _ => None,
        })
    }

    pub fn rport(&self) -> Option<Option<u16>> {
        self.params.iter().find_map(|p| match p {
            Param::Rport(port) => Some(*port),
            _ => None,
        })
    }

    pub fn with_param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }
}

impl std::fmt::Display for Via {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SIP/2.0/{} {}", self.transport, self.sent_by)?;
        write_params(f, &self.params)
    }
}

impl TryFrom<&str> for Via {
    type Error = SipParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Via::parse(value)
    }
}
