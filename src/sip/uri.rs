use super::{
    host::{Host, HostPort},
    param::{find_param, write_params, Param},
    parse::SipParseError,
    transport::Transport,
};

#[derive(Debug, Clone, Eq)]
pub enum Scheme {
    Sip,
    Sips,
    Tel,
    Other(String),
}

impl PartialEq for Scheme {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Scheme::Sip, Scheme::Sip)
            | (Scheme::Sips, Scheme::Sips)
            | (Scheme::Tel, Scheme::Tel) => true,
            (Scheme::Other(a), Scheme::Other(b)) => a.eq_ignore_ascii_case(b),
            _ => false,
        }
    }
}

impl std::hash::Hash for Scheme {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Scheme::Sip => "sip".hash(state),
            Scheme::Sips => "sips".hash(state),
            Scheme::Tel => "tel".hash(state),
            Scheme::Other(s) => s.to_ascii_lowercase().hash(state),
        }
    }
}

impl Scheme {
    pub fn as_str(&self) -> &str {
        match self {
            Scheme::Sip => "sip",
            Scheme::Sips => "sips",
            Scheme::Tel => "tel",
            Scheme::Other(s) => s.as_str(),
        }
    }
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// SIP / SIPS / tel URI (RFC 3261 §19.1, RFC 3966).
///
/// For tel URIs the subscriber number is carried in `user` and the host
/// part is empty. Equality follows RFC 3261 §19.1.4.
#[derive(Debug, Clone, Eq)]
pub struct Uri {
    pub scheme: Scheme,
    pub user: Option<String>,
    pub host_port: HostPort,
    pub params: Vec<Param>,
    pub headers: Vec<(String, String)>,
}

impl Uri {
    pub fn new(scheme: Scheme, host_port: HostPort) -> Self {
        Uri {
            scheme,
            user: None,
            host_port,
            params: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn parse(input: &str) -> Result<Uri, SipParseError> {
        let input = input.trim();
        let (scheme_token, rest) = input
            .split_once(':')
            .ok_or_else(|| SipParseError::UriSyntax(format!("missing scheme: {}", input)))?;

        let scheme = if scheme_token.eq_ignore_ascii_case("sip") {
            Scheme::Sip
        } else if scheme_token.eq_ignore_ascii_case("sips") {
            Scheme::Sips
        } else if scheme_token.eq_ignore_ascii_case("tel") {
            Scheme::Tel
        } else if scheme_token.chars().all(|c| {
            c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.'
        }) && scheme_token
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic())
            .unwrap_or(false)
        {
            Scheme::Other(scheme_token.to_string())
        } else {
            return Err(SipParseError::UriSyntax(format!(
                "bad scheme: {}",
                scheme_token
            )));
        };

        if scheme == Scheme::Tel {
            return Self::parse_tel(rest);
        }

        let (addr_part, headers_part) = match rest.split_once('?') {
            Some((addr, headers)) => (addr, Some(headers)),
            None => (rest, None),
        };

        // Split params off at the first `;` after the host part. An `@`
        // may not appear after the host, so splitting userinfo first is
        // safe: userinfo cannot contain an unescaped `;`.
        let (core, params_part) = match addr_part.split_once(';') {
            Some((core, params)) => (core, Some(params)),
            None => (addr_part, None),
        };

        let (user, host_part) = match core.rsplit_once('@') {
            Some((user, host)) => {
                // Tolerate an empty user-info ("sip:@host") per RFC 4475
                // leniency.
                let user = if user.is_empty() {
                    None
                } else {
                    Some(unescape(user))
                };
                (user, host)
            }
            None => (None, core),
        };

        if host_part.trim().is_empty() {
            return Err(SipParseError::UriSyntax(format!("missing host: {}", input)));
        }
        let host_port = HostPort::parse(host_part)?;

        let params = params_part.map(Param::parse_list).unwrap_or_default();

        let mut headers = Vec::new();
        if let Some(headers_part) = headers_part {
            for pair in headers_part.split('&') {
                if pair.is_empty() {
                    continue;
                }
                match pair.split_once('=') {
                    Some((name, value)) => {
                        headers.push((name.to_string(), value.to_string()));
                    }
                    None => headers.push((pair.to_string(), String::new())),
                }
            }
        }

        Ok(Uri {
            scheme,
            user,
            host_port,
            params,
            headers,
        })
    }

    fn parse_tel(rest: &str) -> Result<Uri, SipParseError> {
        let (number, params_part) = match rest.split_once(';') {
            Some((number, params)) => (number, Some(params)),
            None => (rest, None),
        };
        if number.is_empty() {
            return Err(SipParseError::UriSyntax("empty tel subscriber".to_string()));
        }
        Ok(Uri {
            scheme: Scheme::Tel,
            user: Some(number.to_string()),
            host_port: HostPort {
                host: Host::Domain(String::new()),
                port: None,
            },
            params: params_part.map(Param::parse_list).unwrap_or_default(),
            headers: Vec::new(),
        })
    }

    pub fn host(&self) -> &Host {
        &self.host_port.host
    }

    /// The `transport` URI parameter, if present.
    pub fn transport(&self) -> Option<Transport> {
        self.params.iter().find_map(|p| match p {
            Param::Transport(t) => Some(*t),
            _ => None,
        })
    }

    /// Loose-routing marker (RFC 3261 §19.1.1): its presence on a Route
    /// URI selects loose routing instead of strict.
    pub fn is_loose_router(&self) -> bool {
        self.params.iter().any(|p| matches!(p, Param::Lr))
    }

    pub fn is_phone_user(&self) -> bool {
        matches!(find_param(&self.params, "user"), Some(Param::User(kind)) if kind.eq_ignore_ascii_case("phone"))
    }

    pub fn is_secure(&self) -> bool {
        self.scheme == Scheme::Sips
    }

    pub fn with_param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Copy with params and headers stripped, as used for dialog
    /// remote targets and Contact comparisons.
    pub fn base(&self) -> Uri {
        Uri {
            scheme: self.scheme.clone(),
            user: self.user.clone(),
            host_port: self.host_port.clone(),
            params: Vec::new(),
            headers: Vec::new(),
        }
    }
}

// URI parameters that must agree when present in either URI
// (RFC 3261 §19.1.4).
const SIGNIFICANT_PARAMS: [&str; 5] = ["transport", "user", "ttl", "method", "maddr"];

impl PartialEq for Uri {
    fn eq(&self, other: &Self) -> bool {
        if self.scheme != other.scheme
            || self.user != other.user
            || self.host_port != other.host_port
        {
            return false;
        }

        for name in SIGNIFICANT_PARAMS {
            let mine = find_param(&self.params, name);
            let theirs = find_param(&other.params, name);
            match (mine, theirs) {
                (None, None) => {}
                (Some(a), Some(b)) if a == b => {}
                _ => return false,
            }
        }

        // Any other parameter appearing in both must match; a parameter
        // appearing in only one is ignored.
        for param in &self.params {
            if SIGNIFICANT_PARAMS
                .iter()
                .any(|n| n.eq_ignore_ascii_case(param.name()))
            {
                continue;
            }
            if let Some(theirs) = find_param(&other.params, param.name()) {
                if theirs != param {
                    return false;
                }
            }
        }
        true
    }
}

impl std::hash::Hash for Uri {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.scheme.hash(state);
        self.user.hash(state);
        self.host_port.hash(state);
    }
}

impl std::fmt::Display for Uri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.scheme == Scheme::Tel {
            write!(f, "tel:{}", self.user.as_deref().unwrap_or_default())?;
            return write_params(f, &self.params);
        }
        write!(f, "{}:", self.scheme)?;
        if let Some(user) = &self.user {
            write!(f, "{}@", escape_user(user))?;
        }
        write!(f, "{}", self.host_port)?;
        write_params(f, &self.params)?;
        let mut first = true;
        for (name, value) in &self.headers {
            write!(f, "{}{}={}", if first { "?" } else { "&" }, name, value)?;
            first = false;
        }
        Ok(())
    }
}

impl TryFrom<&str> for Uri {
    type Error = SipParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Uri::parse(value)
    }
}

fn unescape(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16)),
                bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16)),
            ) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn escape_user(user: &str) -> String {
    let mut out = String::with_capacity(user.len());
    for c in user.chars() {
        match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' => out.push(c),
            '-' | '_' | '.' | '!' | '~' | '*' | '\'' | '(' | ')' | '&' | '=' | '+' | '$' | ','
            | ';' | '?' | '/' | ':' => out.push(c),
            _ => {
                for b in c.to_string().as_bytes() {
                    out.push_str(&format!("%{:02X}", b));
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_sip_uri() {
        let uri = Uri::parse("sips:alice@atlanta.com:5061;transport=tls?subject=project").unwrap();
        assert_eq!(uri.scheme, Scheme::Sips);
        assert_eq!(uri.user.as_deref(), Some("alice"));
        assert_eq!(uri.host_port.port, Some(5061));
        assert_eq!(uri.transport(), Some(Transport::Tls));
        assert_eq!(uri.headers.len(), 1);
    }

    #[test]
    fn parses_tel_uri() {
        let uri = Uri::parse("tel:+1-555-0123;phone-context=example.com").unwrap();
        assert_eq!(uri.scheme, Scheme::Tel);
        assert_eq!(uri.user.as_deref(), Some("+1-555-0123"));
        assert_eq!(
            uri.to_string(),
            "tel:+1-555-0123;phone-context=example.com"
        );
    }

    #[test]
    fn equality_is_scheme_sensitive() {
        let sip = Uri::parse("sip:alice@atlanta.com").unwrap();
        let sips = Uri::parse("sips:alice@atlanta.com").unwrap();
        assert_ne!(sip, sips);
    }

    #[test]
    fn equality_user_is_case_sensitive_host_is_not() {
        let a = Uri::parse("sip:alice@AtLanTa.CoM;transport=TCP").unwrap();
        let b = Uri::parse("sip:alice@atlanta.com;transport=tcp").unwrap();
        assert_eq!(a, b);

        let c = Uri::parse("sip:ALICE@atlanta.com;transport=tcp").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn equality_significant_param_one_sided() {
        // RFC 3261 §19.1.4: a transport param in only one URI breaks
        // equivalence.
        let a = Uri::parse("sip:bob@biloxi.com;transport=udp").unwrap();
        let b = Uri::parse("sip:bob@biloxi.com").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn equality_other_param_one_sided_is_ignored() {
        let a = Uri::parse("sip:carol@chicago.com;newparam=5").unwrap();
        let b = Uri::parse("sip:carol@chicago.com;security=on").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn equality_port_presence_matters() {
        let a = Uri::parse("sip:bob@biloxi.com").unwrap();
        let b = Uri::parse("sip:bob@biloxi.com:5060").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn ipv6_reference() {
        let uri = Uri::parse("sip:user@[2001:db8::10]:5070;transport=tcp").unwrap();
        assert_eq!(uri.host_port.port, Some(5070));
        assert_eq!(
            uri.to_string(),
            "sip:user@[2001:db8::10]:5070;transport=TCP"
        );
    }

    #[test]
    fn escaped_user_info() {
        let uri = Uri::parse("sip:sip%3Auser%40example.com@company.com").unwrap();
        assert_eq!(uri.user.as_deref(), Some("sip:user@example.com"));
    }

    #[test]
    fn empty_user_info_tolerated() {
        let uri = Uri::parse("sip:@example.com").unwrap();
        assert_eq!(uri.user, None);
    }

    #[test]
    fn loose_route_marker() {
        let uri = Uri::parse("sip:proxy.example.com;lr").unwrap();
        assert!(uri.is_loose_router());
        assert!(!Uri::parse("sip:proxy.example.com").unwrap().is_loose_router());
    }

    #[test]
    fn phone_user() {
        let uri = Uri::parse("sip:+15550123@gw.example.com;user=phone").unwrap();
        assert!(uri.is_phone_user());
    }
}
