use super::transport::Transport;

/// A `;name=value` parameter on a URI, Via, or name-addr header.
///
/// Well-known parameters get their own variant so callers match on them
/// directly; everything else is preserved in [`Param::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Param {
    Tag(String),
    Branch(String),
    Received(String),
    /// `rport` without a value requests the response port (RFC 3581);
    /// with a value it echoes the source port back.
    Rport(Option<u16>),
    Expires(u32),
    Transport(Transport),
    User(String),
    Maddr(String),
    Ttl(u8),
    Lr,
    Q(String),
    Other(String, Option<String>),
}

impl Param {
    pub fn name(&self) -> &str {
        match self {
            Param::Tag(_) => "tag",
            Param::Branch(_) => "branch",
            Param::Received(_) => "received",
            Param::Rport(_) => "rport",
            Param::Expires(_) => "expires",
            Param::Transport(_) => "transport",
            Param::User(_) => "user",
            Param::Maddr(_) => "maddr",
            Param::Ttl(_) => "ttl",
            Param::Lr => "lr",
            Param::Q(_) => "q",
            Param::Other(name, _) => name.as_str(),
        }
    }

    /// Parses one `name[=value]` fragment. Parameter names are
    /// case-insensitive; values keep their case.
    pub fn parse(fragment: &str) -> Option<Param> {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return None;
        }
        let (name, value) = match fragment.split_once('=') {
            Some((name, value)) => (name.trim(), Some(value.trim())),
            None => (fragment, None),
        };
        let param = match name.to_ascii_lowercase().as_str() {
            "tag" => Param::Tag(value.unwrap_or_default().to_string()),
            "branch" => Param::Branch(value.unwrap_or_default().to_string()),
            "received" => Param::Received(value.unwrap_or_default().to_string()),
            "rport" => Param::Rport(value.and_then(|v| v.parse().ok())),
            "expires" => match value.and_then(|v| v.parse().ok()) {
                Some(secs) => Param::Expires(secs),
                None => Param::Other(name.to_string(), value.map(str::to_string)),
            },
            "transport" => match value.and_then(Transport::from_token) {
                Some(transport) => Param::Transport(transport),
                None => Param::Other(name.to_string(), value.map(str::to_string)),
            },
            "user" => Param::User(value.unwrap_or_default().to_string()),
            "maddr" => Param::Maddr(value.unwrap_or_default().to_string()),
            "ttl" => match value.and_then(|v| v.parse().ok()) {
                Some(ttl) => Param::Ttl(ttl),
                None => Param::Other(name.to_string(), value.map(str::to_string)),
            },
            "lr" => Param::Lr,
            "q" => Param::Q(value.unwrap_or_default().to_string()),
            _ => Param::Other(name.to_string(), value.map(str::to_string)),
        };
        Some(param)
    }

    /// Parses a `;`-joined parameter list (the part after the first `;`).
    pub fn parse_list(input: &str) -> Vec<Param> {
        input.split(';').filter_map(Param::parse).collect()
    }
}

impl std::fmt::Display for Param {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Param::Tag(v) => write!(f, "tag={}", v),
            Param::Branch(v) => write!(f, "branch={}", v),
            Param::Received(v) => write!(f, "received={}", v),
            Param::Rport(Some(port)) => write!(f, "rport={}", port),
            Param::Rport(None) => write!(f, "rport"),
            Param::Expires(v) => write!(f, "expires={}", v),
            Param::Transport(t) => write!(f, "transport={}", t),
            Param::User(v) => write!(f, "user={}", v),
            Param::Maddr(v) => write!(f, "maddr={}", v),
            Param::Ttl(v) => write!(f, "ttl={}", v),
            Param::Lr => write!(f, "lr"),
            Param::Q(v) => write!(f, "q={}", v),
            Param::Other(name, Some(value)) => write!(f, "{}={}", name, value),
            Param::Other(name, None) => write!(f, "{}", name),
        }
    }
}

/// Formats a parameter list with its leading separators.
pub(crate) fn write_params(
    f: &mut std::fmt::Formatter<'_>,
    params: &[Param],
) -> std::fmt::Result {
    for param in params {
        write!(f, ";{}", param)?;
    }
    Ok(())
}

/// Finds a parameter by case-insensitive name.
pub fn find_param<'a>(params: &'a [Param], name: &str) -> Option<&'a Param> {
    params.iter().find(|p| p.name().eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_params() {
        assert_eq!(
            Param::parse("tag=1928301774"),
            Some(Param::Tag("1928301774".to_string()))
        );
        assert_eq!(
            Param::parse("branch=z9hG4bK776asdhds"),
            Some(Param::Branch("z9hG4bK776asdhds".to_string()))
        );
        assert_eq!(Param::parse("lr"), Some(Param::Lr));
        assert_eq!(Param::parse("rport"), Some(Param::Rport(None)));
        assert_eq!(Param::parse("RPort=5060"), Some(Param::Rport(Some(5060))));
        assert_eq!(
            Param::parse("transport=tcp"),
            Some(Param::Transport(Transport::Tcp))
        );
    }

    #[test]
    fn unknown_params_survive() {
        let param = Param::parse("x-extra=\"quoted\"").unwrap();
        assert_eq!(param.to_string(), "x-extra=\"quoted\"");
    }

    #[test]
    fn parses_list() {
        let params = Param::parse_list("transport=udp;lr;x=1");
        assert_eq!(params.len(), 3);
        assert!(find_param(&params, "LR").is_some());
    }
}
