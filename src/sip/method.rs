/// SIP request method (RFC 3261 and common extension RFCs).
///
/// Methods not in the enumerated set are preserved through
/// [`Method::Extension`] so unknown requests can still be keyed,
/// rejected with 405 and round-tripped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Invite,
    Ack,
    Bye,
    Cancel,
    Options,
    Register,
    Subscribe,
    Notify,
    Refer,
    Info,
    Message,
    PRack,
    Update,
    Publish,
    Extension(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Options => "OPTIONS",
            Method::Register => "REGISTER",
            Method::Subscribe => "SUBSCRIBE",
            Method::Notify => "NOTIFY",
            Method::Refer => "REFER",
            Method::Info => "INFO",
            Method::Message => "MESSAGE",
            Method::PRack => "PRACK",
            Method::Update => "UPDATE",
            Method::Publish => "PUBLISH",
            Method::Extension(name) => name.as_str(),
        }
    }

    /// Maps a method token to the enum. Method names are case-sensitive
    /// per RFC 3261 §7.1; an unrecognized token becomes an extension.
    pub fn from_token(token: &str) -> Method {
        match token {
            "INVITE" => Method::Invite,
            "ACK" => Method::Ack,
            "BYE" => Method::Bye,
            "CANCEL" => Method::Cancel,
            "OPTIONS" => Method::Options,
            "REGISTER" => Method::Register,
            "SUBSCRIBE" => Method::Subscribe,
            "NOTIFY" => Method::Notify,
            "REFER" => Method::Refer,
            "INFO" => Method::Info,
            "MESSAGE" => Method::Message,
            "PRACK" => Method::PRack,
            "UPDATE" => Method::Update,
            "PUBLISH" => Method::Publish,
            other => Method::Extension(other.to_string()),
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for Method {
    fn from(token: &str) -> Self {
        Method::from_token(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip() {
        for token in [
            "INVITE", "ACK", "BYE", "CANCEL", "OPTIONS", "REGISTER", "SUBSCRIBE", "NOTIFY",
            "REFER", "INFO", "MESSAGE", "PRACK", "UPDATE", "PUBLISH",
        ] {
            let method = Method::from_token(token);
            assert!(!matches!(method, Method::Extension(_)), "{}", token);
            assert_eq!(method.as_str(), token);
        }
    }

    #[test]
    fn methods_are_case_sensitive() {
        assert_eq!(
            Method::from_token("invite"),
            Method::Extension("invite".to_string())
        );
    }
}
