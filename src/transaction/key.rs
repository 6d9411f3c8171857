use crate::sip::{HostPort, Method, Request, Response, BRANCH_MAGIC_COOKIE};
use crate::{Error, Result};
use std::hash::Hash;

/// Which side of the transaction the key indexes. The same wire message
/// produces different keys for client and server so a loopback test
/// cannot collide with itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionRole {
    Client,
    Server,
}

impl std::fmt::Display for TransactionRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionRole::Client => write!(f, "c"),
            TransactionRole::Server => write!(f, "s"),
        }
    }
}

/// RFC 3261 §17.2.3 matching: branch + top-Via sent-by + method.
///
/// ACK carries the INVITE's method in the key so an ACK for a non-2xx
/// final matches the INVITE server transaction; an ACK for a 2xx has a
/// fresh branch and matches nothing. CANCEL keeps its own method and
/// forms its own transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rfc3261 {
    pub role: TransactionRole,
    pub branch: String,
    pub sent_by: String,
    pub method: Method,
}

impl Hash for Rfc3261 {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.role.hash(state);
        self.branch.hash(state);
        self.sent_by.hash(state);
        self.method.hash(state);
    }
}

/// Legacy matching for peers whose branch lacks the magic cookie
/// (RFC 2543 era): request identity falls back to Call-ID, CSeq,
/// from-tag and the top Via sent-by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rfc2543 {
    pub role: TransactionRole,
    pub method: Method,
    pub cseq: u32,
    pub from_tag: String,
    pub call_id: String,
    pub via_host_port: String,
}

impl Hash for Rfc2543 {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.role.hash(state);
        self.method.hash(state);
        self.cseq.hash(state);
        self.from_tag.hash(state);
        self.call_id.hash(state);
        self.via_host_port.hash(state);
    }
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum TransactionKey {
    Rfc3261(Rfc3261),
    Rfc2543(Rfc2543),
    Invalid,
}

/// ACK matches the INVITE transaction for non-2xx finals (§17.1.3);
/// every other method keys as itself.
fn key_method(method: &Method) -> Method {
    match method {
        Method::Ack => Method::Invite,
        other => other.clone(),
    }
}

impl TransactionKey {
    pub fn from_request(req: &Request, role: TransactionRole) -> Result<Self> {
        let via = req.via()?;
        Self::build(
            role,
            via.branch(),
            &via.sent_by,
            key_method(&req.method),
            || {
                let cseq = req.cseq()?;
                let from_tag = req
                    .from()?
                    .tag()
                    .ok_or_else(|| {
                        Error::TransactionError(
                            "from tag missing".to_string(),
                            TransactionKey::Invalid,
                        )
                    })?
                    .to_string();
                Ok((cseq.seq, from_tag, req.call_id()?.to_string()))
            },
        )
    }

    pub fn from_response(resp: &Response, role: TransactionRole) -> Result<Self> {
        let via = resp.via()?;
        let cseq = resp.cseq()?;
        Self::build(
            role,
            via.branch(),
            &via.sent_by,
            key_method(&cseq.method),
            || {
                let from_tag = resp
                    .from()?
                    .tag()
                    .ok_or_else(|| {
                        Error::TransactionError(
                            "from tag missing".to_string(),
                            TransactionKey::Invalid,
                        )
                    })?
                    .to_string();
                Ok((cseq.seq, from_tag, resp.call_id()?.to_string()))
            },
        )
    }

    fn build<F>(
        role: TransactionRole,
        branch: Option<&str>,
        sent_by: &HostPort,
        method: Method,
        legacy_fields: F,
    ) -> Result<Self>
    where
        F: FnOnce() -> Result<(u32, String, String)>,
    {
        match branch {
            Some(branch) if branch.starts_with(BRANCH_MAGIC_COOKIE) => {
                Ok(TransactionKey::Rfc3261(Rfc3261 {
                    role,
                    branch: branch.to_string(),
                    sent_by: sent_by.to_string(),
                    method,
                }))
            }
            _ => {
                let (cseq, from_tag, call_id) = legacy_fields()?;
                Ok(TransactionKey::Rfc2543(Rfc2543 {
                    role,
                    method,
                    cseq,
                    from_tag,
                    call_id,
                    via_host_port: sent_by.to_string(),
                }))
            }
        }
    }

    /// Same transaction identity with a different method slot; the
    /// endpoint uses this to route a CANCEL to its INVITE.
    pub fn with_method(&self, method: Method) -> Self {
        match self {
            TransactionKey::Rfc3261(key) => TransactionKey::Rfc3261(Rfc3261 {
                method,
                ..key.clone()
            }),
            TransactionKey::Rfc2543(key) => TransactionKey::Rfc2543(Rfc2543 {
                method,
                ..key.clone()
            }),
            TransactionKey::Invalid => TransactionKey::Invalid,
        }
    }
}

impl std::fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionKey::Rfc3261(key) => write!(
                f,
                "{}/{}/{}({})",
                key.role, key.method, key.sent_by, key.branch
            ),
            TransactionKey::Rfc2543(key) => write!(
                f,
                "{}/{}/{} {}[{}]",
                key.role, key.method, key.cseq, key.from_tag, key.via_host_port
            ),
            TransactionKey::Invalid => write!(f, "INVALID"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sip::{CSeq, Header, Headers, Method, NameAddr, Uri, Via};

    fn request(method: Method, branch: &str) -> Request {
        let mut req = Request::new(method.clone(), Uri::parse("sip:bob@biloxi.com").unwrap());
        let headers: &mut Headers = &mut req.headers;
        headers.push(Header::Via(
            Via::parse(&format!(
                "SIP/2.0/UDP client.atlanta.com:5060;branch={}",
                branch
            ))
            .unwrap(),
        ));
        headers.push(Header::From(
            NameAddr::parse("<sip:alice@atlanta.com>;tag=88sja8x").unwrap(),
        ));
        headers.push(Header::To(NameAddr::parse("<sip:bob@biloxi.com>").unwrap()));
        headers.push(Header::CallId("key-test@atlanta.com".to_string()));
        headers.push(Header::CSeq(CSeq { seq: 1, method }));
        req
    }

    #[test]
    fn rfc3261_key_from_branch() {
        let req = request(Method::Invite, "z9hG4bKnashds7");
        let key = TransactionKey::from_request(&req, TransactionRole::Server).unwrap();
        match &key {
            TransactionKey::Rfc3261(k) => {
                assert_eq!(k.branch, "z9hG4bKnashds7");
                assert_eq!(k.sent_by, "client.atlanta.com:5060");
                assert_eq!(k.method, Method::Invite);
            }
            _ => panic!("expected rfc3261 key"),
        }
    }

    #[test]
    fn ack_maps_to_invite_key() {
        let invite = request(Method::Invite, "z9hG4bKnashds7");
        let mut ack = request(Method::Ack, "z9hG4bKnashds7");
        ack.headers.cseq_mut().unwrap().method = Method::Ack;

        let invite_key = TransactionKey::from_request(&invite, TransactionRole::Server).unwrap();
        let ack_key = TransactionKey::from_request(&ack, TransactionRole::Server).unwrap();
        assert_eq!(invite_key, ack_key);
    }

    #[test]
    fn cancel_forms_its_own_transaction() {
        let invite = request(Method::Invite, "z9hG4bKnashds7");
        let cancel = request(Method::Cancel, "z9hG4bKnashds7");

        let invite_key = TransactionKey::from_request(&invite, TransactionRole::Server).unwrap();
        let cancel_key = TransactionKey::from_request(&cancel, TransactionRole::Server).unwrap();
        assert_ne!(invite_key, cancel_key);
        assert_eq!(cancel_key.with_method(Method::Invite), invite_key);
    }

    #[test]
    fn roles_do_not_collide() {
        let req = request(Method::Register, "z9hG4bKreg1");
        let client = TransactionKey::from_request(&req, TransactionRole::Client).unwrap();
        let server = TransactionKey::from_request(&req, TransactionRole::Server).unwrap();
        assert_ne!(client, server);
    }

    #[test]
    fn missing_cookie_uses_legacy_matching() {
        let req = request(Method::Invite, "0ld-style-branch");
        let key = TransactionKey::from_request(&req, TransactionRole::Server).unwrap();
        match key {
            TransactionKey::Rfc2543(k) => {
                assert_eq!(k.call_id, "key-test@atlanta.com");
                assert_eq!(k.from_tag, "88sja8x");
            }
            _ => panic!("expected legacy key"),
        }
    }
}
