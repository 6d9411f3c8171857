use super::DialogId;
use crate::sip::auth::{Algorithm, AuthQop, Authorization, Challenge, DigestGenerator};
use crate::sip::{Header, Method, Response};
use crate::transaction::key::{TransactionKey, TransactionRole};
use crate::transaction::transaction::Transaction;
use crate::transaction::{make_via_branch, random_text, CNONCE_LEN};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Mutex;

/// Username/password pair used to answer 401/407 challenges.
#[derive(Clone)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

/// Per-realm nonce cache, kept for the lifetime of a registration so
/// follow-up requests reuse the server's nonce with an incremented
/// nonce count instead of waiting for a fresh challenge.
#[derive(Default)]
pub struct NonceCache {
    entries: Mutex<HashMap<String, CachedChallenge>>,
}

struct CachedChallenge {
    challenge: Challenge,
    proxy: bool,
    nc: u32,
}

impl NonceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, challenge: Challenge, proxy: bool) {
        self.entries.lock().unwrap().insert(
            challenge.realm.clone(),
            CachedChallenge {
                challenge,
                proxy,
                nc: 0,
            },
        );
    }

    pub fn clear(&self, realm: &str) {
        self.entries.lock().unwrap().remove(realm);
    }

    /// Builds an Authorization header from the cached challenge for
    /// `realm`, bumping the nonce count.
    pub fn authorization_for(
        &self,
        realm: &str,
        cred: &Credential,
        method: &Method,
        uri: &crate::sip::Uri,
    ) -> Option<(Header, bool)> {
        let mut entries = self.entries.lock().unwrap();
        let cached = entries.get_mut(realm)?;
        cached.nc += 1;
        let auth = compute_authorization(&cached.challenge, cred, method, uri, cached.nc);
        let header = if cached.proxy {
            Header::ProxyAuthorization(auth)
        } else {
            Header::Authorization(auth)
        };
        Some((header, cached.proxy))
    }
}

fn compute_authorization(
    challenge: &Challenge,
    cred: &Credential,
    method: &Method,
    uri: &crate::sip::Uri,
    nc: u32,
) -> Authorization {
    let algorithm = challenge.algorithm.unwrap_or(Algorithm::Md5);
    let qop = challenge.supports_qop_auth().then(|| AuthQop::Auth {
        cnonce: random_text(CNONCE_LEN),
        nc,
    });

    let generator = DigestGenerator {
        username: cred.username.as_str(),
        password: cred.password.as_str(),
        algorithm,
        nonce: challenge.nonce.as_str(),
        method,
        qop: qop.as_ref(),
        uri,
        realm: challenge.realm.as_str(),
    };

    Authorization {
        username: cred.username.clone(),
        realm: challenge.realm.clone(),
        nonce: challenge.nonce.clone(),
        uri: uri.clone(),
        response: generator.compute(),
        algorithm: Some(algorithm),
        opaque: challenge.opaque.clone(),
        qop,
    }
}

/// Answers a 401/407 by rebuilding the request with credentials and a
/// fresh branch, returning the replacement client transaction. The
/// caller enforces the retry-once policy.
pub async fn handle_client_authenticate(
    new_seq: u32,
    tx: Transaction,
    resp: Response,
    cred: &Credential,
) -> Result<Transaction> {
    let (challenge, proxy) = match (
        resp.headers.www_authenticate(),
        resp.headers.proxy_authenticate(),
    ) {
        (Some(challenge), _) => (challenge.clone(), false),
        (None, Some(challenge)) => (challenge.clone(), true),
        (None, None) => {
            return Err(Error::DialogError(
                "challenge response without authenticate header".to_string(),
                DialogId::try_from(&resp).unwrap_or(DialogId {
                    call_id: String::new(),
                    from_tag: String::new(),
                    to_tag: String::new(),
                }),
            ))
        }
    };

    let mut new_req = tx.original.clone();
    new_req.cseq_mut()?.seq = new_seq;

    let auth = compute_authorization(&challenge, cred, &new_req.method, &new_req.uri, 1);

    // The retried request is a new transaction: fresh branch.
    {
        let via = new_req.via_mut()?;
        via.params.retain(|p| !matches!(p, crate::sip::Param::Branch(_)));
        via.params.push(make_via_branch());
    }

    new_req.headers.retain(|h| {
        !matches!(
            h,
            Header::Authorization(_) | Header::ProxyAuthorization(_)
        )
    });
    if proxy {
        new_req.headers.push(Header::ProxyAuthorization(auth));
    } else {
        new_req.headers.push(Header::Authorization(auth));
    }

    let key = TransactionKey::from_request(&new_req, TransactionRole::Client)?;
    let mut new_tx = Transaction::new_client(
        key,
        new_req,
        tx.endpoint_inner.clone(),
        tx.connection.clone(),
    );
    new_tx.destination = tx.destination.clone();
    Ok(new_tx)
}
