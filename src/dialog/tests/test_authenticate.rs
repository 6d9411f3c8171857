use super::{create_test_endpoint, make_invite};
use crate::dialog::authenticate::{handle_client_authenticate, Credential, NonceCache};
use crate::sip::auth::{Algorithm, AuthQop, Challenge, DigestGenerator};
use crate::sip::{Header, Headers, Method, Response, StatusCode, Uri};
use crate::transaction::key::{TransactionKey, TransactionRole};
use crate::transaction::transaction::Transaction;
use crate::Result;

fn challenge_response(req: &crate::sip::Request, proxy: bool) -> Response {
    let mut headers = Headers::new();
    headers.push(Header::Via(req.via().unwrap().clone()));
    headers.push(Header::From(req.from().unwrap().clone()));
    headers.push(Header::To(req.to().unwrap().clone().with_tag("authtag")));
    headers.push(Header::CallId(req.call_id().unwrap().to_string()));
    headers.push(Header::CSeq(req.cseq().unwrap().clone()));
    let challenge = Challenge {
        realm: "atlanta.com".to_string(),
        nonce: "84a4cc6f3082121f32b42a2187831a9e".to_string(),
        opaque: None,
        algorithm: Some(Algorithm::Md5),
        qop: vec!["auth".to_string()],
        stale: false,
    };
    let (header, status) = if proxy {
        (
            Header::ProxyAuthenticate(challenge),
            StatusCode::PROXY_AUTHENTICATION_REQUIRED,
        )
    } else {
        (Header::WwwAuthenticate(challenge), StatusCode::UNAUTHORIZED)
    };
    headers.push(header);
    Response {
        status_code: status,
        reason_phrase: None,
        version: req.version,
        headers,
        body: vec![],
    }
}

#[tokio::test]
async fn retry_carries_digest_authorization() -> Result<()> {
    let endpoint = create_test_endpoint().await?;
    let invite = make_invite("auth-1@atlanta.com", "ftag1", None);
    let key = TransactionKey::from_request(&invite, TransactionRole::Client)?;
    let tx = Transaction::new_client(key.clone(), invite.clone(), endpoint.inner.clone(), None);

    let resp = challenge_response(&invite, false);
    let cred = Credential {
        username: "alice".to_string(),
        password: "secretword".to_string(),
    };
    let new_tx = handle_client_authenticate(2, tx, resp, &cred).await?;

    // CSeq bumped, branch regenerated, so it is a new transaction.
    assert_eq!(new_tx.original.cseq()?.seq, 2);
    assert_ne!(new_tx.key, key);
    let new_branch = new_tx.original.via()?.branch().unwrap().to_string();
    assert_ne!(new_branch, invite.via()?.branch().unwrap());
    assert!(new_branch.starts_with("z9hG4bK"));

    let auth = new_tx
        .original
        .headers
        .iter()
        .find_map(|h| match h {
            Header::Authorization(auth) => Some(auth),
            _ => None,
        })
        .expect("authorization header");
    assert_eq!(auth.username, "alice");
    assert_eq!(auth.realm, "atlanta.com");

    // Recompute the expected hash with the same qop state.
    let expected = DigestGenerator {
        username: "alice",
        password: "secretword",
        algorithm: Algorithm::Md5,
        nonce: "84a4cc6f3082121f32b42a2187831a9e",
        method: &Method::Invite,
        qop: auth.qop.as_ref(),
        uri: &new_tx.original.uri,
        realm: "atlanta.com",
    }
    .compute();
    assert_eq!(auth.response, expected);
    Ok(())
}

#[tokio::test]
async fn proxy_challenge_yields_proxy_authorization() -> Result<()> {
    let endpoint = create_test_endpoint().await?;
    let invite = make_invite("auth-2@atlanta.com", "ftag2", None);
    let key = TransactionKey::from_request(&invite, TransactionRole::Client)?;
    let tx = Transaction::new_client(key, invite.clone(), endpoint.inner.clone(), None);

    let resp = challenge_response(&invite, true);
    let cred = Credential {
        username: "alice".to_string(),
        password: "secretword".to_string(),
    };
    let new_tx = handle_client_authenticate(2, tx, resp, &cred).await?;

    assert!(new_tx
        .original
        .headers
        .iter()
        .any(|h| matches!(h, Header::ProxyAuthorization(_))));
    assert!(!new_tx
        .original
        .headers
        .iter()
        .any(|h| matches!(h, Header::Authorization(_))));
    Ok(())
}

#[test]
fn nonce_cache_increments_nc_per_realm() {
    let cache = NonceCache::new();
    let challenge = Challenge {
        realm: "example.com".to_string(),
        nonce: "abc".to_string(),
        opaque: None,
        algorithm: Some(Algorithm::Md5),
        qop: vec!["auth".to_string()],
        stale: false,
    };
    cache.store(challenge, false);

    let cred = Credential {
        username: "bob".to_string(),
        password: "pw".to_string(),
    };
    let uri = Uri::parse("sip:registrar.example.com").unwrap();

    let (first, proxy) = cache
        .authorization_for("example.com", &cred, &Method::Register, &uri)
        .expect("cached nonce");
    assert!(!proxy);
    let (second, _) = cache
        .authorization_for("example.com", &cred, &Method::Register, &uri)
        .expect("cached nonce");

    let nc = |header: &Header| match header {
        Header::Authorization(auth) => auth.qop.as_ref().map(AuthQop::nc),
        _ => None,
    };
    assert_eq!(nc(&first), Some(1));
    assert_eq!(nc(&second), Some(2));

    // Unknown realm yields nothing.
    assert!(cache
        .authorization_for("other.com", &cred, &Method::Register, &uri)
        .is_none());
}
