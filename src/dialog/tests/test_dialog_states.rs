use super::make_invite;
use crate::dialog::DialogId;
use crate::sip::{Header, Headers, Response, StatusCode};
use std::collections::HashMap;

#[test]
fn dialog_id_from_request() {
    let invite = make_invite("call-1@atlanta.com", "fromtag1", None);
    let id = DialogId::try_from(&invite).unwrap();
    assert_eq!(id.call_id, "call-1@atlanta.com");
    assert_eq!(id.from_tag, "fromtag1");
    assert_eq!(id.to_tag, "");
}

#[test]
fn dialog_id_requires_from_tag() {
    let mut invite = make_invite("call-2@atlanta.com", "will-remove", None);
    let from = invite.headers.from_mut().unwrap();
    from.params.clear();
    assert!(DialogId::try_from(&invite).is_err());
}

#[test]
fn dialog_id_from_response() {
    let invite = make_invite("call-3@atlanta.com", "ftag", None);
    let mut headers = Headers::new();
    headers.push(Header::From(invite.from().unwrap().clone()));
    headers.push(Header::To(invite.to().unwrap().clone().with_tag("ttag")));
    headers.push(Header::CallId(invite.call_id().unwrap().to_string()));
    headers.push(Header::CSeq(invite.cseq().unwrap().clone()));
    headers.push(Header::Via(invite.via().unwrap().clone()));
    let resp = Response {
        status_code: StatusCode::OK,
        reason_phrase: None,
        version: invite.version,
        headers,
        body: vec![],
    };
    let id = DialogId::try_from(&resp).unwrap();
    assert_eq!(id.to_tag, "ttag");
}

#[test]
fn equality_is_direction_insensitive() {
    let a = DialogId {
        call_id: "c".to_string(),
        from_tag: "x".to_string(),
        to_tag: "y".to_string(),
    };
    let b = DialogId {
        call_id: "c".to_string(),
        from_tag: "y".to_string(),
        to_tag: "x".to_string(),
    };
    assert_eq!(a, b);

    let mut map = HashMap::new();
    map.insert(a, 1);
    assert!(map.contains_key(&b));
}

#[test]
fn different_call_ids_never_match() {
    let a = DialogId {
        call_id: "c1".to_string(),
        from_tag: "x".to_string(),
        to_tag: "y".to_string(),
    };
    let b = DialogId {
        call_id: "c2".to_string(),
        from_tag: "x".to_string(),
        to_tag: "y".to_string(),
    };
    assert_ne!(a, b);
}
