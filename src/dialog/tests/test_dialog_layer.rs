use super::{create_test_endpoint, make_invite};
use crate::dialog::dialog::{DialogInner, DialogState};
use crate::dialog::dialog_layer::DialogLayer;
use crate::dialog::DialogId;
use crate::sip::{Header, Method, NameAddr, StatusCode, Uri};
use crate::transaction::key::{TransactionKey, TransactionRole};
use crate::transaction::transaction::Transaction;
use crate::Result;
use std::sync::Arc;
use tokio::sync::mpsc::unbounded_channel;

fn add_record_route(req: &mut crate::sip::Request, uris: &[&str]) {
    for uri in uris {
        req.headers.push(Header::RecordRoute(
            NameAddr::new(Uri::parse(uri).unwrap()),
        ));
    }
}

async fn client_inner(req: crate::sip::Request) -> Result<DialogInner> {
    let endpoint = create_test_endpoint().await?;
    let (state_sender, _state_receiver) = unbounded_channel();
    DialogInner::new(
        TransactionRole::Client,
        DialogId::try_from(&req)?,
        req,
        endpoint.inner.clone(),
        state_sender,
        None,
        Some(Uri::parse("sip:alice@10.0.0.1:5060").unwrap()),
        None,
    )
}

#[tokio::test]
async fn route_set_is_reversed_for_uac() -> Result<()> {
    let mut invite = make_invite("rr-1@atlanta.com", "ft1", Some("tt1"));
    add_record_route(
        &mut invite,
        &["sip:p1.example.com;lr", "sip:p2.example.com;lr"],
    );
    let inner = client_inner(invite).await?;
    let routes = inner.route_set.lock().unwrap().clone();
    assert_eq!(routes.len(), 2);
    assert_eq!(routes[0].uri.host_port.to_string(), "p2.example.com");
    assert_eq!(routes[1].uri.host_port.to_string(), "p1.example.com");
    Ok(())
}

#[tokio::test]
async fn loose_routing_keeps_remote_target_in_request_uri() -> Result<()> {
    let mut invite = make_invite("rr-2@atlanta.com", "ft2", Some("tt2"));
    add_record_route(&mut invite, &["sip:proxy.example.com;lr"]);
    let inner = client_inner(invite).await?;

    let request = inner.make_request(Method::Bye, None, None, None)?;
    // Loose routing: request-URI stays the remote target, Route carries
    // the proxy.
    assert_eq!(request.uri.host_port.to_string(), "biloxi.com");
    let routes: Vec<_> = request.headers.routes().collect();
    assert_eq!(routes.len(), 1);
    assert!(routes[0].uri.is_loose_router());
    Ok(())
}

#[tokio::test]
async fn strict_routing_moves_first_route_into_request_uri() -> Result<()> {
    let mut invite = make_invite("rr-3@atlanta.com", "ft3", Some("tt3"));
    add_record_route(&mut invite, &["sip:strict.example.com"]);
    let inner = client_inner(invite).await?;

    let request = inner.make_request(Method::Bye, None, None, None)?;
    // Strict routing: first route becomes the request-URI, the remote
    // target goes last in the Route set.
    assert_eq!(request.uri.host_port.to_string(), "strict.example.com");
    let routes: Vec<_> = request.headers.routes().collect();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].uri.host_port.to_string(), "biloxi.com");
    Ok(())
}

#[tokio::test]
async fn in_dialog_cseq_strictly_increases() -> Result<()> {
    let invite = make_invite("cseq-1@atlanta.com", "ft4", Some("tt4"));
    let inner = client_inner(invite).await?;

    let first = inner.make_request(Method::Info, None, None, None)?;
    let second = inner.make_request(Method::Info, None, None, None)?;
    assert!(second.cseq()?.seq > first.cseq()?.seq);

    // ACK reuses the INVITE CSeq instead of allocating.
    let ack = inner.make_request(Method::Ack, Some(314159), None, None)?;
    assert_eq!(ack.cseq()?.seq, 314159);
    Ok(())
}

#[tokio::test]
async fn response_gets_local_tag_except_100() -> Result<()> {
    let invite = make_invite("tag-1@atlanta.com", "ft5", None);
    let endpoint = create_test_endpoint().await?;
    let (state_sender, _state_receiver) = unbounded_channel();
    let inner = DialogInner::new(
        TransactionRole::Server,
        DialogId {
            call_id: "tag-1@atlanta.com".to_string(),
            from_tag: "ft5".to_string(),
            to_tag: "server-tag".to_string(),
        },
        invite.clone(),
        endpoint.inner.clone(),
        state_sender,
        None,
        Some(Uri::parse("sip:bob@10.0.0.2:5060").unwrap()),
        invite.contact().ok().cloned(),
    )?;

    let trying = inner.make_response(&invite, StatusCode::TRYING, None, None);
    assert_eq!(trying.to().unwrap().tag(), None);

    let ringing = inner.make_response(&invite, StatusCode::RINGING, None, None);
    assert_eq!(ringing.to().unwrap().tag(), Some("server-tag"));
    Ok(())
}

#[tokio::test]
async fn server_dialog_created_with_fresh_tag() -> Result<()> {
    let endpoint = create_test_endpoint().await?;
    let layer = DialogLayer::new(endpoint.inner.clone());
    let (state_sender, _state_receiver) = unbounded_channel();

    let invite = make_invite("layer-1@atlanta.com", "ft6", None);
    let key = TransactionKey::from_request(&invite, TransactionRole::Server)?;
    let tx = Transaction::new_server(key, invite, endpoint.inner.clone(), None, None);

    let dialog = layer.get_or_create_server_invite(
        &tx,
        state_sender,
        None,
        Some(Uri::parse("sip:bob@10.0.0.2:5060").unwrap()),
    )?;
    let id = dialog.id();
    assert!(!id.to_tag.is_empty());
    assert_eq!(layer.len(), 1);
    assert!(layer.get_dialog(&id).is_some());
    assert!(matches!(dialog.state(), DialogState::Calling(_)));

    layer.remove_dialog(&id);
    assert!(layer.is_empty());
    Ok(())
}

#[tokio::test]
async fn reinvite_resolves_existing_dialog() -> Result<()> {
    let endpoint = create_test_endpoint().await?;
    let layer = Arc::new(DialogLayer::new(endpoint.inner.clone()));
    let (state_sender, _state_receiver) = unbounded_channel();

    let invite = make_invite("layer-2@atlanta.com", "ft7", None);
    let key = TransactionKey::from_request(&invite, TransactionRole::Server)?;
    let tx = Transaction::new_server(key, invite, endpoint.inner.clone(), None, None);
    let dialog =
        layer.get_or_create_server_invite(&tx, state_sender.clone(), None, None)?;

    // The same dialog id with the established to-tag resolves instead of
    // creating a twin.
    let reinvite = make_invite("layer-2@atlanta.com", "ft7", Some(&dialog.id().to_tag));
    let key2 = TransactionKey::from_request(&reinvite, TransactionRole::Server)?;
    let tx2 = Transaction::new_server(key2, reinvite, endpoint.inner.clone(), None, None);
    let again = layer.get_or_create_server_invite(&tx2, state_sender, None, None)?;
    assert_eq!(dialog.id(), again.id());
    assert_eq!(layer.len(), 1);
    Ok(())
}
