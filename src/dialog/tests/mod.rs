use crate::sip::{
    CSeq, Header, Headers, Method, NameAddr, Request, Uri, Via,
};
use crate::transaction::endpoint::Endpoint;
use crate::transaction::EndpointBuilder;
use crate::transport::{udp::UdpConnection, TransportLayer};
use crate::Result;
use tokio_util::sync::CancellationToken;

mod test_authenticate;
mod test_dialog_layer;
mod test_dialog_states;

pub(super) async fn create_test_endpoint() -> Result<Endpoint> {
    let token = CancellationToken::new();
    let tl = TransportLayer::new(token.child_token());
    let conn = UdpConnection::create_connection("127.0.0.1:0".parse()?, None).await?;
    tl.add_transport(conn.into());

    Ok(EndpointBuilder::new()
        .user_agent("sipstack-test")
        .cancel_token(token)
        .transport_layer(tl)
        .build())
}

pub(super) fn make_invite(call_id: &str, from_tag: &str, to_tag: Option<&str>) -> Request {
    let mut headers = Headers::new();
    headers.push(Header::Via(
        Via::parse("SIP/2.0/UDP caller.example.com:5060;branch=z9hG4bKdlgtest").unwrap(),
    ));
    let from = NameAddr::parse("Alice <sip:alice@atlanta.com>")
        .unwrap()
        .with_tag(from_tag);
    headers.push(Header::From(from));
    let mut to = NameAddr::parse("Bob <sip:bob@biloxi.com>").unwrap();
    if let Some(tag) = to_tag {
        to.set_tag(tag);
    }
    headers.push(Header::To(to));
    headers.push(Header::CallId(call_id.to_string()));
    headers.push(Header::CSeq(CSeq {
        seq: 314159,
        method: Method::Invite,
    }));
    headers.push(Header::MaxForwards(70));
    headers.push(Header::Contact(
        NameAddr::parse("<sip:alice@caller.example.com:5060>").unwrap(),
    ));
    Request {
        method: Method::Invite,
        uri: Uri::parse("sip:bob@biloxi.com").unwrap(),
        version: Default::default(),
        headers,
        body: b"v=0\r\n".to_vec(),
    }
}
