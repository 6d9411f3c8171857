use crate::sip::{
    CSeq, Header, Headers, HostPort, Method, NameAddr, Request, Response, SipMessage, StatusCode,
    Transport, Uri, Via,
};
use crate::transaction::endpoint::{Endpoint, EndpointOption};
use crate::transaction::{EndpointBuilder, TimerSettings};
use crate::transport::channel::ChannelConnection;
use crate::transport::connection::{TransportReceiver, TransportSender};
use crate::transport::{udp::UdpConnection, SipAddr, SipConnection, TransportEvent, TransportLayer};
use crate::Result;
use std::time::Duration;
use tokio::sync::mpsc::unbounded_channel;
use tokio_util::sync::CancellationToken;

mod test_client;
mod test_endpoint;
mod test_transaction_states;

pub(super) async fn create_test_endpoint(addr: Option<&str>) -> Result<Endpoint> {
    let token = CancellationToken::new();
    let tl = TransportLayer::new(token.child_token());

    if let Some(addr) = addr {
        let peer = UdpConnection::create_connection(addr.parse()?, None).await?;
        tl.add_transport(peer.into());
    }

    let endpoint = EndpointBuilder::new()
        .user_agent("sipstack-test")
        .cancel_token(token)
        .transport_layer(tl)
        .build();
    Ok(endpoint)
}

/// Endpoint wired to an in-memory channel: `inject` plays the network
/// feeding messages in, `wire` observes everything the endpoint sends.
pub(super) struct ChannelHarness {
    pub endpoint: std::sync::Arc<Endpoint>,
    pub inject: TransportSender,
    pub wire: TransportReceiver,
    pub connection: SipConnection,
    pub peer_addr: SipAddr,
}

pub(super) async fn create_channel_endpoint(settings: TimerSettings) -> Result<ChannelHarness> {
    let (inject, inject_rx) = unbounded_channel();
    let (wire_tx, wire) = unbounded_channel();

    let local = SipAddr {
        r#type: Some(Transport::Udp),
        addr: HostPort::parse("127.0.0.1:15060")?,
    };
    let connection: SipConnection =
        ChannelConnection::create_connection(inject_rx, wire_tx, local.clone())
            .await?
            .into();

    let token = CancellationToken::new();
    let tl = TransportLayer::new(token.child_token());
    tl.add_transport(connection.clone());

    let endpoint = EndpointBuilder::new()
        .user_agent("sipstack-test")
        .cancel_token(token)
        .option(EndpointOption {
            timer_settings: settings,
            timer_interval: Duration::from_millis(5),
            ..EndpointOption::default()
        })
        .transport_layer(tl)
        .build();

    Ok(ChannelHarness {
        endpoint: std::sync::Arc::new(endpoint),
        inject,
        wire,
        connection,
        peer_addr: SipAddr {
            r#type: Some(Transport::Udp),
            addr: HostPort::parse("127.0.0.1:15061")?,
        },
    })
}

impl ChannelHarness {
    /// Feeds a message in as if it arrived from the peer.
    pub fn push(&self, msg: impl Into<SipMessage>) {
        self.inject
            .send(TransportEvent::Incoming(
                msg.into(),
                self.connection.clone(),
                self.peer_addr.clone(),
            ))
            .expect("inject");
    }

    /// Next message the endpoint put on the wire.
    pub async fn sent(&mut self, within: Duration) -> Option<SipMessage> {
        match tokio::time::timeout(within, self.wire.recv()).await {
            Ok(Some(TransportEvent::Incoming(msg, _, _))) => Some(msg),
            _ => None,
        }
    }
}

pub(super) fn fast_settings() -> TimerSettings {
    TimerSettings {
        t1: Duration::from_millis(30),
        t2: Duration::from_millis(120),
        t4: Duration::from_millis(120),
        t6: Duration::from_millis(900),
    }
}

pub(super) fn make_test_request(method: Method, target: &str, branch: &str) -> Request {
    let mut headers = Headers::new();
    headers.push(Header::Via(
        Via::parse(&format!(
            "SIP/2.0/UDP 127.0.0.1:15061;branch={}",
            branch
        ))
        .unwrap(),
    ));
    headers.push(Header::From(
        NameAddr::parse("Alice <sip:alice@127.0.0.1:15061>;tag=utest").unwrap(),
    ));
    headers.push(Header::To(
        NameAddr::parse(&format!("Bob <{}>", target)).unwrap(),
    ));
    headers.push(Header::CallId(format!("{}@127.0.0.1", branch)));
    headers.push(Header::CSeq(CSeq {
        seq: 1,
        method: method.clone(),
    }));
    headers.push(Header::MaxForwards(70));
    headers.push(Header::Contact(
        NameAddr::parse("<sip:alice@127.0.0.1:15061>").unwrap(),
    ));
    Request {
        method,
        uri: Uri::parse(target).unwrap(),
        version: Default::default(),
        headers,
        body: vec![],
    }
}

/// Minimal valid response to `req`, echoing the transaction identity.
pub(super) fn make_test_response(req: &Request, status: StatusCode, to_tag: Option<&str>) -> Response {
    let mut headers = Headers::new();
    headers.push(Header::Via(req.via().unwrap().clone()));
    headers.push(Header::From(req.from().unwrap().clone()));
    let mut to = req.to().unwrap().clone();
    if let Some(tag) = to_tag {
        to.set_tag(tag);
    }
    headers.push(Header::To(to));
    headers.push(Header::CallId(req.call_id().unwrap().to_string()));
    headers.push(Header::CSeq(req.cseq().unwrap().clone()));
    Response {
        status_code: status,
        reason_phrase: None,
        version: req.version,
        headers,
        body: vec![],
    }
}

#[cfg(test)]
mod unit {
    use crate::transaction::{make_via_branch, random_text};

    #[test]
    fn test_random_text() {
        let text = random_text(10);
        assert_eq!(text.len(), 10);
        let branch = make_via_branch();
        let branch = branch.to_string();
        // "branch=z9hG4bK" plus 12 random characters
        assert_eq!(branch.len(), 26);
        assert!(branch.starts_with("branch=z9hG4bK"));
    }

    #[test]
    fn branches_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(make_via_branch().to_string()));
        }
    }
}
