use crate::sip::{Transport, Via};
use crate::transport::SipConnection;
use std::net::SocketAddr;

fn via(text: &str) -> Via {
    Via::parse(text).unwrap()
}

#[test]
fn stamps_received_and_rport_when_source_differs() {
    let mut v = via("SIP/2.0/UDP 10.0.0.5:5060;branch=z9hG4bKabc");
    let source: SocketAddr = "203.0.113.20:31337".parse().unwrap();
    SipConnection::build_via_received(&mut v, source, Transport::Udp);
    assert_eq!(v.received(), Some("203.0.113.20"));
    assert_eq!(v.rport(), Some(Some(31337)));
}

#[test]
fn leaves_matching_sent_by_alone() {
    let mut v = via("SIP/2.0/UDP 10.0.0.5:5060;branch=z9hG4bKabc");
    let source: SocketAddr = "10.0.0.5:5060".parse().unwrap();
    SipConnection::build_via_received(&mut v, source, Transport::Udp);
    assert_eq!(v.received(), None);
}

#[test]
fn honors_rport_request_even_when_matching() {
    // RFC 3581: an empty rport always gets the source port echoed.
    let mut v = via("SIP/2.0/UDP 10.0.0.5:5060;branch=z9hG4bKabc;rport");
    let source: SocketAddr = "10.0.0.5:5060".parse().unwrap();
    SipConnection::build_via_received(&mut v, source, Transport::Udp);
    assert_eq!(v.rport(), Some(Some(5060)));
}

#[test]
fn tcp_only_stamps_on_host_mismatch() {
    // Same host, different port: connection-oriented transports do not
    // add received.
    let mut v = via("SIP/2.0/TCP 10.0.0.5:5060;branch=z9hG4bKabc;rport");
    let source: SocketAddr = "10.0.0.5:49152".parse().unwrap();
    SipConnection::build_via_received(&mut v, source, Transport::Tcp);
    assert_eq!(v.received(), None);
    assert_eq!(v.rport(), Some(Some(49152)));
}

#[test]
fn response_destination_prefers_received_and_rport() {
    let v = via("SIP/2.0/UDP host.example.com;branch=z9hG4bKabc;received=192.0.2.9;rport=1024");
    let (transport, target) = SipConnection::parse_target_from_via(&v);
    assert_eq!(transport, Transport::Udp);
    assert_eq!(target.to_string(), "192.0.2.9:1024");
}
