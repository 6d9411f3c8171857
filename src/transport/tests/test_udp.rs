use crate::sip::{Method, SipMessage};
use crate::transport::{udp::UdpConnection, SipAddr, TransportEvent};
use crate::Result;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::unbounded_channel;

const OPTIONS: &str = "OPTIONS sip:bob@example.com SIP/2.0\r\n\
    Via: SIP/2.0/UDP 127.0.0.1:9999;branch=z9hG4bKudptest;rport\r\n\
    From: <sip:alice@example.com>;tag=u1\r\n\
    To: <sip:bob@example.com>\r\n\
    Call-ID: udp-test-1\r\n\
    CSeq: 1 OPTIONS\r\n\
    Content-Length: 0\r\n\r\n";

#[tokio::test]
async fn receives_and_parses_datagram() -> Result<()> {
    let conn = UdpConnection::create_connection("127.0.0.1:0".parse()?, None).await?;
    let local = conn.get_addr().get_socketaddr()?;

    let (sender, mut receiver) = unbounded_channel();
    let serve_conn = conn.clone();
    tokio::spawn(async move { serve_conn.serve_loop(sender).await });

    let sock = UdpSocket::bind("127.0.0.1:0").await?;
    sock.send_to(OPTIONS.as_bytes(), local).await?;
    let source_port = sock.local_addr()?.port();

    let event = tokio::time::timeout(std::time::Duration::from_secs(2), receiver.recv())
        .await
        .expect("datagram within timeout")
        .expect("event");
    match event {
        TransportEvent::Incoming(SipMessage::Request(req), _, source) => {
            assert_eq!(req.method, Method::Options);
            // Via sent-by lies about the port; received/rport stamped
            // from the actual source.
            let via = req.via()?;
            assert_eq!(via.rport(), Some(Some(source_port)));
            assert_eq!(source.get_socketaddr()?.port(), source_port);
        }
        _ => panic!("expected incoming request"),
    }
    Ok(())
}

#[tokio::test]
async fn malformed_datagrams_are_dropped() -> Result<()> {
    let conn = UdpConnection::create_connection("127.0.0.1:0".parse()?, None).await?;
    let local = conn.get_addr().get_socketaddr()?;

    let (sender, mut receiver) = unbounded_channel();
    let serve_conn = conn.clone();
    tokio::spawn(async move { serve_conn.serve_loop(sender).await });

    let sock = UdpSocket::bind("127.0.0.1:0").await?;
    sock.send_to(b"this is not sip\r\n\r\n", local).await?;
    sock.send_to(OPTIONS.as_bytes(), local).await?;

    // Only the valid message surfaces.
    let event = tokio::time::timeout(std::time::Duration::from_secs(2), receiver.recv())
        .await
        .expect("event within timeout")
        .expect("event");
    assert!(matches!(
        event,
        TransportEvent::Incoming(SipMessage::Request(_), _, _)
    ));
    assert!(receiver.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn sends_to_explicit_destination() -> Result<()> {
    let conn = UdpConnection::create_connection("127.0.0.1:0".parse()?, None).await?;
    let peer = UdpSocket::bind("127.0.0.1:0").await?;

    let msg = SipMessage::try_from(OPTIONS).unwrap();
    let destination = SipAddr::from(peer.local_addr()?);
    conn.send(msg, Some(&destination)).await?;

    let mut buf = vec![0u8; 2048];
    let (len, _) = tokio::time::timeout(std::time::Duration::from_secs(2), peer.recv_from(&mut buf))
        .await
        .expect("datagram within timeout")?;
    let text = std::str::from_utf8(&buf[..len]).unwrap();
    assert!(text.starts_with("OPTIONS sip:bob@example.com SIP/2.0\r\n"));
    Ok(())
}

#[tokio::test]
async fn keepalive_request_gets_crlf_reply() -> Result<()> {
    let conn = UdpConnection::create_connection("127.0.0.1:0".parse()?, None).await?;
    let local = conn.get_addr().get_socketaddr()?;

    let (sender, _receiver) = unbounded_channel();
    let serve_conn = conn.clone();
    tokio::spawn(async move { serve_conn.serve_loop(sender).await });

    let sock = UdpSocket::bind("127.0.0.1:0").await?;
    sock.send_to(b"\r\n\r\n", local).await?;

    let mut buf = [0u8; 16];
    let (len, _) = tokio::time::timeout(std::time::Duration::from_secs(2), sock.recv_from(&mut buf))
        .await
        .expect("keepalive reply")?;
    assert_eq!(&buf[..len], b"\r\n");
    Ok(())
}
