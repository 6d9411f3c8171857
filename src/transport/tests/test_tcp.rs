use crate::sip::{HostPort, Method, SipMessage, Transport};
use crate::transport::stream::StreamConnection;
use crate::transport::tcp::TcpConnection;
use crate::transport::{SipAddr, TransportEvent};
use crate::Result;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc::unbounded_channel;

const MESSAGE: &str = "MESSAGE sip:bob@example.com SIP/2.0\r\n\
    Via: SIP/2.0/TCP 127.0.0.1:5062;branch=z9hG4bKtcptest\r\n\
    From: <sip:alice@example.com>;tag=t1\r\n\
    To: <sip:bob@example.com>\r\n\
    Call-ID: tcp-test-1\r\n\
    CSeq: 1 MESSAGE\r\n\
    Content-Type: text/plain\r\n\
    Content-Length: 5\r\n\r\nhello";

#[tokio::test]
async fn client_connection_sends_and_receives() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let listen_addr = listener.local_addr()?;

    // Peer: accept one connection, read the frame, answer with the same
    // bytes split across two writes to exercise re-framing.
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        use tokio::io::AsyncReadExt;
        let mut collected = Vec::new();
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            collected.extend_from_slice(&buf[..n]);
            if collected.windows(4).any(|w| w == b"\r\n\r\n") && collected.ends_with(b"hello") {
                break;
            }
        }
        let reply = MESSAGE.as_bytes();
        let (first, second) = reply.split_at(reply.len() / 2);
        stream.write_all(first).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        stream.write_all(second).await.unwrap();
        stream.flush().await.unwrap();
    });

    let remote = SipAddr {
        r#type: Some(Transport::Tcp),
        addr: listen_addr.into(),
    };
    let conn = TcpConnection::connect(&remote, None).await?;

    let (sender, mut receiver) = unbounded_channel();
    let serve_conn = conn.clone();
    tokio::spawn(async move { serve_conn.serve_loop(sender).await });

    conn.send_message(SipMessage::try_from(MESSAGE).unwrap())
        .await?;

    let event = tokio::time::timeout(std::time::Duration::from_secs(2), receiver.recv())
        .await
        .expect("framed message within timeout")
        .expect("event");
    match event {
        TransportEvent::Incoming(SipMessage::Request(req), _, _) => {
            assert_eq!(req.method, Method::Message);
            assert_eq!(req.body, b"hello".to_vec());
        }
        _ => panic!("expected incoming request"),
    }
    Ok(())
}

#[tokio::test]
async fn connect_to_domain_addr_fails_cleanly() -> Result<()> {
    let remote = SipAddr {
        r#type: Some(Transport::Tcp),
        addr: HostPort::parse("name.invalid:5060")?,
    };
    assert!(TcpConnection::connect(&remote, None).await.is_err());
    Ok(())
}
