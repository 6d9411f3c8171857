//! Endpoint-to-endpoint exchanges over loopback UDP.

use super::*;
use crate::sip::Method;
use std::sync::Arc;

async fn udp_endpoint() -> Result<(Arc<Endpoint>, SipAddr)> {
    let endpoint = Arc::new(create_test_endpoint(Some("127.0.0.1:0")).await?);
    let addr = endpoint
        .inner
        .transport_layer
        .first_addr(None)
        .expect("bound addr");
    Ok((endpoint, addr))
}

#[tokio::test]
async fn options_round_trip_between_endpoints() -> Result<()> {
    let (client, _) = udp_endpoint().await?;
    let (server, server_addr) = udp_endpoint().await?;

    let mut server_incoming = server.incoming_transactions();
    {
        let server = server.clone();
        tokio::spawn(async move { server.serve().await });
    }
    {
        let client = client.clone();
        tokio::spawn(async move { client.serve().await });
    }

    // Answer the first inbound transaction with 200.
    tokio::spawn(async move {
        if let Some(mut tx) = server_incoming.recv().await {
            tx.reply(StatusCode::OK).await.ok();
        }
    });

    let target = format!("sip:bob@{}", server_addr.addr);
    let mut request = make_test_request(Method::Options, &target, "z9hG4bKe2e1");
    // The Via must name the real local binding so the response routes
    // back here.
    *request.via_mut()? = client.inner.get_via(None, None)?;

    let mut tx = client.client_transaction(request)?;
    tx.send().await?;

    let msg = tokio::time::timeout(Duration::from_secs(2), tx.receive())
        .await
        .expect("response within timeout");
    match msg {
        Some(SipMessage::Response(resp)) => assert_eq!(resp.status_code, StatusCode::OK),
        other => panic!("expected 200, got {:?}", other.is_some()),
    }
    Ok(())
}

#[tokio::test]
async fn max_forwards_zero_is_rejected_statelessly() -> Result<()> {
    let (client, _) = udp_endpoint().await?;
    let (server, server_addr) = udp_endpoint().await?;

    // No consumer attached on the server on purpose: the endpoint must
    // answer 483 before any transaction exists.
    {
        let server = server.clone();
        tokio::spawn(async move { server.serve().await });
    }
    {
        let client = client.clone();
        tokio::spawn(async move { client.serve().await });
    }

    let target = format!("sip:bob@{}", server_addr.addr);
    let mut request = make_test_request(Method::Options, &target, "z9hG4bKhops0");
    *request.via_mut()? = client.inner.get_via(None, None)?;
    request.headers.unique_push(Header::MaxForwards(0));

    let mut tx = client.client_transaction(request)?;
    tx.send().await?;

    let msg = tokio::time::timeout(Duration::from_secs(2), tx.receive())
        .await
        .expect("response within timeout");
    match msg {
        Some(SipMessage::Response(resp)) => {
            assert_eq!(resp.status_code, StatusCode::TOO_MANY_HOPS)
        }
        other => panic!("expected 483, got {:?}", other.is_some()),
    }
    Ok(())
}

#[tokio::test]
async fn unknown_scheme_yields_416() -> Result<()> {
    let (client, _) = udp_endpoint().await?;
    let (server, server_addr) = udp_endpoint().await?;

    {
        let server = server.clone();
        tokio::spawn(async move { server.serve().await });
    }
    {
        let client = client.clone();
        tokio::spawn(async move { client.serve().await });
    }

    let target = format!("sip:bob@{}", server_addr.addr);
    let mut request = make_test_request(Method::Options, &target, "z9hG4bKscheme1");
    *request.via_mut()? = client.inner.get_via(None, None)?;
    // Rewrite the request-URI scheme to something unsupported while
    // keeping the routable host.
    request.uri.scheme = crate::sip::Scheme::Other("mailto".to_string());

    let mut tx = client.client_transaction(request)?;
    tx.send().await?;

    let msg = tokio::time::timeout(Duration::from_secs(2), tx.receive())
        .await
        .expect("response within timeout");
    match msg {
        Some(SipMessage::Response(resp)) => {
            assert_eq!(resp.status_code, StatusCode::UNSUPPORTED_URI_SCHEME)
        }
        other => panic!("expected 416, got {:?}", other.is_some()),
    }
    Ok(())
}

#[tokio::test]
async fn oversized_udp_request_is_refused() -> Result<()> {
    let (client, _) = udp_endpoint().await?;
    let (_server, server_addr) = udp_endpoint().await?;

    let target = format!("sip:bob@{}", server_addr.addr);
    let mut request = make_test_request(Method::Invite, &target, "z9hG4bKbig1");
    *request.via_mut()? = client.inner.get_via(None, None)?;
    request.body = vec![b'x'; 2000];

    let mut tx = client.client_transaction(request)?;
    match tx.send().await {
        Err(crate::Error::CongestionRequiresReliable(len)) => assert!(len > 2000),
        other => panic!("expected congestion error, got {:?}", other.is_ok()),
    }
    Ok(())
}
