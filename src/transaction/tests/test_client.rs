use super::*;
use crate::transaction::TransactionState;

#[tokio::test]
async fn invite_client_retransmits_until_answered() -> Result<()> {
    let mut harness = create_channel_endpoint(fast_settings()).await?;
    let endpoint = harness.endpoint.clone();
    let serve_endpoint = endpoint.clone();
    tokio::spawn(async move { serve_endpoint.serve().await });

    let request = make_test_request(
        Method::Invite,
        "sip:bob@127.0.0.1:15060",
        "z9hG4bKretrans1",
    );
    let mut tx = endpoint.client_transaction(request.clone())?;
    tx.send().await?;
    assert_eq!(tx.state, TransactionState::Calling);

    // Initial send plus at least two timer A retransmissions (30/60ms).
    for _ in 0..3 {
        let sent = harness.sent(Duration::from_millis(400)).await;
        match sent {
            Some(SipMessage::Request(sent)) => assert_eq!(sent.method, Method::Invite),
            other => panic!("expected retransmitted INVITE, got {:?}", other.is_some()),
        }
    }

    // A provisional stops retransmission.
    harness.push(make_test_response(
        &request,
        StatusCode::RINGING,
        Some("totag1"),
    ));
    let msg = tokio::time::timeout(Duration::from_millis(500), tx.receive())
        .await
        .expect("response before timeout");
    match msg {
        Some(SipMessage::Response(resp)) => assert_eq!(resp.status_code, StatusCode::RINGING),
        other => panic!("expected 180, got {:?}", other.is_some()),
    }
    assert_eq!(tx.state, TransactionState::Proceeding);

    // 2xx terminates the INVITE client transaction immediately.
    harness.push(make_test_response(&request, StatusCode::OK, Some("totag1")));
    let msg = tokio::time::timeout(Duration::from_millis(500), tx.receive())
        .await
        .expect("final before timeout");
    match msg {
        Some(SipMessage::Response(resp)) => assert_eq!(resp.status_code, StatusCode::OK),
        other => panic!("expected 200, got {:?}", other.is_some()),
    }
    assert_eq!(tx.state, TransactionState::Terminated);
    Ok(())
}

#[tokio::test]
async fn retransmission_disable_flag_suppresses_timer_a() -> Result<()> {
    let mut harness = create_channel_endpoint(fast_settings()).await?;
    let endpoint = harness.endpoint.clone();
    let serve_endpoint = endpoint.clone();
    tokio::spawn(async move { serve_endpoint.serve().await });

    let request = make_test_request(
        Method::Invite,
        "sip:bob@127.0.0.1:15060",
        "z9hG4bKnoretrans",
    );
    let mut tx = endpoint.client_transaction(request)?;
    tx.retransmission_disabled = true;
    tx.send().await?;

    // The original send arrives, then the wire stays quiet well past
    // several T1 intervals.
    assert!(harness.sent(Duration::from_millis(100)).await.is_some());
    assert!(harness.sent(Duration::from_millis(200)).await.is_none());
    Ok(())
}

#[tokio::test]
async fn non_invite_client_times_out_with_408() -> Result<()> {
    let mut settings = fast_settings();
    settings.t6 = Duration::from_millis(200);
    let mut harness = create_channel_endpoint(settings).await?;
    let endpoint = harness.endpoint.clone();
    let serve_endpoint = endpoint.clone();
    tokio::spawn(async move { serve_endpoint.serve().await });

    let request = make_test_request(
        Method::Options,
        "sip:bob@127.0.0.1:15060",
        "z9hG4bKtimeout1",
    );
    let mut tx = endpoint.client_transaction(request)?;
    tx.send().await?;
    assert_eq!(tx.state, TransactionState::Trying);

    // Nothing answers: timer F delivers a synthetic 408.
    let msg = tokio::time::timeout(Duration::from_secs(2), tx.receive())
        .await
        .expect("timeout response");
    match msg {
        Some(SipMessage::Response(resp)) => {
            assert_eq!(resp.status_code, StatusCode::REQUEST_TIMEOUT)
        }
        other => panic!("expected 408, got {:?}", other.is_some()),
    }
    Ok(())
}

#[tokio::test]
async fn non_invite_client_completes_on_final() -> Result<()> {
    let mut harness = create_channel_endpoint(fast_settings()).await?;
    let endpoint = harness.endpoint.clone();
    let serve_endpoint = endpoint.clone();
    tokio::spawn(async move { serve_endpoint.serve().await });

    let request = make_test_request(
        Method::Register,
        "sip:registrar@127.0.0.1:15060",
        "z9hG4bKreg2",
    );
    let mut tx = endpoint.client_transaction(request.clone())?;
    tx.send().await?;

    harness.push(make_test_response(&request, StatusCode::OK, None));
    let msg = tokio::time::timeout(Duration::from_millis(500), tx.receive())
        .await
        .expect("response");
    match msg {
        Some(SipMessage::Response(resp)) => assert_eq!(resp.status_code, StatusCode::OK),
        other => panic!("expected 200, got {:?}", other.is_some()),
    }
    assert_eq!(tx.state, TransactionState::Completed);
    Ok(())
}
