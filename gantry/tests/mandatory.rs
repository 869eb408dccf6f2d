//! Unroutable destinations under the mandatory-delivery policy.
//!
//! Sending to an identity with no connected peer never touches the network,
//! so none of these tests needs a second socket.

use bytes::Bytes;
use gantry::{DealerSocket, GantryError, RouterSocket, SendFlags, SocketOption, SocketOptions};

fn to_nobody() -> Vec<Bytes> {
    vec![Bytes::from_static(b"nobody"), Bytes::from_static(b"hello")]
}

#[compio::test]
async fn test_unroutable_is_silent_without_mandatory() -> gantry::Result<()> {
    let router = RouterSocket::new();
    let errors = router.error_events()?;

    router.send(to_nobody()).await?;

    // Failures are delivered before the send is answered.
    assert!(errors.try_recv().is_err(), "no error may be raised");
    Ok(())
}

#[compio::test]
async fn test_mandatory_failure_goes_to_error_subscriber() -> gantry::Result<()> {
    let router = RouterSocket::with_options(SocketOptions::default().with_router_mandatory(true))?;
    let errors = router.error_events()?;

    // The subscriber takes the error, so the send itself succeeds.
    router.send(to_nobody()).await?;

    match errors.try_recv() {
        Ok(GantryError::HostUnreachable(id)) => assert_eq!(id.as_ref(), b"nobody"),
        other => panic!("expected HostUnreachable, got {other:?}"),
    }
    assert!(errors.try_recv().is_err(), "exactly one error per failed send");
    Ok(())
}

#[compio::test]
async fn test_mandatory_failure_raised_to_caller_without_subscriber() -> gantry::Result<()> {
    let router = RouterSocket::with_options(SocketOptions::default().with_router_mandatory(true))?;

    let err = router.send(to_nobody()).await.unwrap_err();
    assert!(matches!(err, GantryError::HostUnreachable(_)));
    assert!(err.is_unroutable());
    Ok(())
}

#[compio::test]
async fn test_dropped_subscriber_returns_errors_to_caller() -> gantry::Result<()> {
    let router = RouterSocket::with_options(SocketOptions::default().with_router_mandatory(true))?;
    let errors = router.error_events()?;
    drop(errors);

    let err = router.send(to_nobody()).await.unwrap_err();
    assert!(matches!(err, GantryError::HostUnreachable(_)));
    Ok(())
}

#[compio::test]
async fn test_mandatory_can_be_toggled_at_runtime() -> gantry::Result<()> {
    let router = RouterSocket::new();
    router.send(to_nobody()).await?;

    router.set_router_mandatory(true).await?;
    assert!(router.send(to_nobody()).await.is_err());

    router.set_option(SocketOption::Mandatory(false)).await?;
    router.send(to_nobody()).await?;
    Ok(())
}

#[compio::test]
async fn test_per_send_flag_overrides_socket_option() -> gantry::Result<()> {
    let router = RouterSocket::new();
    let flags = SendFlags::default().with_mandatory(true);

    let err = router.send_with(to_nobody(), flags).await.unwrap_err();
    assert!(matches!(err, GantryError::HostUnreachable(_)));
    Ok(())
}

#[compio::test]
async fn test_router_message_without_body_is_invalid() -> gantry::Result<()> {
    let router = RouterSocket::new();
    let err = router
        .send(vec![Bytes::from_static(b"only-identity")])
        .await
        .unwrap_err();
    assert!(matches!(err, GantryError::InvalidMessage(_)));
    Ok(())
}

#[compio::test]
async fn test_dealer_without_peers() -> gantry::Result<()> {
    let dealer = DealerSocket::new();
    dealer.send(vec![Bytes::from_static(b"dropped")]).await?;

    let dealer = DealerSocket::with_options(SocketOptions::default().with_router_mandatory(true))?;
    let err = dealer
        .send(vec![Bytes::from_static(b"nowhere")])
        .await
        .unwrap_err();
    assert!(matches!(err, GantryError::NoAvailablePeer));
    Ok(())
}

#[compio::test]
async fn test_invalid_routing_id_is_rejected() {
    let opts = SocketOptions::default().with_routing_id(Bytes::from_static(b"\x00reserved"));
    assert!(matches!(
        RouterSocket::with_options(opts),
        Err(GantryError::InvalidOption(_))
    ));
}
