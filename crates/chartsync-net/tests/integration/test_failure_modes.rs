//! Failure classification: rejections, server errors, unreachable remotes

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chartsync_core::domain::{Collection, SyncFailure};
use chartsync_core::ports::SyncTransport;
use chartsync_net::client::HttpSyncTransport;

use crate::common::{patient, queued, setup_transport};

#[tokio::test]
async fn test_client_error_is_a_permanent_rejection() {
    let (server, transport) = setup_transport().await;

    Mock::given(method("POST"))
        .and(path("/api/sync/patients"))
        .respond_with(
            ResponseTemplate::new(422).set_body_string("validation failed: dob out of range"),
        )
        .mount(&server)
        .await;

    let records = vec![patient("p-1", "Ada")];
    let err = transport
        .push_batch(Collection::Patients, &records)
        .await
        .unwrap_err();

    match err {
        SyncFailure::RemoteRejected { status, reason } => {
            assert_eq!(status, 422);
            assert_eq!(reason, "validation failed: dob out of range");
        }
        other => panic!("expected RemoteRejected, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rejection_reason_keeps_only_the_first_line() {
    let (server, transport) = setup_transport().await;

    Mock::given(method("POST"))
        .and(path("/api/sync/invoices"))
        .respond_with(
            ResponseTemplate::new(400).set_body_string("bad request\n  at handler.js:14\n"),
        )
        .mount(&server)
        .await;

    let records = vec![queued(Collection::Invoices, "inv-1")];
    let err = transport
        .push_batch(Collection::Invoices, &records)
        .await
        .unwrap_err();

    match err {
        SyncFailure::RemoteRejected { ref reason, .. } => assert_eq!(reason, "bad request"),
        other => panic!("expected RemoteRejected, got {other:?}"),
    }
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_server_error_is_retryable() {
    let (server, transport) = setup_transport().await;

    Mock::given(method("POST"))
        .and(path("/api/sync/patients"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let records = vec![patient("p-1", "Ada")];
    let err = transport
        .push_batch(Collection::Patients, &records)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncFailure::RemoteServerError { status: 500 }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_unreachable_server_is_a_network_failure() {
    // Let the mock server pick a free port, then release it before pushing.
    // `MockServer::start()` hands out pooled servers whose listener outlives
    // the handle, so the port would keep answering 404; a builder-started
    // server is exclusive and actually closes its port on drop.
    let server = MockServer::builder().start().await;
    let uri = server.uri();
    drop(server);

    let transport = HttpSyncTransport::new(uri).unwrap();
    let records = vec![patient("p-1", "Ada")];
    let err = transport
        .push_batch(Collection::Patients, &records)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncFailure::NetworkUnavailable(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_local_only_collection_never_reaches_the_wire() {
    let (server, transport) = setup_transport().await;

    // No mock mounted; a request would come back as an HTTP error instead.
    let records = vec![];
    let err = transport
        .push_batch(Collection::UserCredentials, &records)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SyncFailure::NotSyncable(Collection::UserCredentials)
    ));
    assert!(!err.is_retryable());
    assert_eq!(server.received_requests().await.unwrap().len(), 0);
}
