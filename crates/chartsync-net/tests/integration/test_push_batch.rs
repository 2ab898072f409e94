//! Batch push happy paths: request shape and acknowledgment parsing

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chartsync_core::domain::Collection;
use chartsync_core::ports::SyncTransport;
use chartsync_net::client::HttpSyncTransport;

use crate::common::{mount_ack, patient, queued, setup_transport};

#[tokio::test]
async fn test_whole_queue_goes_out_as_one_request() {
    let (server, transport) = setup_transport().await;
    let records = vec![
        patient("p-1", "Ada"),
        patient("p-2", "Grace"),
        patient("p-3", "Edsger"),
    ];

    Mock::given(method("POST"))
        .and(path("/api/sync/patients"))
        .and(body_json(json!({
            "patients": [
                { "id": "p-1", "name": "Ada" },
                { "id": "p-2", "name": "Grace" },
                { "id": "p-3", "name": "Edsger" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accepted": ["p-1", "p-2", "p-3"],
            "rejected": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let ack = transport
        .push_batch(Collection::Patients, &records)
        .await
        .unwrap();

    assert_eq!(ack.accepted, vec!["p-1", "p-2", "p-3"]);
    assert!(ack.is_complete());
}

#[tokio::test]
async fn test_request_body_is_keyed_by_collection_name() {
    let (server, transport) = setup_transport().await;
    let records = vec![queued(Collection::LabResults, "lab-9")];

    Mock::given(method("POST"))
        .and(path("/api/sync/labResults"))
        .and(body_json(json!({ "labResults": [{ "id": "lab-9" }] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accepted": ["lab-9"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let ack = transport
        .push_batch(Collection::LabResults, &records)
        .await
        .unwrap();

    assert_eq!(ack.accepted, vec!["lab-9"]);
}

#[tokio::test]
async fn test_bearer_token_is_sent_when_configured() {
    let server = MockServer::start().await;
    let transport = HttpSyncTransport::new(server.uri())
        .unwrap()
        .with_bearer_token("session-token");

    Mock::given(method("POST"))
        .and(path("/api/sync/invoices"))
        .and(header("authorization", "Bearer session-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let records = vec![queued(Collection::Invoices, "inv-1")];
    let ack = transport
        .push_batch(Collection::Invoices, &records)
        .await
        .unwrap();

    assert_eq!(ack.accepted, vec!["inv-1"]);
}

#[tokio::test]
async fn test_trailing_slash_in_base_url_is_tolerated() {
    let (server, _) = setup_transport().await;
    let transport = HttpSyncTransport::new(format!("{}/", server.uri())).unwrap();

    mount_ack(&server, "/api/sync/patients", json!({ "accepted": ["p-1"] })).await;

    let records = vec![patient("p-1", "Ada")];
    let ack = transport
        .push_batch(Collection::Patients, &records)
        .await
        .unwrap();

    assert_eq!(ack.accepted, vec!["p-1"]);
}

#[tokio::test]
async fn test_empty_success_body_acknowledges_the_whole_batch() {
    let (server, transport) = setup_transport().await;

    Mock::given(method("POST"))
        .and(path("/api/sync/patients"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let records = vec![patient("p-1", "Ada"), patient("p-2", "Grace")];
    let ack = transport
        .push_batch(Collection::Patients, &records)
        .await
        .unwrap();

    assert_eq!(ack.accepted, vec!["p-1", "p-2"]);
    assert!(ack.is_complete());
}

#[tokio::test]
async fn test_non_acknowledgment_body_acknowledges_the_whole_batch() {
    let (server, transport) = setup_transport().await;

    Mock::given(method("POST"))
        .and(path("/api/sync/patients"))
        .respond_with(ResponseTemplate::new(200).set_body_string("synced, thanks"))
        .mount(&server)
        .await;

    let records = vec![patient("p-1", "Ada")];
    let ack = transport
        .push_batch(Collection::Patients, &records)
        .await
        .unwrap();

    assert_eq!(ack.accepted, vec!["p-1"]);
}

#[tokio::test]
async fn test_per_record_rejections_come_back_with_reasons() {
    let (server, transport) = setup_transport().await;

    mount_ack(
        &server,
        "/api/sync/patients",
        json!({
            "accepted": ["p-1"],
            "rejected": [{ "id": "p-2", "reason": "unknown practitioner" }]
        }),
    )
    .await;

    let records = vec![patient("p-1", "Ada"), patient("p-2", "Grace")];
    let ack = transport
        .push_batch(Collection::Patients, &records)
        .await
        .unwrap();

    assert_eq!(ack.accepted, vec!["p-1"]);
    assert!(!ack.is_complete());
    assert_eq!(ack.rejected.len(), 1);
    assert_eq!(ack.rejected[0].id, "p-2");
    assert_eq!(ack.rejected[0].reason, "unknown practitioner");
}
