//! Shared test helpers for sync transport integration tests
//!
//! Provides wiremock-based mock server setup for the remote sync endpoints.
//! Helpers mount acknowledgment responses and build queued records with
//! deterministic payloads.

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chartsync_core::domain::{Collection, PendingRecord};
use chartsync_net::client::HttpSyncTransport;

/// Starts a mock sync server and returns it with a transport pointed at it.
pub async fn setup_transport() -> (MockServer, HttpSyncTransport) {
    let server = MockServer::start().await;
    let transport =
        HttpSyncTransport::new(server.uri()).expect("transport construction should not fail");
    (server, transport)
}

/// Builds a queued patient record with a recognizable payload.
pub fn patient(id: &str, name: &str) -> PendingRecord {
    PendingRecord::new(
        Collection::Patients,
        id,
        json!({ "id": id, "name": name }),
    )
    .expect("valid patient record")
}

/// Builds a queued record for an arbitrary synced collection.
pub fn queued(collection: Collection, id: &str) -> PendingRecord {
    PendingRecord::new(collection, id, json!({ "id": id })).expect("valid queued record")
}

/// Mounts a 200 response with the given acknowledgment body on a sync path.
pub async fn mount_ack(server: &MockServer, endpoint: &str, ack: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path(endpoint))
        .respond_with(ResponseTemplate::new(200).set_body_json(ack))
        .mount(server)
        .await;
}
