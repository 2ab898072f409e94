//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the domain core
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`RecordStore`] - Durable per-collection storage for pending records,
//!   the credential slot, the drain guard, dead letters, and drain reports
//! - [`SyncTransport`] - Batch submission of queued payloads to the remote
//!   system of record

pub mod record_store;
pub mod sync_transport;

pub use record_store::RecordStore;
pub use sync_transport::{BatchAck, RejectedRecord, SyncTransport};
