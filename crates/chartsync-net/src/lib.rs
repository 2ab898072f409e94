//! ChartSync Net - sync endpoint transport and connectivity monitoring
//!
//! Provides the network-facing adapters for the sync engine:
//! - Batch push of pending records to the remote sync endpoint
//! - Classification of transport outcomes into retryable and terminal failures
//! - Connectivity state tracking fed by NetworkManager over D-Bus
//!
//! ## Modules
//!
//! - [`client`] - HTTP transport implementing the batch sync protocol
//! - [`connectivity`] - Shared online/offline state with change notifications
//!
//! Failure taxonomy lives in `chartsync_core::domain::SyncFailure` so the
//! engine can decide retry policy without knowing transport internals.

pub mod client;
pub mod connectivity;

pub use client::HttpSyncTransport;
pub use connectivity::{ConnectivityMonitor, NetworkManagerLink};
