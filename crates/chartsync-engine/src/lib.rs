//! ChartSync Engine - queue drain engine
//!
//! Provides:
//! - Batch drain of pending records to the remote system of record
//! - Retry with exponential backoff for transient failures
//! - Dead-lettering of records the remote rejects
//! - Single-flight coordination across execution contexts
//!
//! ## Modules
//!
//! - [`engine`] - Drain coordinator orchestrating the queue-to-remote push
//! - [`scheduler`] - Turns connectivity edges and elapsed time into drain triggers

pub mod engine;
pub mod scheduler;

pub use engine::{DrainCoordinator, DrainSummary};
pub use scheduler::DrainScheduler;
