//! Integration tests for chartsync-net
//!
//! Uses wiremock to simulate the remote sync endpoint and verifies the
//! batch push protocol end to end: request shape, acknowledgment parsing,
//! and classification of rejections, server errors, and network failures.

mod common;

mod test_push_batch;
mod test_failure_modes;
