//! ChartSync core - domain types and ports for the offline-first sync engine
//!
//! This crate is the hexagon's center: it defines the domain model for the
//! locally queued mutation log of a clinical-records application, along with
//! the ports that adapters (SQLite store, HTTP transport, D-Bus agent)
//! implement.
//!
//! # Architecture
//!
//! - [`domain`] - Entities and value types: collections, pending records,
//!   cached credentials, drain reports, connectivity state, error taxonomies
//! - [`ports`] - Interfaces to the outside world: the record store and the
//!   remote sync transport
//! - [`config`] - Typed YAML configuration with validation and a builder
//!
//! No I/O happens here; everything observable lives behind a port.

pub mod config;
pub mod domain;
pub mod ports;
