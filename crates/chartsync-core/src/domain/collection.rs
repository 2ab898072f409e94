//! Collections of the local store
//!
//! The store is partitioned into a fixed set of named collections. Three of
//! them hold queued mutations awaiting remote acknowledgment; the credential
//! collection is local-only and never crosses the network.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// A named partition of the local store holding one record kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collection {
    /// Patient record mutations
    #[serde(rename = "patients")]
    Patients,
    /// Lab result mutations
    #[serde(rename = "labResults")]
    LabResults,
    /// Invoice mutations
    #[serde(rename = "invoices")]
    Invoices,
    /// The singleton cached credential slot (local-only, never synced)
    #[serde(rename = "userCredentials")]
    UserCredentials,
}

impl Collection {
    /// All collections, in store layout order
    pub const ALL: [Collection; 4] = [
        Collection::Patients,
        Collection::LabResults,
        Collection::Invoices,
        Collection::UserCredentials,
    ];

    /// Collections with a remote sync endpoint, in drain order
    pub const SYNCED: [Collection; 3] = [
        Collection::Patients,
        Collection::LabResults,
        Collection::Invoices,
    ];

    /// Returns the wire/storage name of the collection
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Patients => "patients",
            Collection::LabResults => "labResults",
            Collection::Invoices => "invoices",
            Collection::UserCredentials => "userCredentials",
        }
    }

    /// Returns true if this collection drains to a remote endpoint
    pub fn is_synced(&self) -> bool {
        !matches!(self, Collection::UserCredentials)
    }

    /// Returns the remote sync endpoint path, if the collection has one
    ///
    /// The path is relative to the configured server URL, e.g.
    /// `/api/sync/patients`.
    pub fn endpoint_path(&self) -> Option<String> {
        if self.is_synced() {
            Some(format!("/api/sync/{}", self.as_str()))
        } else {
            None
        }
    }
}

impl Display for Collection {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Collection {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "patients" => Ok(Collection::Patients),
            "labResults" => Ok(Collection::LabResults),
            "invoices" => Ok(Collection::Invoices),
            "userCredentials" => Ok(Collection::UserCredentials),
            other => Err(DomainError::UnknownCollection(other.to_string())),
        }
    }
}
