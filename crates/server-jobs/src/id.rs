// crates/server-jobs/src/id.rs
//! Job identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Opaque 128-bit identifier of a job. The only key into the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Rejected external job identifier.
///
/// Kept distinct from "well-formed but unknown" (`RegistryError::NotFound`);
/// the HTTP layer decides whether to conflate them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobIdError {
    #[error("job id is empty")]
    Empty,

    #[error("malformed job id: {0:?}")]
    Malformed(String),
}

impl FromStr for JobId {
    type Err = JobIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(JobIdError::Empty);
        }
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| JobIdError::Malformed(s.to_string()))
    }
}
