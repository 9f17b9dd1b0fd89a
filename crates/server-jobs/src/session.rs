// crates/server-jobs/src/session.rs
//! Caller security context.

use std::fmt;
use std::sync::Arc;

/// The principal on whose behalf a job was submitted.
///
/// Every registry operation takes the caller's session; a job is only
/// visible to the session that submitted it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Session {
    principal: Arc<str>,
}

impl Session {
    pub const ANONYMOUS: &'static str = "anonymous";

    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: Arc::from(principal.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self::new(Self::ANONYMOUS)
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.principal)
    }
}
