// crates/server/src/session.rs
//! Resolution of the calling principal.
//!
//! The registry only compares sessions; who the caller is comes from a
//! [`SessionResolver`] installed in [`AppState`].

use std::convert::Infallible;
use std::sync::Arc;

use async_report_jobs::Session;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::state::AppState;

/// Header carrying the caller's principal in the default resolver.
pub const SESSION_HEADER: &str = "x-session-id";

/// Maps an incoming request to the session that owns its jobs.
pub trait SessionResolver: Send + Sync + 'static {
    fn resolve(&self, parts: &Parts) -> Session;
}

/// Reads the principal from [`SESSION_HEADER`], falling back to the
/// anonymous session when absent or empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderSessionResolver;

impl SessionResolver for HeaderSessionResolver {
    fn resolve(&self, parts: &Parts) -> Session {
        parts
            .headers
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|principal| !principal.is_empty())
            .map(Session::new)
            .unwrap_or_else(Session::anonymous)
    }
}

/// Extractor yielding the caller's session.
#[derive(Debug, Clone)]
pub struct CallerSession(pub Session);

impl FromRequestParts<Arc<AppState>> for CallerSession {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        Ok(CallerSession(state.sessions.resolve(parts)))
    }
}
