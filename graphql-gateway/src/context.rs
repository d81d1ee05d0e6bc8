//! Per-operation execution contexts.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use http::request::Parts;

use crate::configuration::SessionConfig;
use crate::session::NoSessionResolver;
use crate::session::Session;
use crate::session::SessionResolver;

/// The context every resolver of one operation sees.
///
/// Built once per operation and never shared between operations.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    session: Option<Session>,
}

impl ExecutionContext {
    /// A context without a session.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            session: Some(session),
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

/// Builds an [`ExecutionContext`] from an incoming request.
///
/// Building a context never fails. When the session resolver errors, panics or exceeds its
/// timeout, the operation runs with an anonymous context and a warning is logged.
#[derive(Clone)]
pub struct ContextFactory {
    resolver: Arc<dyn SessionResolver>,
    timeout: Duration,
    log_sessions: bool,
}

impl ContextFactory {
    pub fn new(resolver: Arc<dyn SessionResolver>, configuration: &SessionConfig) -> Self {
        Self {
            resolver,
            timeout: configuration.timeout,
            log_sessions: configuration.log_sessions,
        }
    }

    /// A factory that builds anonymous contexts only.
    pub fn anonymous() -> Self {
        Self::new(Arc::new(NoSessionResolver), &SessionConfig::default())
    }

    pub async fn build_context(&self, request: &Parts) -> ExecutionContext {
        let resolution = AssertUnwindSafe(self.resolver.resolve(request)).catch_unwind();
        let session = match tokio::time::timeout(self.timeout, resolution).await {
            Ok(Ok(Ok(session))) => session,
            Ok(Ok(Err(error))) => {
                tracing::warn!(%error, "session resolution failed, continuing anonymously");
                None
            }
            Ok(Err(_)) => {
                tracing::warn!("session resolver panicked, continuing anonymously");
                None
            }
            Err(_) => {
                tracing::warn!(
                    timeout = ?self.timeout,
                    "session resolution timed out, continuing anonymously"
                );
                None
            }
        };

        if self.log_sessions {
            match &session {
                Some(session) => tracing::debug!(session = %session.value(), "resolved session"),
                None => tracing::debug!("no session"),
            }
        }
        tracing::trace!(authenticated = session.is_some(), "built execution context");

        ExecutionContext { session }
    }
}

impl fmt::Debug for ContextFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextFactory")
            .field("timeout", &self.timeout)
            .field("log_sessions", &self.log_sessions)
            .finish()
    }
}
