//! Error types for the environment lifecycle.
//!
//! Defines the setup failure taxonomy with classification for retry behavior
//! inside readiness polls.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::environment::state_machine::{LifecycleEvent, LifecycleState};

/// Error type for environment operations
#[derive(Error, Debug)]
pub enum Error {
    /// A resource with the requested name already exists
    #[error("{kind} {name} already exists")]
    DuplicateResource { kind: &'static str, name: String },

    /// Neither the kubeconfig file nor the in-cluster environment produced credentials
    #[error("cluster credentials not found (kubeconfig {path}): {reason}")]
    CredentialsNotFound { path: String, reason: String },

    /// A bounded poll did not observe its condition in time
    #[error("timed out after {timeout:?} waiting for {what}")]
    ReadinessTimeout { what: String, timeout: Duration },

    /// Expected log phrase was never observed
    #[error("pod {pod} never logged {phrase:?} within {timeout:?}")]
    DependencyNotReady {
        pod: String,
        phrase: &'static str,
        timeout: Duration,
    },

    /// Bootstrap initialization call returned an unexpected body
    #[error("timing service initialization returned {response:?}, expected {{}}")]
    Initialization { response: String },

    /// Invalid or missing configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Compute pool or task queue API returned a failure
    #[error("cloud API error: {0}")]
    Cloud(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Local socket error (port-forward listener)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Lifecycle event not allowed from the current state
    #[error("invalid lifecycle transition: {event} from {from}")]
    InvalidTransition {
        from: LifecycleState,
        event: LifecycleEvent,
    },
}

impl Error {
    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a cloud API error with the given message
    pub fn cloud(msg: impl Into<String>) -> Self {
        Self::Cloud(msg.into())
    }

    /// Check if a poll should keep going after this error
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => {
                // Retry on network errors, rate limiting, and server errors
                matches!(
                    e,
                    kube::Error::Api(api_err) if api_err.code >= 500 || api_err.code == 429
                ) || matches!(e, kube::Error::Service(_) | kube::Error::HyperError(_))
            }
            Error::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| s.is_server_error() || s.as_u16() == 429)
            }
            Error::DuplicateResource { .. }
            | Error::CredentialsNotFound { .. }
            | Error::ReadinessTimeout { .. }
            | Error::DependencyNotReady { .. }
            | Error::Initialization { .. }
            | Error::Config(_)
            | Error::Cloud(_)
            | Error::Serialization(_)
            | Error::Io(_)
            | Error::InvalidTransition { .. } => false,
        }
    }
}

/// Result type alias for environment operations
pub type Result<T> = std::result::Result<T, Error>;

/// A setup error together with the lifecycle phase it happened in.
#[derive(Debug)]
pub struct PhaseFailure {
    pub phase: LifecycleState,
    pub error: Error,
}

impl PhaseFailure {
    pub fn new(phase: LifecycleState, error: Error) -> Self {
        Self { phase, error }
    }
}

impl fmt::Display for PhaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "setup failed in phase {}: {}", self.phase, self.error)
    }
}

impl std::error::Error for PhaseFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
