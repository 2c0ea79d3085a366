//! Error handling for scenario orchestration
//!
//! Three kinds of failure matter to callers: precondition errors (the proxy
//! set cannot support the scenario), proxy-call errors (the control plane
//! rejected or failed a request) and cancellation. Cancellation is a distinct
//! variant so the orchestrator never reports a user-initiated stop as a
//! scenario failure.

use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised by a proxy collaborator
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProxyError {
    /// Transport-level failure talking to the control plane
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The control plane answered with a non-success status
    #[error("control plane returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, as returned by the server
        body: String,
    },

    /// The control plane never became reachable
    #[error("toxiproxy not ready after {waited:?}")]
    NotReady {
        /// How long we waited before giving up
        waited: Duration,
    },

    /// Waiting on the control plane was cancelled
    #[error("cancelled while waiting for the control plane")]
    Cancelled,

    /// The operation was refused (used by in-memory proxies)
    #[error("{0}")]
    Rejected(String),
}

/// Main error type for the library
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ScenarioError {
    /// No scenario registered under this name
    #[error("Scenario not found: {0}")]
    NotFound(String),

    /// The proxy set is too small for the scenario
    #[error("Scenario '{scenario}' needs at least {required} proxies, got {actual}")]
    Precondition {
        /// Scenario that refused to run
        scenario: String,
        /// Minimum number of proxies
        required: usize,
        /// Number of proxies supplied
        actual: usize,
    },

    /// A call against one proxy failed
    #[error("Failed to {operation} on proxy '{proxy}': {source}")]
    Proxy {
        /// Name of the proxy the call targeted
        proxy: String,
        /// Short description of the call, e.g. "add toxic"
        operation: String,
        /// Underlying proxy error
        #[source]
        source: ProxyError,
    },

    /// The run was cancelled before it finished
    #[error("Scenario cancelled")]
    Cancelled,

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl ScenarioError {
    /// True when the error represents cancellation rather than failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ScenarioError::Cancelled)
    }

    /// Build a proxy-call error
    pub fn proxy(
        proxy: impl Into<String>,
        operation: impl Into<String>,
        source: ProxyError,
    ) -> Self {
        ScenarioError::Proxy {
            proxy: proxy.into(),
            operation: operation.into(),
            source,
        }
    }
}

/// Result type alias for scenario operations
pub type Result<T> = std::result::Result<T, ScenarioError>;

/// Extension trait for attaching proxy context to control plane results
pub trait ProxyResultExt<T> {
    /// Wrap the error with the proxy name and the attempted operation
    fn on_proxy(self, proxy: &str, operation: &str) -> Result<T>;
}

impl<T> ProxyResultExt<T> for std::result::Result<T, ProxyError> {
    fn on_proxy(self, proxy: &str, operation: &str) -> Result<T> {
        self.map_err(|source| ScenarioError::proxy(proxy, operation, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_is_distinguishable() {
        assert!(ScenarioError::Cancelled.is_cancelled());
        assert!(!ScenarioError::NotFound("x".into()).is_cancelled());
        assert!(!ScenarioError::Other("boom".into()).is_cancelled());
    }

    #[test]
    fn test_proxy_error_display_names_proxy_and_operation() {
        let err: Result<()> = Err(ProxyError::Rejected("connection refused".into()))
            .on_proxy("memcache1", "add toxic");
        let message = err.unwrap_err().to_string();
        assert_eq!(
            message,
            "Failed to add toxic on proxy 'memcache1': connection refused"
        );
    }

    #[test]
    fn test_precondition_message() {
        let err = ScenarioError::Precondition {
            scenario: "single-node-failure".into(),
            required: 3,
            actual: 2,
        };
        assert_eq!(
            err.to_string(),
            "Scenario 'single-node-failure' needs at least 3 proxies, got 2"
        );
    }
}
