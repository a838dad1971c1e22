//! Error types for the search engine.
//!
//! [`SearchError`] is the umbrella type returned by the search loop. Its
//! variants keep apart the three process-level failure classes: bad
//! configuration, a driver that cannot be reached or reports a SUT-side
//! problem, and internal bugs (corrupted individuals).

use evorest_core::CoreError;

/// Invalid or contradictory settings, detected before the search starts.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown option '{name}'")]
    UnknownOption { name: String },

    #[error("invalid value '{value}' for option '{option}': {reason}")]
    InvalidValue {
        option: String,
        value: String,
        reason: String,
    },

    #[error("option '{option}' is {value}, below its minimum {min}")]
    BelowMinimum {
        option: &'static str,
        value: f64,
        min: f64,
    },

    #[error("option '{option}' is {value}, above its maximum {max}")]
    AboveMaximum {
        option: &'static str,
        value: f64,
        max: f64,
    },

    /// A cross-field rule was violated.
    #[error("{0}")]
    Inconsistent(String),
}

/// Control-plane failures talking to the SUT driver.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DriverError {
    /// Nothing is listening where the driver should be.
    #[error("driver not reachable at {url}: {reason}")]
    NotReachable { url: String, reason: String },

    /// The driver answered but could not operate the SUT.
    #[error("SUT problem: {0}")]
    SutProblem(String),

    /// The driver answered with something we cannot interpret.
    #[error("incompatible driver response to '{operation}': {reason}")]
    Malformed {
        operation: &'static str,
        reason: String,
    },
}

/// Data-plane failures of a single HTTP call against the SUT.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("call to {url} timed out")]
    Timeout { url: String },

    #[error("call to {url} was redirected too many times")]
    RedirectLoop { url: String },

    #[error("call to {url} failed: {reason}")]
    Other { url: String, reason: String },
}

impl TransportError {
    /// Failures that only abort the remaining actions of one individual.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout { .. } | TransportError::RedirectLoop { .. }
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// A contract of the gene/individual model was broken.
    #[error("internal error: {0}")]
    Internal(#[from] CoreError),

    /// A search-level invariant was broken.
    #[error("internal error: {0}")]
    Invariant(String),
}

impl SearchError {
    /// True for errors that indicate a bug in the engine itself.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            SearchError::Internal(_) | SearchError::Invariant(_) | SearchError::Transport(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_recoverability() {
        let url = "http://localhost/x".to_string();
        assert!(TransportError::Timeout { url: url.clone() }.is_recoverable());
        assert!(TransportError::RedirectLoop { url: url.clone() }.is_recoverable());
        assert!(!TransportError::Other {
            url,
            reason: "connection reset".into()
        }
        .is_recoverable());
    }

    #[test]
    fn test_core_error_is_internal() {
        let err: SearchError = CoreError::ImmutableGene { name: "id".into() }.into();
        assert!(err.is_internal());
        assert!(err.to_string().starts_with("internal error"));

        let err: SearchError = DriverError::SutProblem("boom".into()).into();
        assert!(!err.is_internal());
    }
}
