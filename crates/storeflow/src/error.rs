//! Error types for Storeflow.
//!
//! Each layer owns a small enum; `StorefrontError` aggregates them for callers
//! that only care that a journey could not be driven.

use std::time::Duration;
use thiserror::Error;

/// Result type for session capability calls
pub type SessionResult<T> = Result<T, SessionError>;

/// Result type for top-level Storeflow operations
pub type StorefrontResult<T> = Result<T, StorefrontError>;

/// Errors raised by a [`Session`](crate::session::Session) implementation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// No element matched (the DOM has not rendered it yet, or never will)
    #[error("No such element: {selector}")]
    NoSuchElement {
        /// Selector that was queried
        selector: String,
    },

    /// Element was detached from the DOM between lookup and use
    #[error("Stale element reference: {element}")]
    StaleElement {
        /// Element handle id
        element: String,
    },

    /// Element is present but cannot receive native input
    #[error("Element {element} not interactable: {message}")]
    NotInteractable {
        /// Element handle id
        element: String,
        /// Driver message
        message: String,
    },

    /// Script evaluation failed
    #[error("Script execution failed: {message}")]
    Script {
        /// Error message
        message: String,
    },

    /// Navigation failed
    #[error("Navigation to {url} failed: {message}")]
    Navigation {
        /// Target URL
        url: String,
        /// Error message
        message: String,
    },

    /// Screenshot capture failed
    #[error("Screenshot failed: {message}")]
    Screenshot {
        /// Error message
        message: String,
    },

    /// The session is closed or was never opened
    #[error("Session closed")]
    Closed,

    /// Anything else the provider reports
    #[error("Session error: {message}")]
    Other {
        /// Error message
        message: String,
    },
}

impl SessionError {
    /// Lookup failures caused by the DOM mutating under us.
    ///
    /// Pollers treat these as "not yet"; everything else is a real failure.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NoSuchElement { .. } | Self::StaleElement { .. } | Self::NotInteractable { .. }
        )
    }

    /// Shorthand for [`SessionError::Other`]
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

/// A wait that ran out of time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutFailure {
    /// What was waited for
    pub description: String,
    /// Wall-clock time spent polling
    pub elapsed: Duration,
    /// Configured timeout
    pub timeout: Duration,
    /// Number of predicate evaluations
    pub polls: u32,
    /// Last intermediate state the condition reported, if any
    pub last_observed: Option<String>,
}

impl std::fmt::Display for TimeoutFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "timed out after {}ms waiting for {} ({} polls",
            self.elapsed.as_millis(),
            self.description,
            self.polls
        )?;
        if let Some(last) = &self.last_observed {
            write!(f, ", last observed: {last}")?;
        }
        write!(f, ")")
    }
}

/// Outcome of a wait that did not succeed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WaitFailure {
    /// Deadline elapsed without the condition being satisfied
    #[error("{0}")]
    Timeout(TimeoutFailure),

    /// The condition reported that it can never be satisfied
    #[error("{description} failed permanently: {reason}")]
    Failed {
        /// What was waited for
        description: String,
        /// Why it gave up
        reason: String,
    },
}

impl WaitFailure {
    /// Check if this failure is a timeout
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// One failed dispatch tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptError {
    /// Tier that was tried (`direct` or `scripted`)
    pub mode: String,
    /// What went wrong
    pub error: SessionError,
}

/// Errors from the resilient action dispatcher
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// Every tier in the dispatch policy failed
    #[error("{action} on {element} failed after {} attempt(s): {}", attempts.len(), summarize(attempts))]
    ActionDispatchFailure {
        /// Action description
        action: String,
        /// Element handle id
        element: String,
        /// Errors per tier, in the order tried
        attempts: Vec<AttemptError>,
    },

    /// The dispatch policy has no tiers
    #[error("Dispatch policy is empty")]
    EmptyPolicy,
}

fn summarize(attempts: &[AttemptError]) -> String {
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.mode, a.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Why a journey step failed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StepError {
    /// Target or post-condition wait failed
    #[error(transparent)]
    Wait(#[from] WaitFailure),

    /// Both dispatch tiers failed
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Non-transient session failure (navigation, closed session)
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Filesystem preparation failed (download directory)
    #[error("I/O error: {message}")]
    Io {
        /// Error message
        message: String,
    },

    /// The step is malformed (an interaction with no target)
    #[error("Invalid step: {message}")]
    Invalid {
        /// Error message
        message: String,
    },
}

/// Errors from the report pipeline
#[derive(Debug, Error)]
pub enum ReportError {
    /// I/O error while creating directories or writing artifacts
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Lifecycle misuse
    #[error("Invalid report state: {message}")]
    InvalidState {
        /// Error message
        message: String,
    },
}

/// Errors loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading a config file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    /// A value failed validation
    #[error("Invalid configuration: {message}")]
    Invalid {
        /// Error message
        message: String,
    },
}

impl ConfigError {
    /// Create an invalid-value error
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

/// Top-level error for Storeflow operations
#[derive(Debug, Error)]
pub enum StorefrontError {
    /// Session failure
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Step failure
    #[error(transparent)]
    Step(#[from] StepError),

    /// Report pipeline failure
    #[error(transparent)]
    Report(#[from] ReportError),

    /// Configuration failure
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A spawned journey task panicked or was cancelled
    #[error("Journey task failed: {message}")]
    Task {
        /// Error message
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(SessionError::NoSuchElement {
            selector: "#x".into()
        }
        .is_transient());
        assert!(SessionError::StaleElement {
            element: "e1".into()
        }
        .is_transient());
        assert!(!SessionError::Closed.is_transient());
        assert!(!SessionError::other("boom").is_transient());
    }

    #[test]
    fn test_timeout_display_includes_last_observed() {
        let failure = TimeoutFailure {
            description: "cart items".into(),
            elapsed: Duration::from_millis(1200),
            timeout: Duration::from_millis(1000),
            polls: 5,
            last_observed: Some("0 elements".into()),
        };
        let text = failure.to_string();
        assert!(text.contains("cart items"));
        assert!(text.contains("last observed: 0 elements"));
    }

    #[test]
    fn test_dispatch_failure_lists_attempts() {
        let err = DispatchError::ActionDispatchFailure {
            action: "click".into(),
            element: "e7".into(),
            attempts: vec![
                AttemptError {
                    mode: "direct".into(),
                    error: SessionError::NotInteractable {
                        element: "e7".into(),
                        message: "obscured".into(),
                    },
                },
                AttemptError {
                    mode: "scripted".into(),
                    error: SessionError::Script {
                        message: "detached".into(),
                    },
                },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("2 attempt(s)"));
        assert!(text.contains("direct"));
        assert!(text.contains("scripted"));
    }
}
