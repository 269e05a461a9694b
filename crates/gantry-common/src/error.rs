//! Error types for gantry
//!
//! Errors are structured with fields to aid debugging in production.
//! Variants carry the object kind, index field, or bootstrap context that
//! produced them so the top-level bootstrap can report a precise cause.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for gantry operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Watch stream error for an object kind
    #[error("watch error for {kind}: {message}")]
    Watch {
        /// Kind being watched
        kind: String,
        /// Description of what failed
        message: String,
    },

    /// A field index with the same name already exists for the kind
    #[error("indexer conflict: field {field} is already indexed for {kind}")]
    IndexConflict {
        /// Kind the index was requested for
        kind: String,
        /// Index field name
        field: String,
    },

    /// Field indices can no longer be added because informers are running
    #[error("cannot index field {field} for {kind}: informers already started")]
    IndexerStarted {
        /// Kind the index was requested for
        kind: String,
        /// Index field name
        field: String,
    },

    /// Operation aborted because its cancellation token fired
    #[error("operation cancelled [{context}]")]
    Cancelled {
        /// What was being done when cancellation arrived
        context: String,
    },

    /// Runnables can no longer be added once the manager has started
    #[error("manager already started: cannot add runnable {runnable}")]
    ManagerStarted {
        /// Name of the rejected runnable
        runnable: String,
    },

    /// The shared event channel has no receiver left
    #[error("event channel closed [{context}]")]
    ChannelClosed {
        /// Who tried to send
        context: String,
    },

    /// Kind is not known to the scheme
    #[error("kind {kind} is not registered in the scheme")]
    UnknownKind {
        /// The unknown kind
        kind: String,
    },

    /// Invalid configuration
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The invalid flag or field (e.g., "--gatewayclass")
        field: Option<String>,
    },

    /// Controller registration for a kind failed during bootstrap
    #[error("cannot register controller for {kind}: {source}")]
    Registration {
        /// Kind whose controller failed to register
        kind: String,
        /// Underlying registration failure
        #[source]
        source: Box<Error>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "controller", "manager")
        context: String,
    },
}

impl Error {
    /// Create a watch error for a kind
    pub fn watch(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Watch {
            kind: kind.into(),
            message: msg.into(),
        }
    }

    /// Create an index conflict error
    pub fn index_conflict(kind: impl Into<String>, field: impl Into<String>) -> Self {
        Self::IndexConflict {
            kind: kind.into(),
            field: field.into(),
        }
    }

    /// Create a cancellation error with context
    pub fn cancelled(context: impl Into<String>) -> Self {
        Self::Cancelled {
            context: context.into(),
        }
    }

    /// Create a channel-closed error with context
    pub fn channel_closed(context: impl Into<String>) -> Self {
        Self::ChannelClosed {
            context: context.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error for a specific flag or field
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Wrap a registration failure with the kind it was for
    pub fn registration(kind: impl Into<String>, source: Error) -> Self {
        Self::Registration {
            kind: kind.into(),
            source: Box::new(source),
        }
    }

    /// Create an internal error with the given message
    ///
    /// For simple internal errors without specific context.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Controllers requeue reconcile failures only when this is true. A
    /// closed event channel, a cancelled operation or a 4xx API response
    /// will not go away on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                // Don't retry on 4xx errors (validation, forbidden, etc.)
                !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code)
                )
            }
            Error::Watch { .. } => true,
            Error::Internal { .. } => true,
            Error::IndexConflict { .. }
            | Error::IndexerStarted { .. }
            | Error::Cancelled { .. }
            | Error::ManagerStarted { .. }
            | Error::ChannelClosed { .. }
            | Error::UnknownKind { .. }
            | Error::Validation { .. }
            | Error::Registration { .. } => false,
        }
    }
}
