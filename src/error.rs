//! Error types for rippledb.
//!
//! All errors are strongly typed using thiserror. The variants form a
//! closed taxonomy so callers can pattern match on specific conditions
//! (missing row, uniqueness collision, denied access, ...) instead of
//! string-probing backend messages.

use thiserror::Error;

/// Top-level error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The registered type's descriptor is malformed: no top-level `ID`
    /// column, an unsupported field shape, or a cyclic nesting graph.
    #[error("Invalid record type {type_name}: {reason}")]
    InvalidRecordType {
        /// Offending type name.
        type_name: String,
        /// Why the descriptor was rejected.
        reason: String,
    },

    /// Get/Update/Remove addressed a row that does not exist.
    #[error("{type_name} not found")]
    NotFound {
        /// Type whose row was missing.
        type_name: String,
    },

    /// Insert collided with the primary key or a uniqueness index.
    #[error("Conflict: {message}")]
    Conflict {
        /// Backend constraint description.
        message: String,
    },

    /// A query-control or update-control predicate rejected the operation.
    #[error("Denied: {reason}")]
    Denied {
        /// Control-supplied reason.
        reason: String,
    },

    /// In-memory comparison across incompatible value kinds.
    #[error("Cannot compare {left} to {right}")]
    IncomparableTypes {
        /// Kind of the left operand.
        left: &'static str,
        /// Kind of the right operand.
        right: &'static str,
    },

    /// A record field referenced by a predicate does not exist on the type.
    #[error("Unknown field {field:?}")]
    UnknownField {
        /// The missing column name.
        field: String,
    },

    /// Subscribe was called with a query shape subscriptions cannot track.
    #[error("Cannot subscribe: {reason}")]
    SubscribeUnsupported {
        /// Why the query cannot be subscribed.
        reason: String,
    },

    /// Close on a subscription that is not in the registry.
    #[error("Subscription is not open")]
    NotOpen,

    /// An operation addressed a type that was never registered.
    #[error("{type_name} is not registered")]
    NotRegistered {
        /// The unregistered type name.
        type_name: String,
    },

    /// Any backend, pool, or serialization failure.
    #[error("Backend error: {message}")]
    Backend {
        /// Error details.
        message: String,
    },

    /// Internal invariant violation (e.g. a type-erased downcast failed).
    #[error("Internal error: {message}")]
    Internal {
        /// Error description.
        message: String,
    },
}

impl StoreError {
    /// Creates an `InvalidRecordType` error.
    #[must_use]
    pub fn invalid_record_type(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRecordType {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `NotFound` error for the given type.
    #[must_use]
    pub fn not_found(type_name: impl Into<String>) -> Self {
        Self::NotFound {
            type_name: type_name.into(),
        }
    }

    /// Creates a `Denied` error with the given reason.
    #[must_use]
    pub fn denied(reason: impl Into<String>) -> Self {
        Self::Denied {
            reason: reason.into(),
        }
    }

    /// Creates a `Backend` error with the given message.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Creates an `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true for `NotFound`.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true for `Conflict`.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns true for `Denied`.
    #[must_use]
    pub const fn is_denied(&self) -> bool {
        matches!(self, Self::Denied { .. })
    }

    /// Returns true for `InvalidRecordType`.
    #[must_use]
    pub const fn is_invalid_record_type(&self) -> bool {
        matches!(self, Self::InvalidRecordType { .. })
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => Self::NotFound {
                type_name: "row".to_string(),
            },
            rusqlite::Error::SqliteFailure(code, message)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::Conflict {
                    message: message.unwrap_or_else(|| code.to_string()),
                }
            }
            other => Self::Backend {
                message: other.to_string(),
            },
        }
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(err: r2d2::Error) -> Self {
        Self::Backend {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Backend {
            message: format!("serialization: {err}"),
        }
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
