//! Error types for the compatibility & ranking engine.
//!
//! Only genuinely exceptional conditions live here. Empty suggestion lists,
//! unclustered tracks and below-threshold edges are ordinary results.

use thiserror::Error;

use crate::track::TrackId;

/// Errors surfaced by the engine's public operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    /// Key string outside the `1A`..`12B` wheel notation.
    #[error("Malformed key '{key}': expected wheel notation 1A-12B")]
    MalformedKey { key: String },

    /// A track field failed validation at construction time.
    #[error("Invalid track {id}: {field} = {value} is out of range")]
    InvalidTrack {
        id: TrackId,
        field: &'static str,
        value: f64,
    },

    /// All six scoring weights are zero (or unusable) so they cannot be normalised.
    #[error("Scoring weights are degenerate: they must be finite, non-negative and not all zero")]
    DegenerateWeights,

    /// Start/end constraint not satisfiable for the given subset.
    #[error("Invalid constraint: {reason}")]
    InvalidConstraint { reason: String },

    /// A tuning parameter is outside its valid domain.
    #[error("Invalid parameter: {message}")]
    InvalidParameter { message: String },

    /// A background job observed its cancellation token.
    #[error("Operation cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn malformed_key(key: impl Into<String>) -> Self {
        Self::MalformedKey { key: key.into() }
    }

    pub fn invalid_constraint(reason: impl Into<String>) -> Self {
        Self::InvalidConstraint {
            reason: reason.into(),
        }
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }
}

/// Library-wide result alias.
pub type Result<T> = std::result::Result<T, EngineError>;
