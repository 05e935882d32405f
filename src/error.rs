//! Error types for precog.
//!
//! All errors are strongly typed using thiserror so callers can pattern match
//! on the failure class. Only `Input` and `Configuration` errors abort a run;
//! the remaining classes degrade the affected signal and are recorded as
//! processing notes.

use thiserror::Error;

use crate::entity::EntityId;

/// Invalid run inputs, detected at hypothesis generation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
    #[error("No profile for entity '{entity_id}' and no template for vertical '{vertical}'")]
    NoProfileOrTemplate {
        entity_id: EntityId,
        vertical: String,
    },

    #[error("No profile for entity '{entity_id}' and no vertical supplied")]
    MissingVertical {
        entity_id: EntityId,
    },

    #[error("Entity id cannot be empty")]
    EmptyEntityId,

    #[error("Capability catalog is empty")]
    EmptyCatalog,
}

/// Invalid configuration or options, detected before the first pass.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("max_passes must be at least 1, got {value}")]
    InvalidMaxPasses {
        value: i64,
    },

    #[error("Budget field '{field}' must be positive, got {value}")]
    NonPositiveBudget {
        field: String,
        value: f64,
    },

    #[error("Value {value} for '{field}' is out of range [{min}, {max}]")]
    OutOfRange {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Field '{field}' must be non-zero")]
    Zero {
        field: String,
    },

    #[error("Failed to read configuration from {path}: {message}")]
    Io {
        path: String,
        message: String,
    },

    #[error("Failed to parse configuration: {message}")]
    Parse {
        message: String,
    },
}

/// Failures reported by an external collaborator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CollaboratorError {
    #[error("{operation} timed out after {duration_ms}ms")]
    Timeout {
        operation: String,
        duration_ms: u64,
    },

    #[error("{service} is unavailable: {message}")]
    Unavailable {
        service: String,
        message: String,
    },

    #[error("Transient failure: {message}")]
    Transient {
        message: String,
    },

    #[error("Backend error: {message}")]
    Backend {
        message: String,
    },

    #[error("Operation cancelled")]
    Cancelled,
}

impl CollaboratorError {
    /// Creates a transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates an unavailable error for the named service.
    #[must_use]
    pub fn unavailable(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Creates a backend error.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Returns true if retrying the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transient { .. })
    }
}

/// Top-level error type for precog.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Input error: {0}")]
    Input(#[from] InputError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Evidence collection failed for '{category}' on {channel}: {source}")]
    EvidenceCollection {
        category: String,
        channel: String,
        #[source]
        source: CollaboratorError,
    },

    #[error("Reasoning validation unavailable for '{category}': {source}")]
    ValidationService {
        category: String,
        #[source]
        source: CollaboratorError,
    },

    #[error("Persistence failed during {operation}: {source}")]
    Persistence {
        operation: String,
        #[source]
        source: CollaboratorError,
    },

    #[error("Pass {pass} was cancelled")]
    Cancelled {
        pass: u32,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl DiscoveryError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this error aborts a run instead of degrading a signal.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Input(_) | Self::Configuration(_) | Self::Internal { .. }
        )
    }

    /// Returns true if this is an input error.
    #[must_use]
    pub const fn is_input(&self) -> bool {
        matches!(self, Self::Input(_))
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::EvidenceCollection { source, .. }
            | Self::ValidationService { source, .. }
            | Self::Persistence { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

/// Result type alias for precog operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;
