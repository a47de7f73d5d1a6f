//! Unified error type.
//!
//! Every failure carries a [`FailureKind`] so callers can tell
//! "service unreachable, try again" apart from "no route to this
//! destination" without matching on individual variants.

use thiserror::Error;

/// Coarse classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Bad input; rejected before any external call. Never retried.
    Validation,
    /// Timeout, unavailable provider, network trouble. Safe to retry with backoff.
    Transient,
    /// The provider affirmatively reported that nothing exists. Not retried.
    Permanent,
    /// The caller abandoned the wait.
    Cancelled,
    /// Storage or serialization failure inside this crate.
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Validation => "validation",
            FailureKind::Transient => "transient",
            FailureKind::Permanent => "permanent",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Internal => "internal",
        }
    }
}

#[derive(Error, Debug)]
pub enum GeoError {
    #[error("invalid coordinate: lat={lat}, lng={lng}")]
    InvalidCoordinate { lat: f64, lng: f64 },

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("invalid heading: {0}")]
    InvalidHeading(f64),

    #[error("missing destination")]
    MissingDestination,

    #[error("no resolvable origin for {0}")]
    MissingOrigin(String),

    #[error("owner {owner} already holds {limit} routes")]
    OwnerCapExceeded { owner: String, limit: usize },

    #[error("candidate index {index} out of range ({count} candidates)")]
    InvalidCandidateIndex { index: usize, count: usize },

    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("provider call timed out after {0} ms")]
    Timeout(u64),

    #[error("provider returned status {0}")]
    ProviderUnavailable(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("no route to destination")]
    NoRoute,

    #[error("no imagery at this location")]
    NoImagery,

    #[error("address not found: {0}")]
    GeocodeNotFound(String),

    #[error("request cancelled")]
    Cancelled,

    #[cfg(feature = "persistence")]
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GeoError {
    pub fn kind(&self) -> FailureKind {
        match self {
            GeoError::InvalidCoordinate { .. }
            | GeoError::InvalidGeometry(_)
            | GeoError::InvalidHeading(_)
            | GeoError::MissingDestination
            | GeoError::MissingOrigin(_)
            | GeoError::OwnerCapExceeded { .. }
            | GeoError::InvalidCandidateIndex { .. }
            | GeoError::UnknownEntity(_)
            | GeoError::InvalidArgument(_) => FailureKind::Validation,
            GeoError::Timeout(_) | GeoError::ProviderUnavailable(_) | GeoError::Network(_) => {
                FailureKind::Transient
            }
            GeoError::NoRoute | GeoError::NoImagery | GeoError::GeocodeNotFound(_) => {
                FailureKind::Permanent
            }
            GeoError::Cancelled => FailureKind::Cancelled,
            #[cfg(feature = "persistence")]
            GeoError::Storage(_) => FailureKind::Internal,
            GeoError::Serialization(_) | GeoError::Io(_) => FailureKind::Internal,
        }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == FailureKind::Transient
    }
}

pub type Result<T> = std::result::Result<T, GeoError>;

/// Turn `None` into a validation error.
pub trait OptionExt<T> {
    fn ok_or_invalid_geometry(self, reason: &str) -> Result<T>;
    fn ok_or_missing_origin(self, owner: &str) -> Result<T>;
    fn ok_or_unknown_entity(self, id: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_invalid_geometry(self, reason: &str) -> Result<T> {
        self.ok_or_else(|| GeoError::InvalidGeometry(reason.to_string()))
    }

    fn ok_or_missing_origin(self, owner: &str) -> Result<T> {
        self.ok_or_else(|| GeoError::MissingOrigin(owner.to_string()))
    }

    fn ok_or_unknown_entity(self, id: &str) -> Result<T> {
        self.ok_or_else(|| GeoError::UnknownEntity(id.to_string()))
    }
}
