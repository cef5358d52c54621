//! Error type shared by every residual computation.
//!
//! Variants map to the failure classes callers need to tell apart:
//!
//! - `Config`: the model or the requested options cannot produce residuals
//! - `DataQuality`: the observations are unusable for the requested operation
//! - `Degenerate`: a covariance solve failed (recovered inside chi-squared)
//! - `UnsupportedKind`: an unknown residual type was requested

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResidualError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("data quality error: {0}")]
    DataQuality(String),

    #[error("degenerate covariance: {0}")]
    Degenerate(String),

    #[error("'{requested}' is not a supported residual type; supported types are {supported:?}")]
    UnsupportedKind {
        requested: String,
        supported: Vec<&'static str>,
    },
}

pub type ResidualResult<T> = Result<T, ResidualError>;

impl ResidualError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn data_quality(message: impl Into<String>) -> Self {
        Self::DataQuality(message.into())
    }

    pub fn degenerate(message: impl Into<String>) -> Self {
        Self::Degenerate(message.into())
    }

    /// Process exit code for front-ends that surface these errors.
    pub fn exit_code(&self) -> u8 {
        match self {
            ResidualError::Config(_) | ResidualError::UnsupportedKind { .. } => 2,
            ResidualError::DataQuality(_) => 3,
            ResidualError::Degenerate(_) => 4,
        }
    }
}
