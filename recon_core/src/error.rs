//! Error types for the reconstruction engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cause of a rejected filter operation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KalmanError {
    /// Singular or ill-conditioned matrix encountered
    #[error("numeric failure in kalman filter")]
    Numeric,
    /// Resulting state is non-finite or has non-positive variances
    #[error("kalman filter produced an invalid state")]
    InvalidState,
    #[error("kalman filter step failed")]
    Other,
}

/// Rejected configuration value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid setting `{name}`: {reason}")]
    InvalidSetting { name: &'static str, reason: String },

    #[error("unknown filter kind `{0}` (expected uniform, accelerated or imm)")]
    UnknownFilterKind(String),
}

impl ConfigError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            name,
            reason: reason.into(),
        }
    }
}
