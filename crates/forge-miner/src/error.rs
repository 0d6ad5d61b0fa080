//! Error types for the mining engine

use thiserror::Error;

/// Result type alias for mining operations
pub type Result<T> = std::result::Result<T, MiningError>;

/// Errors that can occur while building templates or driving miners
///
/// None of these terminate the process. The worst-case response is to abandon
/// the current attempt and let the owning loop or timer retry.
#[derive(Debug, Error)]
pub enum MiningError {
    /// Chain state has no usable tip
    #[error("No valid chain tip")]
    NoValidTip,

    /// No reserve key could be checked out for the reward output
    #[error("Reward destination unavailable: key pool exhausted")]
    RewardDestinationUnavailable,

    /// Key pool has no key left to hand out
    #[error("Key pool exhausted")]
    KeyPoolExhausted,

    /// Found block was rejected by the submission collaborator
    #[error("Block submission rejected: {0}")]
    SubmissionRejected(String),

    /// Selector or builder produced an inconsistent template
    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Block or header signing failed
    #[error("Signing error: {0}")]
    Signing(String),

    /// Authority period marker could not be read or persisted
    #[error("Period marker error: {0}")]
    PeriodMarker(String),

    /// A driver was started twice
    #[error("{0} is already running")]
    AlreadyRunning(&'static str),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MiningError {
    /// Check if the error is expected to clear up on the next attempt
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NoValidTip
                | Self::RewardDestinationUnavailable
                | Self::KeyPoolExhausted
                | Self::SubmissionRejected(_)
        )
    }

    /// Check if the error prevents a driver from running at all
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::InvalidConfig(_) | Self::Signing(_))
    }
}
