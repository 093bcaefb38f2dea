//! Agent-level errors
//!
//! Component errors (sensor reads, decode failures, dropped publishes) are
//! handled where they happen. Only what stops the agent from starting, or
//! stops it for good, reaches this type.

use luxbridge_connectors::MqttError;
use luxbridge_core::GpioFault;
use thiserror::Error;

/// Why the agent could not start or had to stop
#[derive(Debug, Error)]
pub enum AgentError {
    /// Configuration file missing or unreadable
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A key holds a value the component cannot use
    #[error("Invalid [{section}] {key}: {reason}")]
    Invalid {
        /// Section name as documented
        section: &'static str,
        /// Offending key
        key: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// Broker client could not be built, or credentials were rejected
    #[error(transparent)]
    Broker(#[from] MqttError),

    /// Pin could not be claimed or configured
    #[error(transparent)]
    Gpio(#[from] GpioFault),

    /// Signal handler installation failed
    #[error("Failed to install signal handler: {0}")]
    Signal(#[from] std::io::Error),
}

impl AgentError {
    pub(crate) fn invalid(section: &'static str, key: &'static str, reason: impl ToString) -> Self {
        AgentError::Invalid { section, key, reason: reason.to_string() }
    }
}
