//! Errors raised while constructing and starting pipeline components

use thiserror::Error;

use crate::channel::ChannelError;

/// Result type for component construction and startup
pub type ComponentResult<T> = Result<T, ComponentError>;

/// Errors a source, sink or channel can report before it is running
#[derive(Debug, Error)]
pub enum ComponentError {
    #[error("{component}: missing required setting '{setting}'")]
    MissingSetting { component: String, setting: String },

    #[error("{component}: invalid value '{value}' for setting '{setting}': {reason}")]
    InvalidSetting {
        component: String,
        setting: String,
        value: String,
        reason: String,
    },

    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("{component}: failed to bind {address}: {source}")]
    Bind {
        component: String,
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
