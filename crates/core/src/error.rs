use std::thread::ThreadId;

use thiserror::Error;

/// Errors surfaced by dispatchers, their futures, and configuration loading.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("access violation: called from thread {caller:?}, dispatcher is owned by thread {owner:?}")]
    AccessViolation { owner: ThreadId, caller: ThreadId },

    #[error("the dispatcher is already running")]
    AlreadyRunning,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("work item failed: {0}")]
    ItemFailure(String),

    #[error("work item was dropped before it could run")]
    Abandoned,

    #[error("the dispatcher has been disposed")]
    Disposed,

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(String),

    #[error("config I/O error: {0}")]
    ConfigIo(String),
}

impl From<toml::de::Error> for DispatchError {
    fn from(e: toml::de::Error) -> Self {
        DispatchError::ConfigParse(e.to_string())
    }
}

impl From<std::io::Error> for DispatchError {
    fn from(e: std::io::Error) -> Self {
        DispatchError::ConfigIo(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
