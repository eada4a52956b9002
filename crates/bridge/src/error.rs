use mainloop::MainloopError;
use thiserror::Error;

/// Errors returned by the event bus and the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Mainloop(#[from] MainloopError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("event bus error: {0}")]
    Bus(String),

    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
}
