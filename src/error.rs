use thiserror::Error;

/// Errors surfaced by the mixing engine (`SoftAe`) and its streams/sounds.
#[derive(Debug, Error)]
pub enum SoftAeError {
    #[error("failed to open sink: {0}")]
    SinkOpen(String),

    #[error("sink write failed: {0}")]
    SinkWrite(String),

    #[error("sink does not support the requested format")]
    StreamCreateFailure,

    #[error("engine lock was poisoned")]
    LockPoisoned,

    #[error("no default output device available")]
    NoOutputDevice,
}

/// Errors surfaced by `Player` to its host.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("decoder could not open the requested file")]
    DecoderOpenFailure,

    #[error("engine could not create a stream for this track: {0}")]
    StreamCreateFailure(#[from] SoftAeError),

    #[error("host had nothing queued and playback ended")]
    QueueFailed,
}

pub type SoftAeResult<T> = Result<T, SoftAeError>;
pub type PlayerResult<T> = Result<T, PlayerError>;
