use thiserror::Error;




/**
 * Errors that can come back from the fallible parts of the library: reading
 * inputs, and moving bytes between processes. Contract violations (mismatched
 * layouts, negative grow, out-of-range levels) are panics instead.
 */
#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad configuration: {0}")]
    Config(String),

    #[error("failed to encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}




pub type Result<T> = std::result::Result<T, Error>;




// ============================================================================
impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}

impl<T> From<crossbeam_channel::SendError<T>> for Error {
    fn from(_: crossbeam_channel::SendError<T>) -> Self {
        Self::Transport("peer hung up".to_string())
    }
}

impl From<crossbeam_channel::RecvError> for Error {
    fn from(_: crossbeam_channel::RecvError) -> Self {
        Self::Transport("all peers hung up".to_string())
    }
}
