use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session closed")]
    SessionClosed,

    #[error("channel \"{0}\" closed")]
    ChannelClosed(String),

    #[error("broker rejected session: {0}")]
    Rejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
