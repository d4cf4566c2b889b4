use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("no free local port in range {start}..{end}")]
    NoFreePort { start: u16, end: u16 },

    #[error("display backend bind failed: {0}")]
    DisplayBind(#[source] std::io::Error),

    #[error("display bind probe failed: {0}")]
    BindProbe(String),

    #[error("{0} already started")]
    AlreadyStarted(&'static str),

    #[error("session error: {0}")]
    Session(#[from] desklink_session::SessionError),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;
