use thiserror::Error;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("Inbound channel closed: the router is no longer accepting messages")]
    InboundClosed,

    #[error("Outbound channel closed: nobody is reading replies")]
    OutboundClosed,

    #[error("Router stopped: {0}")]
    Stopped(String),

    #[error("Topic error: {0}")]
    Topic(#[from] TopicError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures a topic may report instead of a verdict. The slot turns them into a decline.
#[derive(Error, Debug)]
pub enum TopicError {
    #[error("External service error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, RouterError>;
