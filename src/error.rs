use crate::security::SecurityError;
use crate::structure::GUID;
use speedy;
use std::io;
use thiserror;

pub type IoResult<T> = std::result::Result<T, IoError>;

#[derive(Debug, thiserror::Error)]
pub enum IoError {
    #[error("SpeedyError: {0}")]
    SpeedyError(#[from] speedy::Error),

    #[error("{0}")]
    IoError(#[from] io::Error),

    #[error("malformed: {0}")]
    Malformed(String),
}

pub type RtpsResult<T> = std::result::Result<T, RtpsError>;

#[derive(Debug, thiserror::Error)]
pub enum RtpsError {
    #[error("malformed input: {0}")]
    Malformed(String),

    #[error("history is full")]
    HistoryFull,

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("deadline expired")]
    Timeout,

    #[error("message of {0} bytes does not fit in {1} bytes")]
    MessageTooLarge(usize, usize),

    #[error("security plugin: {0}")]
    Security(#[from] SecurityError),

    #[error("{0} is not matched")]
    NotMatched(GUID),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Io(#[from] IoError),
}

impl From<speedy::Error> for RtpsError {
    fn from(e: speedy::Error) -> Self {
        Self::Io(IoError::SpeedyError(e))
    }
}

impl From<io::Error> for RtpsError {
    fn from(e: io::Error) -> Self {
        Self::Io(IoError::IoError(e))
    }
}
