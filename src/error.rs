use std::fmt;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    OutOfSegments,
    BadSegmentHeader(&'static str),
    RestoreInconsistency(String),
    ShortIo { expected: usize, actual: usize },
    Corrupt(&'static str),
    InvalidConfig(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::OutOfSegments => write!(f, "segment allocator exhausted"),
            Error::BadSegmentHeader(msg) => write!(f, "bad segment header: {msg}"),
            Error::RestoreInconsistency(msg) => write!(f, "restore inconsistency: {msg}"),
            Error::ShortIo { expected, actual } => {
                write!(f, "short i/o: expected {expected} bytes, got {actual}")
            }
            Error::Corrupt(msg) => write!(f, "corrupt data: {msg}"),
            Error::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(value)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
