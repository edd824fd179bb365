use std::{error::Error, fmt::Display, io, str::Utf8Error};

/// Errors that may occur when interpreting the bytes of a reply.
#[derive(Debug)]
pub enum ReplyError {
    /// Nothing but NUL bytes (or nothing at all) was received.
    Empty,
    InvalidJson(serde_json::Error),
    InvalidUtf8(Utf8Error),
    /// A field lookup was attempted on a reply that is not a JSON object.
    NotAnObject,
    MissingField(&'static str),
    InvalidField { field: &'static str, value: String },
}

impl From<serde_json::Error> for ReplyError {
    fn from(value: serde_json::Error) -> Self {
        ReplyError::InvalidJson(value)
    }
}

impl From<Utf8Error> for ReplyError {
    fn from(value: Utf8Error) -> Self {
        ReplyError::InvalidUtf8(value)
    }
}

impl Display for ReplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplyError::Empty => write!(f, "Received an empty reply"),
            ReplyError::InvalidJson(error) => write!(f, "Reply is not valid JSON: {}", error),
            ReplyError::InvalidUtf8(error) => write!(f, "Reply is not valid UTF8: {}", error),
            ReplyError::NotAnObject => write!(f, "Reply is not a JSON object"),
            ReplyError::MissingField(field) => write!(f, "Reply has no field {}", field),
            ReplyError::InvalidField { field, value } => {
                write!(f, "Invalid value {} for field {}", value, field)
            }
        }
    }
}

impl Error for ReplyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReplyError::InvalidJson(error) => Some(error),
            ReplyError::InvalidUtf8(error) => Some(error),
            _ => None,
        }
    }
}

/// A read failed while draining a reply.
#[derive(Debug)]
pub struct DrainError {
    /// Reply bytes received before the failure
    pub partial: Vec<u8>,
    pub source: io::Error,
}

impl DrainError {
    pub fn received(&self) -> usize {
        self.partial.len()
    }

    /// Whether the read gave up on a timeout rather than failing
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.source.kind(),
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
        )
    }
}

impl From<DrainError> for io::Error {
    fn from(value: DrainError) -> Self {
        value.source
    }
}

impl Display for DrainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Read failed after {} reply bytes: {}",
            self.received(),
            self.source
        )
    }
}

impl Error for DrainError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}
