use std::{error::Error, fmt::Display, io};

/// Errors that may occur when building a payload.
#[derive(Debug)]
pub enum EncodingError {
    OddLength,
    InvalidHexCharacter { c: char, index: usize },
    /// A text token contains a character that does not fit into one byte.
    NotLatin1 { c: char },
    InvalidLength { expected: usize, got: usize },
}

impl From<hex::FromHexError> for EncodingError {
    fn from(value: hex::FromHexError) -> Self {
        match value {
            hex::FromHexError::OddLength => EncodingError::OddLength,
            hex::FromHexError::InvalidHexCharacter { c, index } => {
                EncodingError::InvalidHexCharacter { c, index }
            }
            hex::FromHexError::InvalidStringLength => EncodingError::OddLength,
        }
    }
}

impl Display for EncodingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodingError::OddLength => write!(f, "Odd number of hex digits"),
            EncodingError::InvalidHexCharacter { c, index } => {
                write!(f, "Invalid hex character {:?} at position {}", c, index)
            }
            EncodingError::NotLatin1 { c } => {
                write!(f, "Character {:?} cannot be sent as a single byte", c)
            }
            EncodingError::InvalidLength { expected, got } => {
                write!(f, "Expected {} bytes, but got {}", expected, got)
            }
        }
    }
}

impl Error for EncodingError {}

/// Errors of a serial probe session.
#[derive(Debug)]
pub enum ProbeError {
    /// The device does not exist or cannot be opened (permissions, already in use).
    DeviceOpen(serialport::Error),
    /// Writing to or reading from the open device failed.
    Transport(io::Error),
    Encoding(EncodingError),
}

impl From<EncodingError> for ProbeError {
    fn from(value: EncodingError) -> Self {
        ProbeError::Encoding(value)
    }
}

impl From<io::Error> for ProbeError {
    fn from(value: io::Error) -> Self {
        ProbeError::Transport(value)
    }
}

impl Display for ProbeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeError::DeviceOpen(error) => write!(f, "Cannot open device: {}", error),
            ProbeError::Transport(error) => write!(f, "Serial transport error: {}", error),
            ProbeError::Encoding(error) => write!(f, "Invalid payload: {}", error),
        }
    }
}

impl Error for ProbeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ProbeError::DeviceOpen(error) => Some(error),
            ProbeError::Transport(error) => Some(error),
            ProbeError::Encoding(error) => Some(error),
        }
    }
}
