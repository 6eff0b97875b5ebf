use std::{fmt, io, num::TryFromIntError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Truncated or unreadable length prefix, blob header or blob message.
    MalformedContainer,
    UnsupportedCodec,
    /// Decompressed payload does not match its declared size or does not decode.
    CorruptPayload,
    ProjectorNotReady,
    /// A segment references a point that is not in the point mapping.
    BrokenInvariant,
    Io,
    Config,
    Cache,
    Encoding,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MalformedContainer => "malformed_container",
            ErrorKind::UnsupportedCodec => "unsupported_codec",
            ErrorKind::CorruptPayload => "corrupt_payload",
            ErrorKind::ProjectorNotReady => "projector_not_ready",
            ErrorKind::BrokenInvariant => "broken_invariant",
            ErrorKind::Io => "io",
            ErrorKind::Config => "config",
            ErrorKind::Cache => "cache",
            ErrorKind::Encoding => "encoding",
        }
    }
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Error {
            kind: ErrorKind::Io,
            message: value.to_string(),
        }
    }
}

impl From<prost::DecodeError> for Error {
    fn from(value: prost::DecodeError) -> Self {
        Error {
            kind: ErrorKind::MalformedContainer,
            message: value.to_string(),
        }
    }
}

impl From<xz::stream::Error> for Error {
    fn from(value: xz::stream::Error) -> Self {
        Error {
            kind: ErrorKind::CorruptPayload,
            message: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error {
            kind: ErrorKind::Config,
            message: value.to_string(),
        }
    }
}

impl From<png::EncodingError> for Error {
    fn from(value: png::EncodingError) -> Self {
        Error {
            kind: ErrorKind::Encoding,
            message: value.to_string(),
        }
    }
}

impl From<TryFromIntError> for Error {
    fn from(value: TryFromIntError) -> Self {
        Error {
            kind: ErrorKind::Encoding,
            message: value.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
