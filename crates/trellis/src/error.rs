// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Driver error types.
//!
//! `Error` is the library-level error carried by `Result`. `ErrorCode` is the
//! wire-level code reported to clients in an error response; the two are kept
//! separate because most I/O and configuration faults never reach a client.

use std::fmt;
use std::io;

/// Library-level error.
#[derive(Debug)]
pub enum Error {
    /// Channel URI failed validation (bad scheme, missing address, even
    /// multicast address, conflicting parameters).
    InvalidChannel(String),
    /// Publication lookup failed for a known channel.
    PublicationStreamUnknown { session_id: i32, stream_id: i32 },
    /// ADD_PUBLICATION for a (session, stream, channel) that already exists.
    PublicationStreamAlreadyExists { session_id: i32, stream_id: i32 },
    /// Ingress frame shorter than its header or of unknown type.
    MalformedFrame(String),
    /// Encode target buffer shorter than the fixed header.
    ShortBuffer { required: usize, capacity: usize },
    /// Configuration value failed validation.
    Config(String),
    /// Another live driver owns the directory.
    ActiveDriver(String),
    /// I/O fault with underlying cause.
    Io(io::Error),
    /// Anything else worth reporting with context.
    Generic(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidChannel(uri) => write!(f, "invalid channel: {}", uri),
            Error::PublicationStreamUnknown {
                session_id,
                stream_id,
            } => write!(
                f,
                "unknown publication: session_id={} stream_id={}",
                session_id, stream_id
            ),
            Error::PublicationStreamAlreadyExists {
                session_id,
                stream_id,
            } => write!(
                f,
                "publication already exists: session_id={} stream_id={}",
                session_id, stream_id
            ),
            Error::MalformedFrame(msg) => write!(f, "malformed frame: {}", msg),
            Error::ShortBuffer { required, capacity } => {
                write!(f, "short buffer: required={} capacity={}", required, capacity)
            }
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
            Error::ActiveDriver(dir) => write!(f, "active driver detected in {}", dir),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Generic(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

/// Convenient alias for driver results.
pub type Result<T> = std::result::Result<T, Error>;

/// Wire-level error code carried in an error response to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    GenericError = 0,
    InvalidChannel = 1,
    PublicationStreamUnknown = 2,
    PublicationStreamAlreadyExists = 3,
}

impl ErrorCode {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(ErrorCode::GenericError),
            1 => Some(ErrorCode::InvalidChannel),
            2 => Some(ErrorCode::PublicationStreamUnknown),
            3 => Some(ErrorCode::PublicationStreamAlreadyExists),
            _ => None,
        }
    }
}

impl Error {
    /// Map to the client-visible code; faults without a dedicated code
    /// report as generic.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Error::InvalidChannel(_) => ErrorCode::InvalidChannel,
            Error::PublicationStreamUnknown { .. } => ErrorCode::PublicationStreamUnknown,
            Error::PublicationStreamAlreadyExists { .. } => {
                ErrorCode::PublicationStreamAlreadyExists
            }
            _ => ErrorCode::GenericError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            Error::InvalidChannel("udp://".into()).error_code(),
            ErrorCode::InvalidChannel
        );
        assert_eq!(
            Error::PublicationStreamUnknown {
                session_id: 1,
                stream_id: 2
            }
            .error_code(),
            ErrorCode::PublicationStreamUnknown
        );
        assert_eq!(
            Error::Generic("boom".into()).error_code(),
            ErrorCode::GenericError
        );
    }

    #[test]
    fn test_error_code_round_trip() {
        for code in [
            ErrorCode::GenericError,
            ErrorCode::InvalidChannel,
            ErrorCode::PublicationStreamUnknown,
            ErrorCode::PublicationStreamAlreadyExists,
        ] {
            assert_eq!(ErrorCode::from_i32(code as i32), Some(code));
        }
        assert_eq!(ErrorCode::from_i32(99), None);
    }
}
