// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdrlink developers

//! Error type shared by the control plane, stream plane, and discovery.

use std::fmt;
use std::io;

/// Errors returned by sdrlink operations.
#[derive(Debug)]
pub enum Error {
    /// Underlying socket or OS error.
    Io(io::Error),
    /// Link-level failure on the control or stream socket (connect refused,
    /// torn connection, short frame).
    Transport(String),
    /// Wire-format violation: bad magic, bad length, mis-tagged value,
    /// unknown call id.
    Protocol(String),
    /// An EXCEPTION value unpacked from the peer; carries the peer's message.
    Remote(String),
    /// Negative return code from the device driver API.
    Driver(i32),
    /// A blocking wait expired. Non-fatal on the stream plane.
    Timeout,
    /// The device or stream does not implement the requested operation.
    Unsupported,
    /// Bad key-value configuration (malformed URL, unknown protocol, bad
    /// numeric argument).
    Config(String),
    /// Stream-plane failure (all buffers acquired, no transport on a bypass
    /// stream, MTU misconfiguration).
    Stream(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Transport(msg) => write!(f, "transport error: {}", msg),
            Error::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Error::Remote(msg) => write!(f, "RemoteError: {}", msg),
            Error::Driver(code) => write!(f, "driver error code: {}", code),
            Error::Timeout => write!(f, "operation timed out"),
            Error::Unsupported => write!(f, "operation not supported"),
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
            Error::Stream(msg) => write!(f, "stream error: {}", msg),
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

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl Error {
    /// Map this error onto the driver API return-code space for forwarding
    /// inside a stream header.
    pub fn stream_code(&self) -> i32 {
        use crate::driver::codes;
        match self {
            Error::Timeout => codes::TIMEOUT,
            Error::Driver(code) => *code,
            Error::Unsupported => codes::NOT_SUPPORTED,
            _ => codes::STREAM_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_prefix() {
        let err = Error::Remote("tune failed".to_string());
        assert_eq!(err.to_string(), "RemoteError: tune failed");
    }

    #[test]
    fn test_stream_code_mapping() {
        assert_eq!(Error::Timeout.stream_code(), crate::driver::codes::TIMEOUT);
        assert_eq!(Error::Driver(-4).stream_code(), -4);
        assert_eq!(
            Error::Stream("oops".into()).stream_code(),
            crate::driver::codes::STREAM_ERROR
        );
    }
}
