/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! Error taxonomy for the echo engine.
//!
//! Errors are scoped by blast radius: a [`SessionError`] ends every task of a
//! session, a [`StreamError`] ends only the worker that owns the stream.

use thiserror::Error;

/// The session is gone. Every session-scoped task exits when it sees one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The peer or the transport closed the session.
    #[error("session closed: {0}")]
    Closed(String),

    /// The session lifetime token was cancelled locally.
    #[error("session cancelled")]
    Cancelled,

    /// The transport failed in a way that cannot be recovered.
    #[error("transport error: {0}")]
    Transport(String),
}

/// A single stream failed. Sibling streams and the session are unaffected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The peer reset (or stopped) this stream with an application code.
    #[error("stream reset by peer with code {0}")]
    Reset(u32),

    /// The stream was already finished or closed on this side.
    #[error("stream closed")]
    Closed,

    /// The owning session ended while the stream was in use.
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl StreamError {
    /// True when the failure is really the whole session going away.
    pub fn is_session_terminal(&self) -> bool {
        matches!(self, StreamError::Session(_))
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_errors_are_session_terminal() {
        let err: StreamError = SessionError::Cancelled.into();
        assert!(err.is_session_terminal());
        assert!(!StreamError::Reset(7).is_session_terminal());
        assert!(!StreamError::Closed.is_session_terminal());
    }

    #[test]
    fn test_reset_code_in_message() {
        assert_eq!(
            StreamError::Reset(42).to_string(),
            "stream reset by peer with code 42"
        );
    }
}
