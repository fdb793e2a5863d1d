// Copyright (C) 2025 Category Labs, Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use std::borrow::Cow;

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
pub type KvResult<T> = Result<T, KvError>;

/// Failure below the HTTP layer: connect, TLS, reset, timeout. Always
/// retriable.
#[derive(Error, Debug)]
#[error("transport: {message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum CredentialError {
    /// The provider has no credentials to offer. Treated as anonymous
    /// access, not as a failure.
    #[error("no credentials available")]
    NotFound,

    #[error("credential provider failed")]
    Provider {
        #[source]
        source: BoxError,
    },
}

#[derive(Error, Debug)]
pub enum KvError {
    #[error("invalid argument: {0}")]
    InvalidArgument(Cow<'static, str>),

    #[error("failed precondition: {0}")]
    FailedPrecondition(Cow<'static, str>),

    /// The server answered with a byte range inconsistent with the request.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// The response body or headers could not be interpreted. Terminal.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("credentials unavailable")]
    Credential {
        #[source]
        source: BoxError,
    },

    /// Retry budget exhausted; wraps the status of the last attempt.
    #[error("all {attempts} retry attempts failed")]
    Aborted {
        attempts: u32,
        #[source]
        source: Box<KvError>,
    },

    #[error("internal: {0}")]
    Internal(Cow<'static, str>),
}

impl KvError {
    pub fn invalid_argument(message: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn failed_precondition(message: impl Into<Cow<'static, str>>) -> Self {
        Self::FailedPrecondition(message.into())
    }

    pub fn aborted(attempts: u32, source: KvError) -> Self {
        Self::Aborted {
            attempts,
            source: Box::new(source),
        }
    }

    /// Retriability predicate shared by every task: transport failures,
    /// HTTP 408, 429 and 5xx. Everything else is terminal.
    pub fn is_retriable(&self) -> bool {
        match self {
            KvError::Transport(_) => true,
            KvError::HttpStatus { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            _ => false,
        }
    }
}

impl From<CredentialError> for KvError {
    fn from(err: CredentialError) -> Self {
        KvError::Credential {
            source: Box::new(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriability_follows_status_classes() {
        for status in [408u16, 429, 500, 502, 503, 599] {
            let err = KvError::HttpStatus {
                status,
                message: String::new(),
            };
            assert!(err.is_retriable(), "{status} should be retriable");
        }
        for status in [200u16, 204, 304, 400, 403, 404, 412] {
            let err = KvError::HttpStatus {
                status,
                message: String::new(),
            };
            assert!(!err.is_retriable(), "{status} should be terminal");
        }
    }

    #[test]
    fn transport_errors_are_retriable() {
        let err = KvError::from(TransportError::new("connection reset"));
        assert!(err.is_retriable());
    }

    #[test]
    fn aborted_wraps_the_last_status() {
        let err = KvError::aborted(
            3,
            KvError::HttpStatus {
                status: 503,
                message: "unavailable".into(),
            },
        );
        assert!(!err.is_retriable());
        assert!(err.to_string().contains("3 retry attempts"));
        let source = std::error::Error::source(&err).expect("source");
        assert!(source.to_string().contains("503"));
    }
}
