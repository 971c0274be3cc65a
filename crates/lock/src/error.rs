// Copyright 2024 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::protocol::ProtocolError;
use std::time::Duration;
use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// Lock operation related error types
///
/// Denials (`TryAcquireReply::Held`, `ReleaseReply::Denied`) are ordinary
/// replies and never show up here.
#[derive(Error, Debug)]
pub enum LockError {
    /// The same `(lock_name, entity)` is already outstanding on this connection
    #[error("Double request for lock '{lock_name}' by entity '{entity}'")]
    DoubleRequest { lock_name: String, entity: String },

    /// The connection ended before the reply arrived
    #[error("Connection to {endpoint} closed")]
    ConnectionClosed { endpoint: String },

    /// Network error
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Malformed or unexpected wire message
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Lock acquisition timeout
    #[error("Lock acquisition timeout for '{lock_name}' after {timeout:?}")]
    Timeout { lock_name: String, timeout: Duration },

    /// The caller gave up waiting
    #[error("Lock acquisition for '{lock_name}' cancelled")]
    Cancelled { lock_name: String },

    /// The manager task is no longer running
    #[error("Lock manager stopped")]
    ManagerStopped,

    /// Insufficient nodes for quorum
    #[error("Insufficient nodes for quorum: required {required}, available {available}")]
    InsufficientNodes { required: usize, available: usize },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl LockError {
    /// Create double request error
    pub fn double_request(lock_name: impl Into<String>, entity: impl Into<String>) -> Self {
        Self::DoubleRequest {
            lock_name: lock_name.into(),
            entity: entity.into(),
        }
    }

    /// Create connection closed error
    pub fn connection_closed(endpoint: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            endpoint: endpoint.into(),
        }
    }

    /// Create network error
    pub fn network(message: impl Into<String>, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Network {
            message: message.into(),
            source: Box::new(source),
        }
    }

    /// Create timeout error
    pub fn timeout(lock_name: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            lock_name: lock_name.into(),
            timeout,
        }
    }

    /// Create cancelled error
    pub fn cancelled(lock_name: impl Into<String>) -> Self {
        Self::Cancelled {
            lock_name: lock_name.into(),
        }
    }

    /// Create configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Check if it is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Network { .. } | Self::ConnectionClosed { .. })
    }

    /// Check if it is a fatal error
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::ManagerStopped)
    }
}

impl From<std::io::Error> for LockError {
    fn from(err: std::io::Error) -> Self {
        let message = err.to_string();
        Self::network(message, err)
    }
}

impl From<LinesCodecError> for LockError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => Self::Protocol(ProtocolError::LineTooLong),
            LinesCodecError::Io(err) => err.into(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, LockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LockError::double_request("orders", "worker-1");
        assert_eq!(err.to_string(), "Double request for lock 'orders' by entity 'worker-1'");

        let err = LockError::timeout("orders", Duration::from_secs(1));
        assert!(err.to_string().contains("orders"));
        assert!(err.to_string().contains("1s"));
    }

    #[test]
    fn test_error_classification() {
        assert!(LockError::timeout("l", Duration::from_millis(5)).is_retryable());
        assert!(LockError::connection_closed("127.0.0.1:1").is_retryable());
        assert!(LockError::from(std::io::Error::other("boom")).is_retryable());
        assert!(!LockError::double_request("l", "e").is_retryable());
        assert!(!LockError::Protocol(ProtocolError::Empty).is_retryable());

        assert!(LockError::ManagerStopped.is_fatal());
        assert!(LockError::configuration("bad").is_fatal());
        assert!(!LockError::cancelled("l").is_fatal());
    }

    #[test]
    fn test_lines_codec_error_conversion() {
        let err: LockError = LinesCodecError::MaxLineLengthExceeded.into();
        assert!(matches!(err, LockError::Protocol(ProtocolError::LineTooLong)));

        let err: LockError = LinesCodecError::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe)).into();
        assert!(matches!(err, LockError::Network { .. }));
    }
}
