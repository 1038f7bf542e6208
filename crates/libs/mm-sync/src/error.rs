use serde::{Deserialize, Serialize};

/// Errors reported by the RPC channel to the modem manager service.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum RpcError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("timeout: {operation}")]
    Timeout { operation: String },

    #[error("not implemented: {method}")]
    NotImplemented { method: String },

    #[error("protocol error: {message}")]
    Protocol { message: String },

    #[error("rejected by service: {name}: {message}")]
    Rejected { name: String, message: String },

    #[error("transport error: {message}")]
    Transport { message: String },
}

/// How a failure is handled by the negotiation state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Aborted locally. Logged quietly, never retried.
    Cancelled,
    /// Transient. Triggers one scheduled retry of the same step.
    Timeout,
    /// Malformed or rejected call. No retry until the service reappears.
    Other,
}

impl RpcError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Cancelled => ErrorClass::Cancelled,
            Self::Timeout { .. } => ErrorClass::Timeout,
            _ => ErrorClass::Other,
        }
    }

    /// Returns `true` for transient errors that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Timeout
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    pub fn not_implemented(method: impl Into<String>) -> Self {
        Self::NotImplemented {
            method: method.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

/// Errors surfaced to consumers of [`crate::ModemManager`].
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum ManagerError {
    /// The cached state is not valid, so no call was made.
    #[error("modem manager state is not valid")]
    NotValid,

    /// The request was cancelled before it completed.
    #[error("request cancelled")]
    Cancelled,

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
