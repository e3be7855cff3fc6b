use thiserror::Error;

use crate::error::{truncate_body, Error};

/// How a single HTTP exchange ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Success,
    AuthExpired,
    ClientError,
    ServerError,
    NetworkFailure,
}

impl Classification {
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => Classification::Success,
            401 | 403 => Classification::AuthExpired,
            500..=599 => Classification::ServerError,
            _ => Classification::ClientError,
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Classification::ServerError | Classification::NetworkFailure
        )
    }
}

/// Terminal outcome of `Transport::send` when no 2xx response was obtained.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Unauthorized ({status}) - session may be expired")]
    AuthExpired { status: u16, detail: String },

    #[error("Request rejected ({status}): {detail}")]
    Rejected { status: u16, detail: String },

    #[error("Server unavailable after {attempts} attempt(s): {reason}")]
    Unavailable { attempts: u32, reason: String },

    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),
}

impl TransportError {
    pub fn auth_expired(status: u16, body: &str) -> Self {
        TransportError::AuthExpired {
            status,
            detail: truncate_body(body),
        }
    }

    pub fn rejected(status: u16, body: &str) -> Self {
        TransportError::Rejected {
            status,
            detail: truncate_body(body),
        }
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::AuthExpired { status, detail } => Error::AuthenticationRequired(
                format!("server rejected the session ({}): {}", status, detail),
            ),
            TransportError::Rejected { status, detail } => Error::ClientError { status, detail },
            TransportError::Unavailable { attempts, reason } => {
                Error::UpstreamUnavailable { attempts, reason }
            }
            TransportError::InvalidUrl(why) => Error::InvalidServer(why),
        }
    }
}
