//! Loader Error Types
//!
//! This module provides loader-specific error variants that integrate
//! with the unified `kernel::error::AppError` system.
//!
//! Every variant belongs to exactly one [`ErrorClass`]. Protocol and security
//! failures all surface to the client as the same bodiless 401 so that a
//! probing client learns nothing about which check failed.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use kernel::error::{app_error::AppError, kind::ErrorKind};
use platform::crypto::CryptoError;
use thiserror::Error;

/// Loader-specific result type alias
pub type LoaderResult<T> = Result<T, LoaderError>;

/// Failure taxonomy used for handling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed or out-of-order handshake step; session discarded, no retry
    Protocol,
    /// Origin mismatch, bad signature, replay, stale timestamp
    SecurityViolation,
    /// Downstream store or authority unavailable; retry with backoff
    TransientUnavailable,
    /// Tag mismatch or malformed ciphertext; fail closed
    DataIntegrity,
    Internal,
}

/// Loader-specific error variants
#[derive(Debug, Error)]
pub enum LoaderError {
    /// Handshake session unknown, expired, or already consumed
    #[error("Handshake session not found or expired")]
    SessionNotFound,

    /// Completion came from a different address than initiation
    #[error("Origin address mismatch")]
    OriginMismatch,

    /// Challenge signature does not verify under the declared key
    #[error("Invalid challenge signature")]
    InvalidSignature,

    /// Malformed handshake input (bad key, bad encoding)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Nonce already used within its validity window
    #[error("Replay detected")]
    ReplayDetected,

    /// Timestamp outside the accepted window
    #[error("Stale or skewed timestamp")]
    StaleTimestamp,

    /// Request MAC did not verify
    #[error("Invalid request signature")]
    RequestSignatureInvalid,

    /// License authority refused the credentials or key
    #[error("Credentials rejected: {0}")]
    CredentialsRejected(String),

    /// Session token missing, forged, expired or revoked
    #[error("Invalid session token")]
    InvalidSessionToken,

    /// Downstream call timed out or is unreachable
    #[error("Temporarily unavailable: {0}")]
    TransientUnavailable(String),

    /// Authenticated decryption failed
    #[error("Integrity check failed")]
    Integrity,

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LoaderError {
    pub fn class(&self) -> ErrorClass {
        match self {
            LoaderError::SessionNotFound | LoaderError::Protocol(_) => ErrorClass::Protocol,
            LoaderError::OriginMismatch
            | LoaderError::InvalidSignature
            | LoaderError::ReplayDetected
            | LoaderError::StaleTimestamp
            | LoaderError::RequestSignatureInvalid
            | LoaderError::InvalidSessionToken
            | LoaderError::CredentialsRejected(_) => ErrorClass::SecurityViolation,
            LoaderError::TransientUnavailable(_) => ErrorClass::TransientUnavailable,
            LoaderError::Database(e) => match e {
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => {
                    ErrorClass::TransientUnavailable
                }
                _ => ErrorClass::Internal,
            },
            LoaderError::Integrity => ErrorClass::DataIntegrity,
            LoaderError::Internal(_) => ErrorClass::Internal,
        }
    }

    /// Get the ErrorKind for this error
    pub fn kind(&self) -> ErrorKind {
        match self.class() {
            ErrorClass::Protocol | ErrorClass::SecurityViolation => ErrorKind::Unauthorized,
            ErrorClass::DataIntegrity => ErrorKind::BadRequest,
            ErrorClass::TransientUnavailable => ErrorKind::ServiceUnavailable,
            ErrorClass::Internal => ErrorKind::InternalServerError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.kind().status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Log the error with appropriate level
    fn log(&self) {
        match self.class() {
            ErrorClass::SecurityViolation => {
                tracing::warn!(error = %self, "Loader security violation");
            }
            ErrorClass::TransientUnavailable => {
                tracing::warn!(error = %self, "Loader dependency unavailable");
            }
            ErrorClass::Internal => {
                tracing::error!(error = %self, "Loader internal error");
            }
            ErrorClass::Protocol | ErrorClass::DataIntegrity => {
                tracing::debug!(error = %self, "Loader request rejected");
            }
        }
    }
}

impl From<LoaderError> for AppError {
    fn from(err: LoaderError) -> Self {
        match err.class() {
            // Generic signal only; the detailed reason stays in the logs
            ErrorClass::Protocol | ErrorClass::SecurityViolation => {
                AppError::unauthorized("unauthorized")
            }
            ErrorClass::DataIntegrity => AppError::bad_request("integrity check failed"),
            ErrorClass::TransientUnavailable => {
                AppError::service_unavailable("temporarily unavailable").with_source(err)
            }
            ErrorClass::Internal => AppError::internal("internal error").with_source(err),
        }
    }
}

impl IntoResponse for LoaderError {
    fn into_response(self) -> Response {
        self.log();
        match self.class() {
            // Return empty body for security (don't leak details)
            ErrorClass::Protocol | ErrorClass::SecurityViolation => {
                (StatusCode::UNAUTHORIZED, ()).into_response()
            }
            _ => AppError::from(self).into_response(),
        }
    }
}

impl From<CryptoError> for LoaderError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Integrity | CryptoError::Decryption => LoaderError::Integrity,
            CryptoError::SignatureInvalid => LoaderError::InvalidSignature,
            CryptoError::InvalidKey(msg) | CryptoError::InvalidEncoding(msg) => {
                LoaderError::Protocol(msg)
            }
            CryptoError::Encryption | CryptoError::KeyGeneration(_) => {
                LoaderError::Internal(err.to_string())
            }
        }
    }
}
