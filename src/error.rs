/// Unified error types for the OCSP responder
use crate::ocsp::{asn1::OcspResponseStatus, response::error_response};
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Main error type for the responder
#[derive(Error, Debug)]
pub enum ResponderError {
    /// The request bytes are not a valid DER `OCSPRequest`
    #[error("Malformed OCSP request: {0}")]
    MalformedRequest(String),

    /// CertID hash algorithm is not one we can match against the CA
    #[error("Unsupported hash algorithm: {0}")]
    UnsupportedHashAlgorithm(String),

    /// Revocation store I/O failed
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    /// Response could not be signed with the responder key
    #[error("Signing failure: {0}")]
    SigningFailure(String),

    /// Serial number already carries a revocation entry
    #[error("Certificate {0:016x} is already revoked")]
    AlreadyRevoked(u64),

    /// Revocation reason code outside the CRLReason enumeration (or reserved 7)
    #[error("Invalid revocation reason code: {0}")]
    InvalidReason(i64),

    /// Key material or certificate chain problems found at startup
    #[error("Responder identity error: {0}")]
    Identity(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Stop requested but no responder is running
    #[error("OCSP responder is not running: {0}")]
    NotRunning(String),

    /// Start requested while another instance holds the PID file
    #[error("OCSP responder is already running with pid {0}")]
    AlreadyRunning(u32),

    /// DER encoding errors while assembling a response
    #[error("Encoding error: {0}")]
    Encoding(#[from] der::Error),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ResponderError {
    /// OCSP response status a client receives when a request fails with this error
    pub fn ocsp_status(&self) -> OcspResponseStatus {
        match self {
            ResponderError::MalformedRequest(_) | ResponderError::UnsupportedHashAlgorithm(_) => {
                OcspResponseStatus::MalformedRequest
            }
            ResponderError::StoreUnavailable(_) => OcspResponseStatus::TryLater,
            _ => OcspResponseStatus::InternalError,
        }
    }
}

/// Errors render as unsigned `OCSPResponse` bodies with HTTP 200.
impl IntoResponse for ResponderError {
    fn into_response(self) -> Response {
        let status = self.ocsp_status();
        if status == OcspResponseStatus::InternalError {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, ?status, "request rejected");
        }

        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, crate::server::OCSP_RESPONSE_CONTENT_TYPE)],
            error_response(status),
        )
            .into_response()
    }
}

/// Result type alias for responder operations
pub type ResponderResult<T> = Result<T, ResponderError>;
