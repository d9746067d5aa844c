//! Certificate Issuer
//!
//! Maps a public key to a signed certificate through the backend
//! transport. Failures come back as typed [`IssueError`]s; this layer
//! never retries.

use crate::certificate::{Certificate, CertificateError, CertificateRequest, FeatureSet};
use crate::keys::PublicKey;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error};

/// API code: client public key fingerprint collides with another registration
pub const CODE_KEY_CONFLICT: i64 = 2500;
/// HTTP 429
pub const CODE_TOO_MANY_REQUESTS: i64 = 429;
/// API code: too many certificate requests
pub const CODE_CERTIFICATE_RATE_LIMIT: i64 = 85092;

/// HTTP/JSON channel to the certificate endpoint
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, request: CertificateRequest)
    -> Result<serde_json::Value, TransportError>;
}

/// Transport failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Backend answered with an error code
    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    /// No usable answer (connectivity, timeout)
    #[error("Network error: {0}")]
    Network(String),
}

/// Issuance failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IssueError {
    #[error("Client public key conflicts with an existing registration")]
    KeyConflict,

    #[error("Too many certificate requests")]
    RateLimited,

    #[error("Certificate request failed ({code}): {message}")]
    Other { code: i64, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid certificate response: {0}")]
    InvalidResponse(#[from] CertificateError),
}

impl IssueError {
    /// Is this the rate-limit class surfaced to the user?
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, IssueError::RateLimited)
    }
}

impl From<TransportError> for IssueError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Api { code, .. } if code == CODE_KEY_CONFLICT => IssueError::KeyConflict,
            TransportError::Api { code, .. }
                if code == CODE_TOO_MANY_REQUESTS || code == CODE_CERTIFICATE_RATE_LIMIT =>
            {
                IssueError::RateLimited
            }
            TransportError::Api { code, message } => IssueError::Other { code, message },
            TransportError::Network(message) => IssueError::Network(message),
        }
    }
}

/// Certificate Issuer
#[derive(Clone)]
pub struct CertificateIssuer {
    transport: Arc<dyn Transport>,
}

impl CertificateIssuer {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Ask the backend to sign `public_key`
    pub async fn issue(
        &self,
        public_key: &PublicKey,
        features: Option<FeatureSet>,
    ) -> Result<Certificate, IssueError> {
        debug!("Asking backend for a new certificate ({:?})", public_key);

        let request = CertificateRequest::new(public_key, features);
        let body = self.transport.request(request).await.map_err(|e| {
            error!("Failed to get certificate from backend: {}", e);
            IssueError::from(e)
        })?;

        let certificate = Certificate::from_response(&body, features).map_err(|e| {
            error!("Failed to decode certificate from backend: {}", e);
            IssueError::from(e)
        })?;

        debug!("Got new certificate valid until {}", certificate.valid_until);
        Ok(certificate)
    }
}
