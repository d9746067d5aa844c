//! Certificate Refresh
//!
//! One-shot task that makes sure a usable certificate exists for the
//! current key pair and yields the authentication data for it.
//!
//! # States
//!
//! ```text
//! Idle ──▶ Checking ──(cached cert still good)──▶ Done
//!             │
//!             ▼
//!          Issuing ──(issued / failed)──▶ Done
//!             │
//!             └─(first key conflict)─▶ rotate keys ─▶ Checking
//!
//! cancellation at any check point ──▶ Canceled
//! ```
//!
//! Cancellation is cooperative: it is checked on entry, before issuing,
//! while waiting for the issuer and once the answer arrives. Nothing is
//! written to the store after a cancellation has been observed. A
//! certificate issued for keys that were replaced in the meantime is
//! dropped and the refresh ends as `Canceled`.

use crate::certificate::{AuthenticationData, Certificate, FeatureSet};
use crate::issuer::{CertificateIssuer, IssueError};
use crate::store::{KeyStore, StoreError};
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default safety margin before expiry (3 hours)
pub const DEFAULT_REFRESH_MARGIN_SECS: i64 = 3 * 60 * 60;

/// Refresh operation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Checking,
    Issuing,
    Done,
    Canceled,
}

/// Terminal result of a refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Success(AuthenticationData),
    Failure(RefreshError),
    Canceled,
}

/// Refresh failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error(transparent)]
    Issue(#[from] IssueError),

    #[error("Key store error: {0}")]
    Store(#[from] StoreError),
}

impl RefreshError {
    /// Rate-limited failures get their own user alert
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RefreshError::Issue(e) if e.is_rate_limited())
    }
}

/// Does `cached` need to be replaced?
///
/// True when there is no certificate, when it expires within `margin`,
/// or when `features` are requested that it was not issued with.
pub fn needs_refresh(
    cached: Option<&Certificate>,
    features: Option<&FeatureSet>,
    margin: TimeDelta,
    now: DateTime<Utc>,
) -> bool {
    let Some(certificate) = cached else {
        return true;
    };

    if certificate.expires_within(margin, now) {
        return true;
    }

    match features {
        Some(requested) => certificate.features.as_ref() != Some(requested),
        None => false,
    }
}

/// Certificate Refresh Operation
pub struct CertificateRefresh {
    store: Arc<KeyStore>,
    issuer: CertificateIssuer,
    features: Option<FeatureSet>,
    margin: TimeDelta,
    cancel: CancellationToken,
    state: RefreshState,
    /// Set after the single key-conflict recovery
    is_retry: bool,
}

impl CertificateRefresh {
    /// Create a refresh over the given store and issuer
    pub fn new(store: Arc<KeyStore>, issuer: CertificateIssuer) -> Self {
        Self {
            store,
            issuer,
            features: None,
            margin: TimeDelta::seconds(DEFAULT_REFRESH_MARGIN_SECS),
            cancel: CancellationToken::new(),
            state: RefreshState::Idle,
            is_retry: false,
        }
    }

    /// Request a certificate carrying these features
    pub fn with_features(mut self, features: FeatureSet) -> Self {
        self.features = Some(features);
        self
    }

    /// Override the expiry safety margin
    pub fn with_margin(mut self, margin: TimeDelta) -> Self {
        self.margin = margin;
        self
    }

    /// Use an externally owned cancellation token
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels this operation from another task
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current state
    pub fn state(&self) -> RefreshState {
        self.state
    }

    /// Run to completion. Consumes the operation, so the outcome is
    /// delivered exactly once.
    pub async fn run(mut self) -> RefreshOutcome {
        let outcome = match self.execute().await {
            Ok(outcome) => outcome,
            Err(e) => RefreshOutcome::Failure(e),
        };

        let terminal = match outcome {
            RefreshOutcome::Canceled => RefreshState::Canceled,
            _ => RefreshState::Done,
        };
        self.transition(terminal);

        outcome
    }

    async fn execute(&mut self) -> Result<RefreshOutcome, RefreshError> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(RefreshOutcome::Canceled);
            }

            self.transition(RefreshState::Checking);
            let (keys, cached) = self.store.snapshot()?;

            match cached {
                Some(ref certificate)
                    if !needs_refresh(Some(certificate), self.features.as_ref(), self.margin, Utc::now()) =>
                {
                    debug!(
                        "Cached certificate does not need refreshing (valid until {})",
                        certificate.valid_until
                    );
                    return Ok(RefreshOutcome::Success(AuthenticationData::new(
                        keys.private,
                        certificate,
                    )));
                }
                Some(ref certificate) => {
                    debug!("Cached certificate valid until {}, refreshing", certificate.valid_until)
                }
                None => debug!("No cached certificate found"),
            }

            if self.cancel.is_cancelled() {
                return Ok(RefreshOutcome::Canceled);
            }

            self.transition(RefreshState::Issuing);
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(RefreshOutcome::Canceled),
                result = self.issuer.issue(&keys.public, self.features) => result,
            };

            if self.cancel.is_cancelled() {
                return Ok(RefreshOutcome::Canceled);
            }

            match result {
                Ok(certificate) => {
                    if !self.store.store_certificate_for(&keys.public, &certificate)? {
                        info!("Client keys replaced during issuance, dropping certificate");
                        return Ok(RefreshOutcome::Canceled);
                    }
                    return Ok(RefreshOutcome::Success(AuthenticationData::new(
                        keys.private,
                        &certificate,
                    )));
                }
                Err(IssueError::KeyConflict) if !self.is_retry => {
                    info!("Key conflict reported, generating new keys and trying again");
                    self.is_retry = true;
                    self.store.rotate_keys()?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn transition(&mut self, next: RefreshState) {
        debug!("Certificate refresh: {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}
