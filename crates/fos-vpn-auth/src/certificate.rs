//! Certificates and Connection Features
//!
//! Data types exchanged with the certificate endpoint and handed to the
//! local agent.

use crate::keys::{PrivateKey, PublicKey};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Ad/malware blocking tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetShieldType {
    #[default]
    Off,
    /// Malware blocking
    Level1,
    /// Malware, ads and trackers
    Level2,
}

impl NetShieldType {
    /// Numeric level used on the wire
    pub fn level(&self) -> u8 {
        match self {
            NetShieldType::Off => 0,
            NetShieldType::Level1 => 1,
            NetShieldType::Level2 => 2,
        }
    }
}

/// NAT behaviour of the exit server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NatType {
    #[default]
    StrictNat,
    ModerateNat,
}

impl NatType {
    /// Strict NAT is expressed as randomized NAT on the wire
    pub fn random_nat(&self) -> bool {
        matches!(self, NatType::StrictNat)
    }
}

/// Optional behaviours granted to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureSet {
    pub netshield: NetShieldType,
    pub vpn_accelerator: bool,
    pub nat_type: NatType,
}

impl FeatureSet {
    /// Wire representation for certificate requests
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "NetShieldLevel": self.netshield.level(),
            "SplitTCP": self.vpn_accelerator,
            "RandomNAT": self.nat_type.random_nat(),
        })
    }
}

impl Default for FeatureSet {
    fn default() -> Self {
        Self {
            netshield: NetShieldType::Off,
            vpn_accelerator: true,
            nat_type: NatType::StrictNat,
        }
    }
}

/// Signed client certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    /// Opaque signed blob (PEM)
    pub certificate: String,
    /// Absolute expiry
    pub valid_until: DateTime<Utc>,
    /// Server-suggested refresh time
    #[serde(default)]
    pub refresh_at: Option<DateTime<Utc>>,
    /// Features the certificate was requested with
    #[serde(default)]
    pub features: Option<FeatureSet>,
}

/// Response body of the certificate endpoint
#[derive(Debug, Deserialize)]
struct CertificateResponse {
    #[serde(rename = "Certificate")]
    certificate: String,
    #[serde(rename = "ExpirationTime")]
    expiration_time: i64,
    #[serde(rename = "RefreshTime", default)]
    refresh_time: Option<i64>,
}

impl Certificate {
    /// Create a certificate without refresh hint or feature record
    pub fn new(certificate: impl Into<String>, valid_until: DateTime<Utc>) -> Self {
        Self {
            certificate: certificate.into(),
            valid_until,
            refresh_at: None,
            features: None,
        }
    }

    /// Decode an issuance response
    pub fn from_response(
        body: &serde_json::Value,
        features: Option<FeatureSet>,
    ) -> Result<Self, CertificateError> {
        let response: CertificateResponse = serde_json::from_value(body.clone())
            .map_err(|e| CertificateError::Malformed(e.to_string()))?;

        let valid_until = DateTime::<Utc>::from_timestamp(response.expiration_time, 0)
            .ok_or(CertificateError::InvalidTimestamp(response.expiration_time))?;
        let refresh_at = match response.refresh_time {
            Some(secs) => Some(
                DateTime::<Utc>::from_timestamp(secs, 0).ok_or(CertificateError::InvalidTimestamp(secs))?,
            ),
            None => None,
        };

        Ok(Self {
            certificate: response.certificate,
            valid_until,
            refresh_at,
            features,
        })
    }

    /// Does the certificate expire before `now + margin`?
    pub fn expires_within(&self, margin: TimeDelta, now: DateTime<Utc>) -> bool {
        self.valid_until < now + margin
    }
}

/// Credentials handed to an agent session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationData {
    pub client_key: PrivateKey,
    pub client_certificate: String,
}

impl AuthenticationData {
    pub fn new(client_key: PrivateKey, certificate: &Certificate) -> Self {
        Self {
            client_key,
            client_certificate: certificate.certificate.clone(),
        }
    }
}

/// Request for a new certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    /// Client public key (PEM)
    pub client_public_key: String,
    pub features: Option<FeatureSet>,
}

impl CertificateRequest {
    pub fn new(public_key: &PublicKey, features: Option<FeatureSet>) -> Self {
        Self {
            client_public_key: public_key.to_pem(),
            features,
        }
    }

    /// JSON body for the certificate endpoint
    pub fn to_json(&self) -> serde_json::Value {
        let mut body = json!({
            "ClientPublicKey": self.client_public_key,
            "ClientPublicKeyMode": "EC",
        });
        if let Some(features) = &self.features {
            body["Features"] = features.to_json();
        }
        body
    }
}

/// Certificate decoding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CertificateError {
    #[error("Malformed certificate response: {0}")]
    Malformed(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),
}
