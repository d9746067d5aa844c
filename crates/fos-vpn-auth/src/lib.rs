//! fOS VPN Auth - Certificate trust for WireGuard sessions
//!
//! Keeps the client's Ed25519 identity, obtains short-lived certificates
//! for it and drives the local agent that authenticates the tunnel with
//! them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Host Application                       │
//! │                                                              │
//! │  ┌────────────────────┐  events   ┌──────────────────────┐   │
//! │  │ LocalAgentController│◀─────────│  Agent Session       │   │
//! │  │                    │──────────▶│  (AgentHost)         │   │
//! │  └─────────┬──────────┘  connect  └──────────────────────┘   │
//! │            │ refresh                                         │
//! │            ▼                                                 │
//! │  ┌────────────────────┐  issue    ┌──────────────────────┐   │
//! │  │ CertificateRefresh │──────────▶│  CertificateIssuer   │───┼──▶ API
//! │  └─────────┬──────────┘           └──────────────────────┘   │
//! │            ▼                                                 │
//! │  ┌────────────────────┐           ┌──────────────────────┐   │
//! │  │     KeyStore       │           │  MaintenanceWatcher  │   │
//! │  │ (CredentialVault)  │           │  (quick connect)     │   │
//! │  └────────────────────┘           └──────────────────────┘   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Features
//!
//! - **Key Store**: get-or-create key pair and cached certificate
//! - **Refresh**: one-shot, cancelable, single key-conflict retry
//! - **Controller**: agent error recovery and feature reconciliation
//! - **Maintenance**: flag-gated polling with server switch
//!
//! The host application provides the transport, the agent, alerts, the
//! settings store and the tunnel through the traits re-exported below.

mod agent;
mod alerts;
mod certificate;
mod config;
mod controller;
mod gateway;
mod issuer;
mod keys;
mod maintenance;
mod refresh;
mod settings;
mod store;

#[cfg(test)]
mod testing;

pub use agent::{
    AgentConfiguration, AgentError, AgentEvent, AgentHost, AgentSession, AgentSessionState,
    Recovery, SessionId,
};
pub use alerts::{AccountPlan, Alert, AlertSink, ReconnectReason};
pub use certificate::{
    AuthenticationData, Certificate, CertificateError, CertificateRequest, FeatureSet, NatType,
    NetShieldType,
};
pub use config::{AuthConfig, ConfigError};
pub use controller::LocalAgentController;
pub use gateway::VpnGateway;
pub use issuer::{
    CertificateIssuer, IssueError, Transport, TransportError, CODE_CERTIFICATE_RATE_LIMIT,
    CODE_KEY_CONFLICT, CODE_TOO_MANY_REQUESTS,
};
pub use keys::{KeyError, KeyPair, PrivateKey, PublicKey};
pub use maintenance::{CheckError, MaintenanceCheck, MaintenanceWatcher};
pub use refresh::{
    needs_refresh, CertificateRefresh, RefreshError, RefreshOutcome, RefreshState,
    DEFAULT_REFRESH_MARGIN_SECS,
};
pub use settings::{
    AuthenticationType, ConnectionRecord, FeatureFlags, MemorySettings, SettingsStore,
    SettingsValues, TransportProtocol, VpnProtocol,
};
pub use store::{CredentialVault, FileVault, KeyStore, MemoryVault, StoreError, VaultItem};
