//! Local Agent Types
//!
//! The local agent holds the authenticated control session with the VPN
//! server. It is driven by the host application; this module only models
//! what it reports and what it accepts.

use crate::alerts::{AccountPlan, Alert};
use crate::certificate::{AuthenticationData, FeatureSet};
use std::fmt;

/// Identifier handed to a session at creation.
///
/// Events carry it back so the controller can drop reports from sessions
/// it has already replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl SessionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Session({})", self.0)
    }
}

/// Agent session state (reported by the agent)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentSessionState {
    Disconnected,
    Connecting,
    Connected,
    /// Agent rejected the client certificate while connecting
    ClientCertificateError,
}

/// Errors reported by the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentError {
    CertificateExpired,
    CertificateNotProvided,
    BadCertificateSignature,
    CertificateRevoked,
    KeyUsedMultipleTimes,
    MaxSessions(AccountPlan),
    ServerError,
    /// Internal agent status, never expected by a signed-in client
    GuestSession,
    PolicyViolationDelinquent,
    PolicyViolationLowPlan,
    UserTorrentNotAllowed,
    UserBadBehavior,
    RestrictedServer,
}

/// What the controller does about an agent error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// Drop the certificate, fetch a new one, reconnect the agent
    RefreshCertificate,
    /// Replace keys and certificate, then reconnect the tunnel
    RegenerateKeys,
    /// Disconnect and show the tiered session-limit alert
    SessionLimit(AccountPlan),
    /// Disconnect and show an alert
    DisconnectWithAlert(Alert),
    /// Disconnect without an alert
    Disconnect,
    /// Status a signed-in client never expects; disconnect
    ProtocolMisuse,
    /// Agent recovers on its own
    Wait,
}

impl AgentError {
    /// Classify the error
    pub fn recovery(&self) -> Recovery {
        match self {
            AgentError::CertificateExpired | AgentError::CertificateNotProvided => {
                Recovery::RefreshCertificate
            }
            AgentError::BadCertificateSignature
            | AgentError::CertificateRevoked
            | AgentError::KeyUsedMultipleTimes => Recovery::RegenerateKeys,
            AgentError::MaxSessions(plan) => Recovery::SessionLimit(*plan),
            AgentError::ServerError => Recovery::DisconnectWithAlert(Alert::ServerError),
            AgentError::PolicyViolationDelinquent => {
                Recovery::DisconnectWithAlert(Alert::DelinquentAccount)
            }
            AgentError::PolicyViolationLowPlan => Recovery::DisconnectWithAlert(Alert::LowPlan),
            AgentError::UserTorrentNotAllowed | AgentError::UserBadBehavior => Recovery::Disconnect,
            AgentError::GuestSession => Recovery::ProtocolMisuse,
            AgentError::RestrictedServer => Recovery::Wait,
        }
    }
}

/// Configuration an agent session connects with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfiguration {
    /// Server the agent talks to
    pub hostname: String,
    pub features: FeatureSet,
}

/// Events an agent session reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    StateChanged(AgentSessionState),
    Error(AgentError),
    Features(FeatureSet),
}

/// A live agent session
pub trait AgentSession: Send {
    fn connect(&mut self, data: &AuthenticationData, configuration: &AgentConfiguration);
    fn disconnect(&mut self);
    fn update_features(&mut self, features: &FeatureSet);
}

/// Creates agent sessions
pub trait AgentHost: Send + Sync {
    fn create_session(&self, id: SessionId) -> Box<dyn AgentSession>;
}
