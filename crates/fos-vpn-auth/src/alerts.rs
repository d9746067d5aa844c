//! User-visible Alerts
//!
//! The controller and the maintenance watcher are the only producers.
//! Presentation is up to the [`AlertSink`] implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Subscription tier of the signed-in account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountPlan {
    Free,
    Basic,
    Plus,
    Pro,
    Visionary,
    Unknown,
}

impl AccountPlan {
    /// Display name
    pub fn name(&self) -> &'static str {
        match self {
            AccountPlan::Free => "Free",
            AccountPlan::Basic => "Basic",
            AccountPlan::Plus => "Plus",
            AccountPlan::Pro => "Pro",
            AccountPlan::Visionary => "Visionary",
            AccountPlan::Unknown => "Unknown",
        }
    }

    /// Simultaneous sessions allowed on this tier
    pub fn max_sessions(&self) -> Option<u32> {
        match self {
            AccountPlan::Free => Some(1),
            AccountPlan::Basic => Some(2),
            AccountPlan::Plus | AccountPlan::Pro => Some(5),
            AccountPlan::Visionary => Some(10),
            AccountPlan::Unknown => None,
        }
    }
}

impl fmt::Display for AccountPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Why a reconnect confirmation is requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectReason {
    ProtocolChange,
}

/// Alerts pushed to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alert {
    TooManyCertificateRequests,
    CertificateRefreshError,
    MaxSessions { plan: AccountPlan },
    ServerError,
    DelinquentAccount,
    LowPlan,
    ServerOnMaintenance,
    ReconnectConfirmation { reason: ReconnectReason },
}

impl Alert {
    /// Short user-facing message
    pub fn message(&self) -> String {
        match self {
            Alert::TooManyCertificateRequests => {
                "Too many certificate requests. Please try again later.".to_string()
            }
            Alert::CertificateRefreshError => {
                "Could not refresh the connection certificate. The VPN was disconnected.".to_string()
            }
            Alert::MaxSessions { plan } => match plan.max_sessions() {
                Some(limit) => format!(
                    "Your {} plan allows {} simultaneous VPN sessions. Disconnect another device to continue.",
                    plan, limit
                ),
                None => "You have reached the maximum number of VPN sessions.".to_string(),
            },
            Alert::ServerError => "The VPN server reported an error. The VPN was disconnected.".to_string(),
            Alert::DelinquentAccount => {
                "Your account has unpaid invoices. The VPN was disconnected.".to_string()
            }
            Alert::LowPlan => "This server is not available on your plan. Please upgrade.".to_string(),
            Alert::ServerOnMaintenance => {
                "The server is going into maintenance. Reconnecting to another server.".to_string()
            }
            Alert::ReconnectConfirmation { reason } => match reason {
                ReconnectReason::ProtocolChange => {
                    "Changing the protocol requires a reconnect. Continue?".to_string()
                }
            },
        }
    }
}

/// Fire-and-forget alert presenter
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn push(&self, alert: Alert);

    /// Present an alert that needs a yes/no answer. Declines by default.
    async fn confirm(&self, alert: Alert) -> bool {
        self.push(alert);
        false
    }
}
