//! Settings Store
//!
//! The subset of user settings the authentication core reads and writes.
//! Persistence belongs to the host application; [`MemorySettings`] keeps
//! them in process.

use crate::alerts::AccountPlan;
use crate::certificate::{FeatureSet, NatType, NetShieldType};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

/// How a protocol authenticates the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationType {
    Credentials,
    Certificate,
}

/// OpenVPN transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    Tcp,
    Udp,
}

/// VPN protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VpnProtocol {
    Ike,
    OpenVpn(TransportProtocol),
    WireGuard,
}

impl VpnProtocol {
    /// Only WireGuard sessions are certificate-authenticated
    pub fn authentication_type(&self) -> AuthenticationType {
        match self {
            VpnProtocol::WireGuard => AuthenticationType::Certificate,
            VpnProtocol::Ike | VpnProtocol::OpenVpn(_) => AuthenticationType::Credentials,
        }
    }

    pub fn uses_certificate(&self) -> bool {
        self.authentication_type() == AuthenticationType::Certificate
    }
}

/// Backend-controlled feature switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Poll the connected server for upcoming maintenance
    #[serde(default)]
    pub server_refresh: bool,
}

/// Last connection the user made
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    /// Server hostname the agent talks to
    pub server: String,
    pub protocol: VpnProtocol,
    pub netshield: NetShieldType,
}

/// Settings read and written by the controller and watcher
pub trait SettingsStore: Send + Sync {
    /// NetShield level, `None` if never set
    fn netshield(&self) -> Option<NetShieldType>;
    fn set_netshield(&self, value: NetShieldType);

    fn vpn_accelerator(&self) -> bool;
    fn set_vpn_accelerator(&self, enabled: bool);

    fn nat_type(&self) -> NatType;
    fn set_nat_type(&self, value: NatType);

    fn protocol(&self) -> Option<VpnProtocol>;
    fn set_protocol(&self, protocol: VpnProtocol);

    fn feature_flags(&self) -> FeatureFlags;

    /// Maintenance poll interval in minutes
    fn maintenance_interval_minutes(&self) -> u64;

    /// Last known account tier
    fn account_plan(&self) -> Option<AccountPlan>;

    fn active_connection(&self) -> Option<ConnectionRecord>;
    fn set_active_connection(&self, record: Option<ConnectionRecord>);

    /// Features the client currently assumes
    fn features(&self) -> FeatureSet {
        FeatureSet {
            netshield: self.netshield().unwrap_or_default(),
            vpn_accelerator: self.vpn_accelerator(),
            nat_type: self.nat_type(),
        }
    }
}

/// Plain settings values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsValues {
    #[serde(default)]
    pub netshield: Option<NetShieldType>,
    #[serde(default = "default_true")]
    pub vpn_accelerator: bool,
    #[serde(default)]
    pub nat_type: NatType,
    #[serde(default)]
    pub protocol: Option<VpnProtocol>,
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_minutes: u64,
    #[serde(default)]
    pub account_plan: Option<AccountPlan>,
    #[serde(default)]
    pub feature_flags: FeatureFlags,
    #[serde(default)]
    pub active_connection: Option<ConnectionRecord>,
}

fn default_true() -> bool {
    true
}

fn default_maintenance_interval() -> u64 {
    10
}

impl Default for SettingsValues {
    fn default() -> Self {
        Self {
            netshield: None,
            vpn_accelerator: true,
            nat_type: NatType::default(),
            protocol: Some(VpnProtocol::WireGuard),
            maintenance_interval_minutes: default_maintenance_interval(),
            account_plan: None,
            feature_flags: FeatureFlags::default(),
            active_connection: None,
        }
    }
}

/// In-process settings store
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: Mutex<SettingsValues>,
}

impl MemorySettings {
    pub fn new(values: SettingsValues) -> Self {
        Self {
            values: Mutex::new(values),
        }
    }

    /// Copy of the current values
    pub fn values(&self) -> SettingsValues {
        self.lock().clone()
    }

    pub fn set_feature_flags(&self, flags: FeatureFlags) {
        self.lock().feature_flags = flags;
    }

    pub fn set_maintenance_interval_minutes(&self, minutes: u64) {
        self.lock().maintenance_interval_minutes = minutes;
    }

    pub fn set_account_plan(&self, plan: Option<AccountPlan>) {
        self.lock().account_plan = plan;
    }

    fn lock(&self) -> MutexGuard<'_, SettingsValues> {
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SettingsStore for MemorySettings {
    fn netshield(&self) -> Option<NetShieldType> {
        self.lock().netshield
    }

    fn set_netshield(&self, value: NetShieldType) {
        self.lock().netshield = Some(value);
    }

    fn vpn_accelerator(&self) -> bool {
        self.lock().vpn_accelerator
    }

    fn set_vpn_accelerator(&self, enabled: bool) {
        self.lock().vpn_accelerator = enabled;
    }

    fn nat_type(&self) -> NatType {
        self.lock().nat_type
    }

    fn set_nat_type(&self, value: NatType) {
        self.lock().nat_type = value;
    }

    fn protocol(&self) -> Option<VpnProtocol> {
        self.lock().protocol
    }

    fn set_protocol(&self, protocol: VpnProtocol) {
        self.lock().protocol = Some(protocol);
    }

    fn feature_flags(&self) -> FeatureFlags {
        self.lock().feature_flags
    }

    fn maintenance_interval_minutes(&self) -> u64 {
        self.lock().maintenance_interval_minutes
    }

    fn account_plan(&self) -> Option<AccountPlan> {
        self.lock().account_plan
    }

    fn active_connection(&self) -> Option<ConnectionRecord> {
        self.lock().active_connection.clone()
    }

    fn set_active_connection(&self, record: Option<ConnectionRecord>) {
        self.lock().active_connection = record;
    }
}
