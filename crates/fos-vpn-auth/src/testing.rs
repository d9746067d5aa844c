//! Recording fakes for the external collaborators.

use crate::agent::{AgentConfiguration, AgentHost, AgentSession, SessionId};
use crate::alerts::{Alert, AlertSink};
use crate::certificate::{AuthenticationData, CertificateRequest, FeatureSet};
use crate::controller::LocalAgentController;
use crate::gateway::VpnGateway;
use crate::issuer::{CertificateIssuer, Transport, TransportError};
use crate::settings::{ConnectionRecord, MemorySettings, SettingsValues, VpnProtocol};
use crate::store::KeyStore;
use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const SERVER: &str = "node-de-01.example.net";

/// Answers from a queue; an empty queue never answers
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<serde_json::Value, TransportError>>>,
    pub requests: Mutex<Vec<CertificateRequest>>,
}

impl ScriptedTransport {
    pub fn with(responses: Vec<Result<serde_json::Value, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn request(&self, request: CertificateRequest) -> Result<serde_json::Value, TransportError> {
        self.requests.lock().unwrap().push(request);
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(response) => response,
            None => std::future::pending().await,
        }
    }
}

pub fn issued(name: &str) -> Result<serde_json::Value, TransportError> {
    Ok(json!({
        "Certificate": name,
        "ExpirationTime": (Utc::now() + TimeDelta::hours(24)).timestamp(),
    }))
}

pub fn api_error(code: i64) -> Result<serde_json::Value, TransportError> {
    Err(TransportError::Api {
        code,
        message: format!("error {}", code),
    })
}

/// Calls made on agent sessions, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCall {
    Connect(SessionId, AuthenticationData, AgentConfiguration),
    Disconnect(SessionId),
    UpdateFeatures(SessionId, FeatureSet),
}

#[derive(Default)]
pub struct RecordingHost {
    pub calls: Arc<Mutex<Vec<SessionCall>>>,
}

impl RecordingHost {
    pub fn calls(&self) -> Vec<SessionCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn connects(&self) -> Vec<(SessionId, AuthenticationData)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SessionCall::Connect(id, data, _) => Some((id, data)),
                _ => None,
            })
            .collect()
    }

    pub fn disconnects(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, SessionCall::Disconnect(_)))
            .count()
    }
}

struct RecordingSession {
    id: SessionId,
    calls: Arc<Mutex<Vec<SessionCall>>>,
}

impl AgentSession for RecordingSession {
    fn connect(&mut self, data: &AuthenticationData, configuration: &AgentConfiguration) {
        self.calls.lock().unwrap().push(SessionCall::Connect(
            self.id,
            data.clone(),
            configuration.clone(),
        ));
    }

    fn disconnect(&mut self) {
        self.calls.lock().unwrap().push(SessionCall::Disconnect(self.id));
    }

    fn update_features(&mut self, features: &FeatureSet) {
        self.calls
            .lock()
            .unwrap()
            .push(SessionCall::UpdateFeatures(self.id, *features));
    }
}

impl AgentHost for RecordingHost {
    fn create_session(&self, id: SessionId) -> Box<dyn AgentSession> {
        Box::new(RecordingSession {
            id,
            calls: self.calls.clone(),
        })
    }
}

#[derive(Default)]
pub struct RecordingAlerts {
    pub alerts: Mutex<Vec<Alert>>,
    pub accept: AtomicBool,
}

impl RecordingAlerts {
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertSink for RecordingAlerts {
    fn push(&self, alert: Alert) {
        self.alerts.lock().unwrap().push(alert);
    }

    async fn confirm(&self, alert: Alert) -> bool {
        self.push(alert);
        self.accept.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct RecordingGateway {
    pub connected: AtomicBool,
    pub disconnects: AtomicUsize,
    pub reconnects: AtomicUsize,
    pub quick_connects: AtomicUsize,
}

impl VpnGateway for RecordingGateway {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn quick_connect(&self) {
        self.quick_connects.fetch_add(1, Ordering::SeqCst);
    }
}

/// WireGuard settings with a known active server
pub fn wireguard_settings() -> MemorySettings {
    MemorySettings::new(SettingsValues {
        protocol: Some(VpnProtocol::WireGuard),
        active_connection: Some(ConnectionRecord {
            server: SERVER.to_string(),
            protocol: VpnProtocol::WireGuard,
            netshield: Default::default(),
        }),
        ..SettingsValues::default()
    })
}

/// Controller wired to recording fakes
pub struct Harness {
    pub store: Arc<KeyStore>,
    pub transport: Arc<ScriptedTransport>,
    pub host: Arc<RecordingHost>,
    pub alerts: Arc<RecordingAlerts>,
    pub settings: Arc<MemorySettings>,
    pub gateway: Arc<RecordingGateway>,
    pub controller: Arc<LocalAgentController>,
}

impl Harness {
    pub fn new(responses: Vec<Result<serde_json::Value, TransportError>>) -> Self {
        Self::with_settings(responses, wireguard_settings())
    }

    pub fn with_settings(
        responses: Vec<Result<serde_json::Value, TransportError>>,
        settings: MemorySettings,
    ) -> Self {
        let store = Arc::new(KeyStore::in_memory());
        let transport = ScriptedTransport::with(responses);
        let host = Arc::new(RecordingHost::default());
        let alerts = Arc::new(RecordingAlerts::default());
        let settings = Arc::new(settings);
        let gateway = Arc::new(RecordingGateway::default());

        let controller = Arc::new(LocalAgentController::new(
            store.clone(),
            CertificateIssuer::new(transport.clone()),
            host.clone(),
            alerts.clone(),
            settings.clone(),
            gateway.clone(),
        ));

        Self {
            store,
            transport,
            host,
            alerts,
            settings,
            gateway,
            controller,
        }
    }
}
