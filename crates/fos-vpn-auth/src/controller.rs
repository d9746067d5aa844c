//! Local Agent Controller
//!
//! Owns the local agent session for a WireGuard connection and reacts to
//! what the agent reports.
//!
//! # Usage
//!
//! ```rust,ignore
//! let controller = Arc::new(LocalAgentController::new(
//!     store, issuer, host, alerts, settings, gateway,
//! ));
//!
//! // Tunnel is up, start the agent (fetches a certificate if needed)
//! controller.connect(None).await;
//!
//! // Feed agent reports back in
//! tokio::spawn({
//!     let controller = controller.clone();
//!     async move { controller.run_events(events).await }
//! });
//! ```
//!
//! Sessions report through the event channel and must not call back into
//! the controller from their own methods.

use crate::agent::{
    AgentConfiguration, AgentError, AgentEvent, AgentHost, AgentSession, AgentSessionState,
    Recovery, SessionId,
};
use crate::alerts::{Alert, AlertSink, ReconnectReason};
use crate::certificate::{AuthenticationData, FeatureSet, NatType, NetShieldType};
use crate::gateway::VpnGateway;
use crate::issuer::CertificateIssuer;
use crate::refresh::{
    CertificateRefresh, DEFAULT_REFRESH_MARGIN_SECS, RefreshError, RefreshOutcome, needs_refresh,
};
use crate::settings::{SettingsStore, VpnProtocol};
use crate::store::KeyStore;
use chrono::{TimeDelta, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct ActiveSession {
    id: SessionId,
    session: Box<dyn AgentSession>,
}

#[derive(Default)]
struct Inner {
    session: Option<ActiveSession>,
    /// In-flight refresh and its generation
    refresh: Option<(u64, CancellationToken)>,
    refresh_generation: u64,
}

/// Drives the local agent session
pub struct LocalAgentController {
    store: Arc<KeyStore>,
    issuer: CertificateIssuer,
    host: Arc<dyn AgentHost>,
    alerts: Arc<dyn AlertSink>,
    settings: Arc<dyn SettingsStore>,
    gateway: Arc<dyn VpnGateway>,
    refresh_margin: TimeDelta,
    inner: Mutex<Inner>,
    connected: AtomicBool,
    next_session: AtomicU64,
}

impl LocalAgentController {
    pub fn new(
        store: Arc<KeyStore>,
        issuer: CertificateIssuer,
        host: Arc<dyn AgentHost>,
        alerts: Arc<dyn AlertSink>,
        settings: Arc<dyn SettingsStore>,
        gateway: Arc<dyn VpnGateway>,
    ) -> Self {
        Self {
            store,
            issuer,
            host,
            alerts,
            settings,
            gateway,
            refresh_margin: TimeDelta::seconds(DEFAULT_REFRESH_MARGIN_SECS),
            inner: Mutex::new(Inner::default()),
            connected: AtomicBool::new(false),
            next_session: AtomicU64::new(0),
        }
    }

    pub fn with_refresh_margin(mut self, margin: TimeDelta) -> Self {
        self.refresh_margin = margin;
        self
    }

    /// Last state reported by the current session was `Connected`
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Id of the current session, if any
    pub fn active_session(&self) -> Option<SessionId> {
        self.lock().session.as_ref().map(|active| active.id)
    }

    /// Start an agent session for the active connection.
    ///
    /// Without `data` the certificate is refreshed first. Does nothing for
    /// protocols that do not authenticate with a certificate.
    pub async fn connect(&self, data: Option<AuthenticationData>) {
        if !self.uses_certificate() {
            debug!("Current protocol does not use a local agent");
            return;
        }

        if let Some(data) = data {
            self.start_session(data);
            return;
        }

        match self.refresh(None).await {
            RefreshOutcome::Success(data) => self.start_session(data),
            RefreshOutcome::Failure(e) => {
                error!("Failed to get authentication data for local agent: {}", e);
                if e.is_rate_limited() {
                    self.alerts.push(Alert::TooManyCertificateRequests);
                } else {
                    self.alerts.push(Alert::CertificateRefreshError);
                }
            }
            RefreshOutcome::Canceled => debug!("Certificate refresh superseded, not connecting"),
        }
    }

    /// Stop the agent session and any refresh in flight
    pub fn disconnect(&self) {
        let mut inner = self.lock();
        if let Some((_, token)) = inner.refresh.take() {
            token.cancel();
        }
        self.connected.store(false, Ordering::SeqCst);

        if let Some(mut active) = inner.session.take() {
            debug!("Disconnecting local agent {}", active.id);
            active.session.disconnect();
        }
    }

    /// Dispatch an event, dropping those from replaced sessions
    pub async fn handle_event(&self, id: SessionId, event: AgentEvent) {
        if self.active_session() != Some(id) {
            debug!("Ignoring {:?} from stale {}", event, id);
            return;
        }

        match event {
            AgentEvent::StateChanged(state) => self.handle_state_change(state).await,
            AgentEvent::Error(error) => self.handle_error(error).await,
            AgentEvent::Features(features) => self.handle_features(features).await,
        }
    }

    /// Handle events until the channel closes
    pub async fn run_events(&self, mut events: mpsc::Receiver<(SessionId, AgentEvent)>) {
        while let Some((id, event)) = events.recv().await {
            self.handle_event(id, event).await;
        }
        debug!("Local agent event channel closed");
    }

    pub async fn handle_state_change(&self, state: AgentSessionState) {
        debug!("Local agent state changed to {:?}", state);
        self.connected
            .store(state == AgentSessionState::Connected, Ordering::SeqCst);

        if state == AgentSessionState::ClientCertificateError {
            self.handle_error(AgentError::CertificateExpired).await;
        }
    }

    pub async fn handle_error(&self, error: AgentError) {
        match error.recovery() {
            Recovery::RefreshCertificate => {
                warn!("Local agent reported {:?}, refreshing certificate", error);
                if let Err(e) = self.store.delete_certificate() {
                    warn!("Failed to delete certificate: {}", e);
                }
                if let Some(data) = self.refresh_or_disconnect().await {
                    info!("Reconnecting local agent with new certificate");
                    self.start_session(data);
                }
            }
            Recovery::RegenerateKeys => {
                warn!("Local agent reported {:?}, generating new keys", error);
                if let Err(e) = self.store.delete_keys() {
                    warn!("Failed to delete keys: {}", e);
                }
                if self.refresh_or_disconnect().await.is_some() {
                    info!("New keys and certificate ready, reconnecting");
                    self.gateway.reconnect();
                }
            }
            Recovery::SessionLimit(reported) => {
                let plan = match self.settings.account_plan() {
                    Some(plan) => plan,
                    None => {
                        warn!("Account plan unknown, using {} from the agent", reported);
                        reported
                    }
                };
                info!("Session limit reached on {} plan", plan);
                self.disconnect_tunnel();
                self.alerts.push(Alert::MaxSessions { plan });
            }
            Recovery::DisconnectWithAlert(alert) => {
                error!("Local agent reported {:?}, disconnecting", error);
                self.disconnect_tunnel();
                self.alerts.push(alert);
            }
            Recovery::Disconnect => {
                error!("Local agent reported {:?}, disconnecting", error);
                self.disconnect_tunnel();
            }
            Recovery::ProtocolMisuse => {
                error!("Local agent reported {:?} for a signed-in client", error);
                self.disconnect_tunnel();
            }
            Recovery::Wait => {
                info!("Local agent reported {:?}, waiting", error);
            }
        }
    }

    /// Reconcile features the agent reports with the settings.
    ///
    /// Any mismatch updates the settings. One certificate refresh carrying
    /// the reported features follows whenever the settings changed or the
    /// cached certificate was issued with different features.
    pub async fn handle_features(&self, features: FeatureSet) {
        let mut changed = self.reconcile_netshield(features.netshield);
        changed |= self.reconcile_vpn_accelerator(features.vpn_accelerator);
        changed |= self.reconcile_nat_type(features.nat_type);

        if !changed && !self.certificate_outdated(&features) {
            return;
        }

        match self.refresh(Some(features)).await {
            RefreshOutcome::Success(_) => debug!("Certificate refreshed with new features"),
            RefreshOutcome::Failure(e) if e.is_rate_limited() => {
                warn!("Feature refresh rate limited: {}", e);
                self.alerts.push(Alert::TooManyCertificateRequests);
            }
            RefreshOutcome::Failure(e) => warn!("Feature refresh failed: {}", e),
            RefreshOutcome::Canceled => debug!("Feature refresh superseded"),
        }
    }

    /// Apply user-chosen features to the settings and the live session
    pub fn change_features(&self, features: FeatureSet) {
        self.settings.set_netshield(features.netshield);
        self.settings.set_vpn_accelerator(features.vpn_accelerator);
        self.settings.set_nat_type(features.nat_type);
        self.record_netshield(features.netshield);

        let mut inner = self.lock();
        if let Some(active) = inner.session.as_mut() {
            debug!("Sending features to local agent {}", active.id);
            active.session.update_features(&features);
        }
    }

    /// Switch protocol, asking first if a connection would be dropped.
    ///
    /// Returns `false` if the user declined.
    pub async fn change_protocol(&self, protocol: VpnProtocol) -> bool {
        if self.settings.protocol() == Some(protocol) {
            return true;
        }

        let reconnect = self.gateway.is_connected();
        if reconnect {
            let alert = Alert::ReconnectConfirmation {
                reason: ReconnectReason::ProtocolChange,
            };
            if !self.alerts.confirm(alert).await {
                info!("Protocol change to {:?} declined", protocol);
                return false;
            }
        }

        self.settings.set_protocol(protocol);
        if !protocol.uses_certificate() {
            self.disconnect();
        }
        if reconnect {
            self.gateway.reconnect();
        }
        true
    }

    fn uses_certificate(&self) -> bool {
        self.settings
            .protocol()
            .is_some_and(|protocol| protocol.uses_certificate())
    }

    fn configuration(&self) -> Option<AgentConfiguration> {
        let record = self.settings.active_connection()?;
        Some(AgentConfiguration {
            hostname: record.server,
            features: self.settings.features(),
        })
    }

    /// Replace the current session with a new one
    fn start_session(&self, data: AuthenticationData) {
        let Some(configuration) = self.configuration() else {
            error!("No active connection to start the local agent for");
            return;
        };

        let id = SessionId::new(self.next_session.fetch_add(1, Ordering::SeqCst) + 1);
        let mut session = self.host.create_session(id);

        let mut inner = self.lock();
        if let Some(mut previous) = inner.session.take() {
            debug!("Replacing local agent {}", previous.id);
            previous.session.disconnect();
        }
        self.connected.store(false, Ordering::SeqCst);

        info!("Connecting local agent {} to {}", id, configuration.hostname);
        session.connect(&data, &configuration);
        inner.session = Some(ActiveSession { id, session });
    }

    /// Drop the tunnel and the agent
    fn disconnect_tunnel(&self) {
        self.gateway.disconnect();
        self.disconnect();
    }

    /// Run a refresh, superseding any other in flight
    async fn refresh(&self, features: Option<FeatureSet>) -> RefreshOutcome {
        let token = CancellationToken::new();
        let generation = {
            let mut inner = self.lock();
            if let Some((_, previous)) = inner.refresh.take() {
                debug!("Canceling previous certificate refresh");
                previous.cancel();
            }
            inner.refresh_generation += 1;
            let generation = inner.refresh_generation;
            inner.refresh = Some((generation, token.clone()));
            generation
        };

        let mut operation = CertificateRefresh::new(self.store.clone(), self.issuer.clone())
            .with_margin(self.refresh_margin)
            .with_cancel_token(token.clone());
        if let Some(features) = features {
            operation = operation.with_features(features);
        }
        let outcome = operation.run().await;

        let mut inner = self.lock();
        if inner
            .refresh
            .as_ref()
            .is_some_and(|(current, _)| *current == generation)
        {
            inner.refresh = None;
        }
        if token.is_cancelled() {
            return RefreshOutcome::Canceled;
        }
        outcome
    }

    async fn refresh_or_disconnect(&self) -> Option<AuthenticationData> {
        match self.refresh(None).await {
            RefreshOutcome::Success(data) => Some(data),
            RefreshOutcome::Failure(e) => {
                self.report_refresh_failure(&e);
                None
            }
            RefreshOutcome::Canceled => {
                debug!("Certificate refresh superseded");
                None
            }
        }
    }

    fn report_refresh_failure(&self, e: &RefreshError) {
        error!("Certificate refresh for current connection failed: {}", e);
        self.alerts.push(Alert::CertificateRefreshError);
        self.disconnect_tunnel();
    }

    /// Cached certificate is missing, expiring or carries other features
    fn certificate_outdated(&self, features: &FeatureSet) -> bool {
        match self.store.cached_certificate() {
            Ok(cached) => needs_refresh(
                cached.as_ref(),
                Some(features),
                self.refresh_margin,
                Utc::now(),
            ),
            Err(e) => {
                warn!("Failed to read cached certificate: {}", e);
                true
            }
        }
    }

    fn reconcile_netshield(&self, reported: NetShieldType) -> bool {
        let current = self.settings.netshield().unwrap_or_default();
        if current == reported {
            return false;
        }
        debug!("NetShield changed from {:?} to {:?}", current, reported);
        self.settings.set_netshield(reported);
        self.record_netshield(reported);
        true
    }

    fn reconcile_vpn_accelerator(&self, reported: bool) -> bool {
        if self.settings.vpn_accelerator() == reported {
            return false;
        }
        debug!("VPN Accelerator changed to {}", reported);
        self.settings.set_vpn_accelerator(reported);
        true
    }

    fn reconcile_nat_type(&self, reported: NatType) -> bool {
        if self.settings.nat_type() == reported {
            return false;
        }
        debug!("NAT type changed to {:?}", reported);
        self.settings.set_nat_type(reported);
        true
    }

    /// Keep the active connection record in step with NetShield
    fn record_netshield(&self, netshield: NetShieldType) {
        if let Some(mut record) = self.settings.active_connection() {
            record.netshield = netshield;
            self.settings.set_active_connection(Some(record));
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
