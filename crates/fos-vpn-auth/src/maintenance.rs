//! Maintenance Watcher
//!
//! Polls whether the connected server is going into maintenance and moves
//! the user to another server when it does. Runs only while the
//! `server_refresh` feature flag is on.

use crate::alerts::{Alert, AlertSink};
use crate::gateway::VpnGateway;
use crate::settings::SettingsStore;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Asks the backend about the connected server
#[async_trait]
pub trait MaintenanceCheck: Send + Sync {
    async fn is_in_maintenance(&self) -> Result<bool, CheckError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Maintenance check failed: {0}")]
pub struct CheckError(pub String);

/// Periodic maintenance poller
pub struct MaintenanceWatcher {
    check: Arc<dyn MaintenanceCheck>,
    settings: Arc<dyn SettingsStore>,
    alerts: Arc<dyn AlertSink>,
    gateway: Arc<dyn VpnGateway>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MaintenanceWatcher {
    pub fn new(
        check: Arc<dyn MaintenanceCheck>,
        settings: Arc<dyn SettingsStore>,
        alerts: Arc<dyn AlertSink>,
        gateway: Arc<dyn VpnGateway>,
    ) -> Self {
        Self {
            check,
            settings,
            alerts,
            gateway,
            task: Mutex::new(None),
        }
    }

    /// (Re)start polling if the feature flag allows it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        self.stop();

        if !self.settings.feature_flags().server_refresh {
            debug!("Server refresh disabled, not watching for maintenance");
            return;
        }

        let minutes = self.settings.maintenance_interval_minutes().max(1);
        let period = Duration::from_secs(minutes * 60);
        info!("Checking for server maintenance every {} min", minutes);

        let check = self.check.clone();
        let alerts = self.alerts.clone();
        let gateway = self.gateway.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);

            loop {
                interval.tick().await;

                if !gateway.is_connected() {
                    continue;
                }

                observe(check.as_ref(), alerts.as_ref(), gateway.as_ref()).await;
            }
        });

        *self.lock() = Some(handle);
    }

    /// Stop polling
    pub fn stop(&self) {
        if let Some(handle) = self.lock().take() {
            debug!("Stopping maintenance watcher");
            handle.abort();
        }
    }

    /// Re-read the feature flag and interval
    pub fn feature_flags_changed(&self) {
        self.start();
    }

    pub fn is_running(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn lock(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for MaintenanceWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One poll. Every positive answer moves the user off the server; the
/// next poll asks about whichever server the tunnel landed on.
async fn observe(check: &dyn MaintenanceCheck, alerts: &dyn AlertSink, gateway: &dyn VpnGateway) {
    match check.is_in_maintenance().await {
        Ok(true) => {
            info!("Connected server is going into maintenance, switching server");
            alerts.push(Alert::ServerOnMaintenance);
            gateway.quick_connect();
        }
        Ok(false) => debug!("Connected server is not in maintenance"),
        Err(e) => error!("{}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{FeatureFlags, MemorySettings};
    use crate::testing::{wireguard_settings, RecordingAlerts, RecordingGateway};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct ScriptedCheck {
        answers: Mutex<VecDeque<Result<bool, CheckError>>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MaintenanceCheck for ScriptedCheck {
        async fn is_in_maintenance(&self) -> Result<bool, CheckError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answers.lock().unwrap().pop_front().unwrap_or(Ok(false))
        }
    }

    struct Fixture {
        check: Arc<ScriptedCheck>,
        settings: Arc<MemorySettings>,
        alerts: Arc<RecordingAlerts>,
        gateway: Arc<RecordingGateway>,
        watcher: MaintenanceWatcher,
    }

    fn fixture(answers: Vec<Result<bool, CheckError>>, enabled: bool) -> Fixture {
        let check = Arc::new(ScriptedCheck {
            answers: Mutex::new(answers.into()),
            calls: AtomicUsize::new(0),
        });
        let settings = Arc::new(wireguard_settings());
        settings.set_feature_flags(FeatureFlags {
            server_refresh: enabled,
        });
        settings.set_maintenance_interval_minutes(1);
        let alerts = Arc::new(RecordingAlerts::default());
        let gateway = Arc::new(RecordingGateway::default());
        gateway.connected.store(true, Ordering::SeqCst);

        let watcher = MaintenanceWatcher::new(
            check.clone(),
            settings.clone(),
            alerts.clone(),
            gateway.clone(),
        );

        Fixture {
            check,
            settings,
            alerts,
            gateway,
            watcher,
        }
    }

    async fn minutes(n: u64) {
        tokio::time::sleep(Duration::from_secs(n * 60 + 1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_by_flag() {
        let f = fixture(vec![Ok(true)], false);
        f.watcher.start();

        minutes(3).await;

        assert!(!f.watcher.is_running());
        assert_eq!(f.check.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_alerts_on_every_positive_poll() {
        let f = fixture(
            vec![Ok(false), Ok(true), Ok(true), Ok(false), Ok(true)],
            true,
        );
        f.watcher.start();

        minutes(5).await;

        assert_eq!(f.check.calls.load(Ordering::SeqCst), 5);
        assert_eq!(f.alerts.alerts(), vec![Alert::ServerOnMaintenance; 3]);
        assert_eq!(f.gateway.quick_connects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_server_in_maintenance_switches_again() {
        let f = fixture(vec![Ok(true), Ok(true)], true);
        f.watcher.start();

        minutes(2).await;

        assert_eq!(f.gateway.quick_connects.load(Ordering::SeqCst), 2);
        assert_eq!(f.alerts.alerts().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_errors_keep_polling() {
        let f = fixture(
            vec![
                Ok(true),
                Err(CheckError("timeout".into())),
                Ok(true),
            ],
            true,
        );
        f.watcher.start();

        minutes(3).await;

        assert!(f.watcher.is_running());
        assert_eq!(f.check.calls.load(Ordering::SeqCst), 3);
        assert_eq!(f.gateway.quick_connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skips_while_disconnected() {
        let f = fixture(vec![Ok(true)], true);
        f.gateway.connected.store(false, Ordering::SeqCst);
        f.watcher.start();

        minutes(2).await;

        assert_eq!(f.check.calls.load(Ordering::SeqCst), 0);
        assert!(f.alerts.alerts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flag_change_stops_and_restarts() {
        let f = fixture(vec![], true);
        f.watcher.start();
        minutes(1).await;
        assert_eq!(f.check.calls.load(Ordering::SeqCst), 1);

        f.settings.set_feature_flags(FeatureFlags {
            server_refresh: false,
        });
        f.watcher.feature_flags_changed();
        minutes(3).await;
        assert!(!f.watcher.is_running());
        assert_eq!(f.check.calls.load(Ordering::SeqCst), 1);

        f.settings.set_feature_flags(FeatureFlags {
            server_refresh: true,
        });
        f.settings.set_maintenance_interval_minutes(2);
        f.watcher.feature_flags_changed();
        minutes(2).await;
        assert!(f.watcher.is_running());
        assert_eq!(f.check.calls.load(Ordering::SeqCst), 2);
    }
}
