//! Session service - critical-section-guarded refresh and parameter updates
//!
//! Two paths touch the session state: the fixed-period refresh poll and the
//! user-driven parameter update. Both take the session critical section, so
//! their bodies never interleave; everything else in the gateway runs
//! outside it.

use crate::domain::{Message, SessionParams};
use crate::infra::Config;
use crate::io::backend::{BackendClient, BackendError};
use crate::io::registry::LinkRegistry;
use crate::services::critical_section::{CriticalSection, LockTimeout};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Lock(#[from] LockTimeout),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Link(#[from] crate::io::link::LinkError),
    #[error("no link named {0}")]
    UnknownLink(String),
}

pub struct SessionService {
    section: CriticalSection,
    backend: Arc<BackendClient>,
    registry: Arc<LinkRegistry>,
    params: RwLock<SessionParams>,
    /// Cursor for the incremental refresh read, advanced under the section
    last_draw: Mutex<DateTime<Utc>>,
    refresh_interval: Duration,
}

impl SessionService {
    pub fn new(
        config: &Config,
        backend: Arc<BackendClient>,
        registry: Arc<LinkRegistry>,
    ) -> Self {
        Self {
            section: CriticalSection::new("session-params", config.lock_timeout()),
            backend,
            registry,
            params: RwLock::new(SessionParams::default()),
            last_draw: Mutex::new(Utc::now()),
            refresh_interval: config.refresh_interval(),
        }
    }

    pub fn params(&self) -> SessionParams {
        self.params.read().clone()
    }

    pub fn section(&self) -> &CriticalSection {
        &self.section
    }

    /// Fixed-period refresh loop. A lock timeout drops that cycle's refresh
    /// and retries on the next tick; no catch-up is attempted.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            refresh_interval_ms = %self.refresh_interval.as_millis(),
            "session_refresh_started"
        );

        let mut refresh_timer = tokio::time::interval(self.refresh_interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("session_refresh_stopped");
                        return;
                    }
                }
                _ = refresh_timer.tick() => {}
            }

            match self.section.acquire("refresh_poll").await {
                Ok(_guard) => {
                    if let Err(e) = self.refresh().await {
                        warn!(error = %e, "refresh_failed");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "refresh_cycle_skipped");
                }
            }
        }
    }

    async fn refresh(&self) -> Result<(), BackendError> {
        let since = *self.last_draw.lock();
        let rows = self.backend.fetch_updates(since).await?;
        *self.last_draw.lock() = Utc::now();
        debug!(
            since = %since.to_rfc3339(),
            bytes = %rows.to_string().len(),
            "refresh_ok"
        );
        Ok(())
    }

    /// Replace the session parameters: update local state, push the change
    /// to the hardware links, persist to the backend, then refresh, all
    /// under the section. The guard releases on every exit path.
    pub async fn update_params(&self, new: SessionParams) -> Result<(), SessionError> {
        let _guard = self.section.acquire("params_update").await?;

        let raceid_changed = {
            let mut current = self.params.write();
            let changed = current.raceid != new.raceid;
            *current = new.clone();
            changed
        };

        // Best-effort push; links still reattaching just miss this round
        if raceid_changed {
            self.registry.broadcast(&Message::Raceid { raceid: new.raceid });
        }
        self.registry.broadcast(&Message::Params {
            port: new.port.clone(),
            raceid: new.raceid,
            outputdir: new.outputdir.clone(),
            logdir: new.logdir.clone(),
        });

        self.backend.set_params(&new).await?;
        self.refresh().await?;

        info!(raceid = %new.raceid, port = %new.port, "session_params_updated");
        Ok(())
    }

    /// Ask a reader process for its available ports. The backend's known
    /// Bluetooth devices ride along so the process can match them.
    pub async fn request_comports(&self, link_name: &str) -> Result<(), SessionError> {
        let devices = self.backend.bluetooth_devices().await?;
        let ids = devices.into_iter().map(|d| d.id).collect();

        let link = self
            .registry
            .get(link_name)
            .ok_or_else(|| SessionError::UnknownLink(link_name.to_string()))?;
        link.send(Message::GetComports { bluetoothdevices: ids })?;
        debug!(name = %link_name, "comports_requested");
        Ok(())
    }

    /// Pass a scanned-bib action through to the backend
    pub async fn scan_action(
        &self,
        action: &str,
        resultid: i64,
        scanid: i64,
    ) -> Result<(), BackendError> {
        self.backend.scan_action(action, resultid, scanid).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> Arc<SessionService> {
        let config = Config::default();
        let backend = Arc::new(BackendClient::new(&config).unwrap());
        let registry = Arc::new(LinkRegistry::new(config.probe_interval()));
        Arc::new(SessionService::new(&config, backend, registry))
    }

    #[tokio::test]
    async fn test_params_default_until_updated() {
        let service = service();
        assert_eq!(service.params(), SessionParams::default());
    }

    #[tokio::test]
    async fn test_update_times_out_while_poll_holds_section() {
        let config = Config::default();
        let backend = Arc::new(BackendClient::new(&config).unwrap());
        let registry = Arc::new(LinkRegistry::new(config.probe_interval()));
        let mut service = SessionService::new(&config, backend, registry);
        service.section = CriticalSection::new("session-params", Duration::from_millis(50));
        let service = Arc::new(service);

        // Simulate the poll task mid-refresh
        let _held = service.section.acquire("refresh_poll").await.unwrap();

        let err = service.update_params(SessionParams::default()).await.unwrap_err();
        assert!(matches!(err, SessionError::Lock(_)));
        // The poll task still holds the section
        assert_eq!(service.section.holder(), Some("refresh_poll"));
    }
}
