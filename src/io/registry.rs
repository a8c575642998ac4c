//! Link registry - owns every supervised link and the status probe
//!
//! Links are fully independent: each has its own endpoint, callbacks, and
//! timers. Failure or reattachment of one never blocks or cancels another.

use crate::domain::Message;
use crate::io::link::{LinkError, LinkSupervisor};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, trace, warn};

pub struct LinkRegistry {
    links: FxHashMap<String, LinkSupervisor>,
    probe_interval: Duration,
}

impl LinkRegistry {
    pub fn new(probe_interval: Duration) -> Self {
        Self { links: FxHashMap::default(), probe_interval }
    }

    /// Register a supervised link under its name
    pub fn insert(&mut self, link: LinkSupervisor) {
        let name = link.name().to_string();
        if self.links.insert(name.clone(), link).is_some() {
            warn!(name = %name, "link_replaced_in_registry");
        }
    }

    pub fn get(&self, name: &str) -> Option<&LinkSupervisor> {
        self.links.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.links.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Request an open attempt on every link
    pub async fn open_all(&self) {
        for link in self.links.values() {
            if let Err(e) = link.open().await {
                warn!(name = %link.name(), error = %e, "link_open_request_failed");
            }
        }
    }

    /// Best-effort send to every link; not-yet-open links are skipped.
    /// Returns how many links accepted the frame.
    pub fn broadcast(&self, msg: &Message) -> usize {
        let mut sent = 0;
        for link in self.links.values() {
            match link.send(msg.clone()) {
                Ok(()) => sent += 1,
                Err(LinkError::NotConnected(_)) => {
                    // Expected steady-state noise while a link is reattaching
                    trace!(name = %link.name(), opcode = %msg.opcode(), "broadcast_skipped_not_open");
                }
                Err(e) => warn!(name = %link.name(), error = %e, "broadcast_failed"),
            }
        }
        sent
    }

    /// Fixed-period "are you still connected" probe across every link
    pub async fn run_probe(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            links = %self.links.len(),
            probe_interval_ms = %self.probe_interval.as_millis(),
            "link_probe_started"
        );

        let mut probe_timer = tokio::time::interval(self.probe_interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("link_probe_stopped");
                        return;
                    }
                }
                _ = probe_timer.tick() => {}
            }

            self.broadcast(&Message::IsConnected);
        }
    }
}
