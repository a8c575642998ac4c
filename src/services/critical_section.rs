//! Named, timeout-bounded mutual exclusion
//!
//! Exactly two callers compete for the session section: the periodic
//! refresh task and the parameter-update path. Whoever asks first wins;
//! the loser either waits or times out. Release is the guard's `Drop`, so
//! it runs exactly once per acquire on success, error, and panic paths.

use parking_lot::Mutex as HolderMutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{trace, warn};

/// Acquire gave up before the holder released
#[derive(Debug, thiserror::Error)]
#[error("critical section {name} not acquired by {who} within {timeout_ms}ms")]
pub struct LockTimeout {
    pub name: String,
    pub who: &'static str,
    pub timeout_ms: u64,
}

#[derive(Clone)]
pub struct CriticalSection {
    name: String,
    timeout: Duration,
    inner: Arc<Mutex<()>>,
    holder: Arc<HolderMutex<Option<&'static str>>>,
}

/// Exclusive hold on the section; dropping it releases
#[derive(Debug)]
pub struct SectionGuard {
    _permit: OwnedMutexGuard<()>,
    name: String,
    who: &'static str,
    holder: Arc<HolderMutex<Option<&'static str>>>,
}

impl Drop for SectionGuard {
    fn drop(&mut self) {
        *self.holder.lock() = None;
        trace!(name = %self.name, who = %self.who, "critical_section_released");
    }
}

impl CriticalSection {
    pub fn new(name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            timeout,
            inner: Arc::new(Mutex::new(())),
            holder: Arc::new(HolderMutex::new(None)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Current holder label, if any
    pub fn holder(&self) -> Option<&'static str> {
        *self.holder.lock()
    }

    /// Wait for exclusive hold, up to the section timeout
    pub async fn acquire(&self, who: &'static str) -> Result<SectionGuard, LockTimeout> {
        match tokio::time::timeout(self.timeout, self.inner.clone().lock_owned()).await {
            Ok(permit) => {
                *self.holder.lock() = Some(who);
                trace!(name = %self.name, who = %who, "critical_section_acquired");
                Ok(SectionGuard {
                    _permit: permit,
                    name: self.name.clone(),
                    who,
                    holder: self.holder.clone(),
                })
            }
            Err(_) => {
                let held_by = self.holder();
                warn!(
                    name = %self.name,
                    who = %who,
                    held_by = %held_by.unwrap_or("unknown"),
                    timeout_ms = %self.timeout.as_millis(),
                    "critical_section_timeout"
                );
                Err(LockTimeout {
                    name: self.name.clone(),
                    who,
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let section = CriticalSection::new("session-params", Duration::from_millis(100));

        let guard = section.acquire("refresh_poll").await.unwrap();
        assert_eq!(section.holder(), Some("refresh_poll"));
        drop(guard);
        assert_eq!(section.holder(), None);

        // Released, so a second acquire succeeds immediately
        let guard = section.acquire("params_update").await.unwrap();
        assert_eq!(section.holder(), Some("params_update"));
        drop(guard);
    }

    #[tokio::test]
    async fn test_acquire_times_out_while_held() {
        let section = CriticalSection::new("session-params", Duration::from_millis(50));

        let _held = section.acquire("refresh_poll").await.unwrap();
        let err = section.acquire("params_update").await.unwrap_err();
        assert_eq!(err.who, "params_update");
        assert_eq!(err.name, "session-params");

        // The original holder is unaffected by the timed-out attempt
        assert_eq!(section.holder(), Some("refresh_poll"));
    }

    #[tokio::test]
    async fn test_release_runs_on_error_path() {
        let section = CriticalSection::new("session-params", Duration::from_millis(100));

        async fn guarded_failure(section: &CriticalSection) -> Result<(), String> {
            let _guard = section.acquire("params_update").await.map_err(|e| e.to_string())?;
            Err("backend rejected".to_string())
        }

        assert!(guarded_failure(&section).await.is_err());
        // Guard dropped despite the failure; the section is free again
        assert!(section.acquire("refresh_poll").await.is_ok());
    }

    #[tokio::test]
    async fn test_waiter_enters_after_release() {
        let section = CriticalSection::new("session-params", Duration::from_millis(500));

        let guard = section.acquire("refresh_poll").await.unwrap();
        let contender = {
            let section = section.clone();
            tokio::spawn(async move {
                let _guard = section.acquire("params_update").await.unwrap();
                section.holder()
            })
        };

        // Give the contender time to start waiting, then release
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(section.holder(), Some("refresh_poll"));
        drop(guard);

        assert_eq!(contender.await.unwrap(), Some("params_update"));
    }
}
