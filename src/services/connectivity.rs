use crate::error::SyncError;
use crate::services::sync_engine::SyncEngine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Fallback poll interval: reachability events can be missed (e.g. the
/// process resumes after sleep without one firing), so pending work is
/// re-checked on a timer.
const POLL_INTERVAL_SECONDS: u64 = 30;

/// Connectivity state as shown to the UI.
///
/// `Offline` and `Online` are the two real states; `Syncing` and `Synced`
/// are derived transients published for external signaling only and play
/// no part in control decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Offline,
    Online,
    Syncing,
    Synced,
}

/// Observes reachability transitions and schedules drains. Nothing in here
/// ever blocks application reads or writes; it only triggers background
/// work.
pub struct ConnectivityMonitor {
    engine: Arc<SyncEngine>,
    enabled: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl ConnectivityMonitor {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self {
            engine,
            enabled: Arc::new(AtomicBool::new(false)),
            poll_interval: Duration::from_secs(POLL_INTERVAL_SECONDS),
        }
    }

    /// Overrides the fallback poll interval (tests, aggressive platforms).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Feed in a platform reachability event. Becoming reachable triggers
    /// one mutation drain followed by one photo drain.
    pub fn notify_reachability(&self, reachable: bool) {
        if reachable {
            if self.engine.status() == SyncStatus::Offline {
                log::info!("Network became reachable");
            }
            self.engine.set_status(SyncStatus::Online);
            SyncEngine::trigger_sync(&self.engine);
        } else {
            if self.engine.status() != SyncStatus::Offline {
                log::info!("Network became unreachable");
            }
            self.engine.set_status(SyncStatus::Offline);
        }
    }

    /// Starts the fallback poll loop.
    ///
    /// Call `stop()` to stop it.
    pub fn start(&self) {
        if self.enabled.swap(true, Ordering::SeqCst) {
            log::warn!("Connectivity monitor already running");
            return;
        }

        log::info!(
            "Starting connectivity monitor with {}s fallback interval",
            self.poll_interval.as_secs()
        );

        let engine = Arc::clone(&self.engine);
        let enabled = Arc::clone(&self.enabled);
        let interval = self.poll_interval;
        tokio::spawn(async move {
            while enabled.load(Ordering::SeqCst) {
                tokio::time::sleep(interval).await;
                if !enabled.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = Self::poll_once(&engine).await {
                    log::error!("Connectivity poll error: {}", e);
                }
            }
            log::info!("Connectivity monitor stopped");
        });
    }

    pub fn stop(&self) {
        if self.enabled.swap(false, Ordering::SeqCst) {
            log::info!("Stopping connectivity monitor");
        }
    }

    pub fn is_running(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// One fallback check: anything drainable pending, and does the remote
    /// answer a ping? Only then is a drain worth triggering.
    pub(crate) async fn poll_once(engine: &Arc<SyncEngine>) -> Result<(), SyncError> {
        if engine.drainable_total()? == 0 {
            return Ok(());
        }
        match engine.ping_remote().await {
            Ok(()) => {
                if engine.status() == SyncStatus::Offline {
                    log::info!("Remote reachable again (fallback poll)");
                }
                engine.set_status(SyncStatus::Online);
                if let Err(e) = engine.sync_now().await {
                    log::error!("Fallback drain error: {}", e);
                }
            }
            Err(e) => {
                log::debug!("Remote still unreachable: {}", e);
                engine.set_status(SyncStatus::Offline);
            }
        }
        Ok(())
    }
}
