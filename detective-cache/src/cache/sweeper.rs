//! Background expiry sweeper

use crate::cache::{
    config::CacheConfig,
    disk::DiskTier,
    memory::MemoryTier,
    types::{CacheTier, SweepReport},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Run one expiry pass over both tiers
pub fn sweep_once(
    memory: &MemoryTier,
    memory_ttl: Duration,
    disk: Option<&DiskTier>,
    disk_ttl: Duration,
) -> SweepReport {
    let report = SweepReport {
        expired_memory: memory.cleanup_expired(memory_ttl),
        expired_disk: disk.map_or(0, |disk| disk.cleanup_expired(disk_ttl)),
    };

    if report.total() > 0 {
        debug!(
            "Cache sweep: {} expired in {}, {} expired in {}",
            report.expired_memory,
            CacheTier::Memory,
            report.expired_disk,
            CacheTier::Disk
        );
    }
    report
}

/// Handle to a periodic sweep task
///
/// The task stops when [`Sweeper::stop`] is called or the handle is dropped.
pub struct Sweeper {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Spawn the sweep loop on the current tokio runtime.
    ///
    /// Returns `None` when called outside a runtime; the tiers then rely on
    /// lazy expiry alone.
    pub fn spawn(
        memory: Arc<MemoryTier>,
        disk: Option<Arc<DiskTier>>,
        config: &CacheConfig,
    ) -> Option<Self> {
        let (memory_ttl, disk_ttl) = (config.memory_ttl, config.disk_ttl);
        Self::spawn_with(config, move || {
            sweep_once(&memory, memory_ttl, disk.as_deref(), disk_ttl)
        })
    }

    /// Run `pass` on the blocking pool once per jittered interval. A pass
    /// that panics is logged and the loop carries on.
    fn spawn_with<P>(config: &CacheConfig, pass: P) -> Option<Self>
    where
        P: Fn() -> SweepReport + Send + Sync + 'static,
    {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("No tokio runtime available, cache sweeper not started");
                return None;
            }
        };

        let (shutdown, mut stopped) = watch::channel(false);
        let config = config.clone();
        let pass = Arc::new(pass);

        let handle = runtime.spawn(async move {
            info!(
                "Starting cache sweeper (interval: {:?})",
                config.cleanup_interval
            );

            loop {
                tokio::select! {
                    _ = tokio::time::sleep(config.cleanup_interval_with_jitter()) => {}
                    _ = stopped.changed() => break,
                }

                let pass = Arc::clone(&pass);
                if let Err(e) = tokio::task::spawn_blocking(move || (*pass)()).await {
                    warn!("Cache sweep pass failed: {}", e);
                }
            }

            debug!("Cache sweeper stopped");
        });

        Some(Self { shutdown, handle })
    }

    /// Signal the task to exit after its current pass
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop();
    }
}
