//! Process memory monitoring
//!
//! The monitor samples resident memory on a fixed cadence, independent of the
//! operations it guards. Operations read the most recent sample; a fresh
//! sample is only taken when an operation starts.

use crate::config::MonitorConfig;
use crate::error::{Result, RetouchError};
use crate::services::registry::TaskRegistry;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use sysinfo::{Pid, System};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Source of memory usage samples
pub trait MemorySampler: Send + Sync {
    /// Current resident memory in bytes, `None` when it cannot be determined
    fn sample_bytes(&self) -> Option<u64>;
}

/// Samples the resident set size of the current process via `sysinfo`
pub struct ProcessMemorySampler {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl ProcessMemorySampler {
    #[must_use]
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                log::warn!("Memory sampling unavailable: {}", e);
                None
            },
        };
        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }
}

impl Default for ProcessMemorySampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for ProcessMemorySampler {
    fn sample_bytes(&self) -> Option<u64> {
        let pid = self.pid?;
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        if !system.refresh_process(pid) {
            return None;
        }
        system.process(pid).map(sysinfo::Process::memory)
    }
}

/// Tracks memory usage against soft and hard limits
pub struct ResourceMonitor {
    config: MonitorConfig,
    sampler: Box<dyn MemorySampler>,
    registry: Arc<TaskRegistry>,
    /// Last sample in MB stored as `f64` bits; NaN means unknown
    last_sample: AtomicU64,
    soft_warned: AtomicBool,
    stop: CancellationToken,
}

impl ResourceMonitor {
    /// Monitor backed by the process sampler
    #[must_use]
    pub fn new(config: MonitorConfig, registry: Arc<TaskRegistry>) -> Self {
        Self::with_sampler(config, registry, Box::new(ProcessMemorySampler::new()))
    }

    #[must_use]
    pub fn with_sampler(
        config: MonitorConfig,
        registry: Arc<TaskRegistry>,
        sampler: Box<dyn MemorySampler>,
    ) -> Self {
        Self {
            config,
            sampler,
            registry,
            last_sample: AtomicU64::new(f64::NAN.to_bits()),
            soft_warned: AtomicBool::new(false),
            stop: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Take a fresh sample, record it and apply the limit side effects
    pub fn sample_usage_mb(&self) -> Option<f64> {
        let usage = self
            .sampler
            .sample_bytes()
            .map(|bytes| bytes as f64 / BYTES_PER_MB);
        self.record(usage);
        usage
    }

    /// Most recent sample, without sampling again
    #[must_use]
    pub fn last_usage_mb(&self) -> Option<f64> {
        let value = f64::from_bits(self.last_sample.load(Ordering::Acquire));
        (!value.is_nan()).then_some(value)
    }

    /// Unknown usage is never over a limit
    #[must_use]
    pub fn is_over_soft_limit(&self) -> bool {
        self.last_usage_mb()
            .is_some_and(|mb| mb > self.config.soft_limit_mb)
    }

    /// Unknown usage is never over a limit
    #[must_use]
    pub fn is_over_hard_limit(&self) -> bool {
        self.last_usage_mb()
            .is_some_and(|mb| mb > self.config.hard_limit_mb)
    }

    /// Warning text attached to progress events while above the soft limit
    #[must_use]
    pub fn soft_limit_warning(&self) -> Option<String> {
        let mb = self.last_usage_mb()?;
        (mb > self.config.soft_limit_mb).then(|| {
            format!(
                "Memory usage is high ({:.0} MB of {:.0} MB)",
                mb, self.config.hard_limit_mb
            )
        })
    }

    /// Sample now and refuse new work above the hard limit
    ///
    /// # Errors
    /// Returns `ResourceExhausted` when usage exceeds the hard limit.
    pub fn ensure_capacity(&self) -> Result<()> {
        match self.sample_usage_mb() {
            Some(mb) if mb > self.config.hard_limit_mb => Err(RetouchError::resource_exhausted(
                format!(
                    "memory usage {:.1} MB exceeds the {:.0} MB limit",
                    mb, self.config.hard_limit_mb
                ),
            )),
            _ => Ok(()),
        }
    }

    fn record(&self, usage: Option<f64>) {
        self.last_sample
            .store(usage.unwrap_or(f64::NAN).to_bits(), Ordering::Release);
        let Some(mb) = usage else {
            return;
        };

        if mb > self.config.hard_limit_mb {
            let swept = self.registry.sweep();
            log::warn!(
                "Memory usage {:.1} MB exceeds hard limit {:.0} MB; released {} cancelled operation(s)",
                mb,
                self.config.hard_limit_mb,
                swept
            );
        }

        if mb > self.config.soft_limit_mb {
            if !self.soft_warned.swap(true, Ordering::AcqRel) {
                log::warn!(
                    "Memory usage {:.1} MB is above the soft limit of {:.0} MB",
                    mb,
                    self.config.soft_limit_mb
                );
            }
        } else {
            self.soft_warned.store(false, Ordering::Release);
        }
    }

    /// Start periodic sampling on the current tokio runtime.
    ///
    /// The task holds only a weak reference, so it ends when the monitor is
    /// dropped or [`ResourceMonitor::stop`] is called. Returns `None` outside
    /// of a runtime.
    pub fn spawn_sampler(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let weak: Weak<Self> = Arc::downgrade(self);
        let stop = self.stop.clone();
        let period = self.config.sample_interval;

        Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(monitor) = weak.upgrade() else {
                            break;
                        };
                        monitor.sample_usage_mb();
                    }
                }
            }
            log::debug!("Memory sampler stopped");
        }))
    }

    /// Stop the periodic sampler
    pub fn stop(&self) {
        self.stop.cancel();
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
