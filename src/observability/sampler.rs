//! Background resource sampling
//!
//! CPU utilization is derived from two reads of the aggregate `cpu` line of
//! `/proc/stat` taken one sampling window apart:
//!
//! ```text
//! usage = 100 * (1 - (idle1 - idle0) / (total1 - total0))
//! ```
//!
//! Memory is a point-in-time snapshot of the process (resident and virtual)
//! plus the host's free memory. Readings overwrite the registry gauges; a
//! failed reading leaves the previous gauge value in place.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sysinfo::System;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, info, warn};

use crate::config::SamplerConfig;
use crate::observability::recorder::MetricsRegistry;

const PROC_STAT: &str = "/proc/stat";

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed CPU statistics: {0}")]
    MalformedStat(String),

    #[error("CPU tick counters did not advance between samples")]
    NoTickProgress,

    #[error("CPU tick counters moved backwards between samples")]
    CounterReset,

    #[error("Memory statistics unavailable")]
    MemoryUnavailable,
}

/// Cumulative CPU ticks since boot, summed over all cores
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTicks {
    pub idle: u64,
    pub total: u64,
}

impl CpuTicks {
    /// Parse the aggregate `cpu` line of a `/proc/stat` dump
    pub fn parse(stat: &str) -> Result<Self, SamplerError> {
        let line = stat
            .lines()
            .find(|line| line.starts_with("cpu "))
            .ok_or_else(|| SamplerError::MalformedStat("missing aggregate cpu line".to_string()))?;

        let values = line
            .split_whitespace()
            .skip(1)
            .map(|field| {
                field
                    .parse::<u64>()
                    .map_err(|_| SamplerError::MalformedStat(format!("non-numeric field {:?}", field)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        // user nice system idle ...
        if values.len() < 4 {
            return Err(SamplerError::MalformedStat(format!(
                "expected at least 4 counters, found {}",
                values.len()
            )));
        }

        Ok(Self {
            idle: values[3],
            total: values.iter().sum(),
        })
    }

    /// Busy percentage between `earlier` and `self`, clamped to `[0, 100]`
    pub fn usage_since(&self, earlier: &CpuTicks) -> Result<f64, SamplerError> {
        if self.total < earlier.total || self.idle < earlier.idle {
            return Err(SamplerError::CounterReset);
        }

        let total = self.total - earlier.total;
        if total == 0 {
            return Err(SamplerError::NoTickProgress);
        }

        let idle = self.idle - earlier.idle;
        let usage = 100.0 * (1.0 - idle as f64 / total as f64);
        Ok(usage.clamp(0.0, 100.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryReading {
    pub resident_bytes: u64,
    pub virtual_bytes: u64,
    pub system_free_bytes: u64,
}

/// Result of one sampling round. `None` marks a measurement that failed and
/// was not published.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceReading {
    pub cpu_percent: Option<f64>,
    pub memory: Option<MemoryReading>,
    pub timestamp: DateTime<Utc>,
}

/// Source of raw OS counters
#[async_trait]
pub trait SystemProbe: Send + Sync {
    async fn cpu_ticks(&self) -> Result<CpuTicks, SamplerError>;
    async fn memory(&self) -> Result<MemoryReading, SamplerError>;
}

/// Reads `/proc/stat`, the process memory counters and host memory
pub struct ProcfsProbe {
    stat_path: PathBuf,
    system: Mutex<System>,
}

impl ProcfsProbe {
    pub fn new() -> Self {
        Self::with_stat_path(PROC_STAT)
    }

    pub fn with_stat_path(path: impl Into<PathBuf>) -> Self {
        Self {
            stat_path: path.into(),
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for ProcfsProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SystemProbe for ProcfsProbe {
    async fn cpu_ticks(&self) -> Result<CpuTicks, SamplerError> {
        let stat = tokio::fs::read_to_string(&self.stat_path)
            .await
            .map_err(|source| SamplerError::Io {
                path: self.stat_path.display().to_string(),
                source,
            })?;
        CpuTicks::parse(&stat)
    }

    async fn memory(&self) -> Result<MemoryReading, SamplerError> {
        let process = memory_stats::memory_stats().ok_or(SamplerError::MemoryUnavailable)?;

        let system_free_bytes = {
            let mut system = self.system.lock().map_err(|_| SamplerError::MemoryUnavailable)?;
            system.refresh_memory();
            system.free_memory()
        };

        Ok(MemoryReading {
            resident_bytes: process.physical_mem as u64,
            virtual_bytes: process.virtual_mem as u64,
            system_free_bytes,
        })
    }
}

/// Periodically samples the probe and publishes the readings as gauges
pub struct ResourceSampler {
    probe: Arc<dyn SystemProbe>,
    registry: MetricsRegistry,
    window: Duration,
    period: Duration,
}

impl ResourceSampler {
    pub fn new(probe: Arc<dyn SystemProbe>, registry: MetricsRegistry, config: &SamplerConfig) -> Self {
        Self {
            probe,
            registry,
            window: Duration::from_millis(config.window_ms),
            period: Duration::from_secs(config.period_secs),
        }
    }

    /// Override the sampling window and period
    pub fn with_timing(mut self, window: Duration, period: Duration) -> Self {
        self.window = window;
        self.period = period;
        self
    }

    /// Take two tick readings one window apart and compute utilization
    pub async fn sample_cpu(&self) -> Result<f64, SamplerError> {
        let before = self.probe.cpu_ticks().await?;
        sleep(self.window).await;
        let after = self.probe.cpu_ticks().await?;
        after.usage_since(&before)
    }

    /// Run one sampling round and publish whatever succeeded
    pub async fn sample_once(&self) -> ResourceReading {
        let cpu_percent = match self.sample_cpu().await {
            Ok(percent) => {
                self.registry.set_cpu_usage(percent);
                Some(percent)
            }
            Err(e) => {
                warn!(error = %e, "CPU sample failed, keeping previous value");
                None
            }
        };

        let memory = match self.probe.memory().await {
            Ok(reading) => {
                self.registry.set_memory(&reading);
                Some(reading)
            }
            Err(e) => {
                warn!(error = %e, "Memory sample failed, keeping previous value");
                None
            }
        };

        debug!(
            cpu_percent = ?cpu_percent,
            resident_bytes = ?memory.map(|m| m.resident_bytes),
            "Resource sample complete"
        );

        ResourceReading {
            cpu_percent,
            memory,
            timestamp: Utc::now(),
        }
    }

    /// Sample forever on the configured period
    pub async fn run(self) {
        info!(
            period_secs = self.period.as_secs(),
            window_ms = self.window.as_millis() as u64,
            "Resource sampler started"
        );

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.sample_once().await;
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
