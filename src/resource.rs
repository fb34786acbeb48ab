//! Resource Sampler: per-PID CPU/RSS/IO/thread-count sampling into a bounded ring
//! buffer, linear-regression trend, threshold checks at three severities, and
//! non-binding recommendations.

use std::collections::VecDeque;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};

/// Default ring buffer capacity per agent (§3: 720 samples).
pub const DEFAULT_RING_BUFFER_CAPACITY: usize = 720;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceSample {
    pub timestamp: SystemTime,
    pub cpu_percent: f32,
    pub rss_bytes: u64,
    pub io_read_rate: f64,
    pub io_write_rate: f64,
    pub thread_count: usize,
}

/// Fixed-capacity ring buffer; oldest samples are evicted first once full.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    capacity: usize,
    samples: VecDeque<ResourceSample>,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, sample: ResourceSample) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn latest(&self) -> Option<&ResourceSample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Slope of a linear regression of `cpu_percent` over the last `window` samples
    /// (x = sample index, y = cpu_percent); used to predict exhaustion trends.
    pub fn cpu_trend(&self, window: usize) -> Option<f64> {
        trend_of(self.samples.iter().map(|s| s.cpu_percent as f64), window)
    }

    pub fn rss_trend(&self, window: usize) -> Option<f64> {
        trend_of(self.samples.iter().map(|s| s.rss_bytes as f64), window)
    }
}

fn trend_of(values: impl Iterator<Item = f64>, window: usize) -> Option<f64> {
    let values: Vec<f64> = values.collect();
    if values.len() < 2 {
        return None;
    }
    let tail = &values[values.len().saturating_sub(window)..];
    let n = tail.len() as f64;
    if n < 2.0 {
        return None;
    }
    let xs: Vec<f64> = (0..tail.len()).map(|i| i as f64).collect();
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = tail.iter().sum::<f64>() / n;
    let numerator: f64 = xs
        .iter()
        .zip(tail.iter())
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();
    let denominator: f64 = xs.iter().map(|x| (x - mean_x).powi(2)).sum();
    if denominator == 0.0 {
        return Some(0.0);
    }
    Some(numerator / denominator)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceLimitKind {
    CpuPercent,
    RssBytes,
    IoRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
    Emergency,
}

/// Three-severity threshold for one resource dimension, as read from the fleet
/// document's `resource_limits` block.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Threshold {
    pub warning: f64,
    pub critical: f64,
    pub emergency: f64,
}

impl Threshold {
    /// Highest severity `value` exceeds, if any.
    pub fn severity_for(&self, value: f64) -> Option<Severity> {
        if value >= self.emergency {
            Some(Severity::Emergency)
        } else if value >= self.critical {
            Some(Severity::Critical)
        } else if value >= self.warning {
            Some(Severity::Warning)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceLimits {
    pub cpu_percent: Option<Threshold>,
    pub rss_bytes: Option<Threshold>,
}

impl ResourceLimits {
    /// Every `(kind, severity)` pair the latest sample crosses.
    pub fn exceeded(&self, sample: &ResourceSample) -> Vec<(ResourceLimitKind, Severity)> {
        let mut hits = Vec::new();
        if let Some(t) = self.cpu_percent {
            if let Some(sev) = t.severity_for(sample.cpu_percent as f64) {
                hits.push((ResourceLimitKind::CpuPercent, sev));
            }
        }
        if let Some(t) = self.rss_bytes {
            if let Some(sev) = t.severity_for(sample.rss_bytes as f64) {
                hits.push((ResourceLimitKind::RssBytes, sev));
            }
        }
        hits
    }
}

/// A non-binding, human-readable suggestion derived from trend/threshold data. The
/// manager surfaces these; it never acts on them automatically.
#[derive(Debug, Clone, PartialEq)]
pub struct Recommendation {
    pub agent: String,
    pub text: String,
}

/// Produces recommendations from a buffer's recent trend; purely advisory.
pub fn recommendations(agent: &str, buffer: &RingBuffer, limits: &ResourceLimits, window: usize) -> Vec<Recommendation> {
    let mut out = Vec::new();
    if let (Some(trend), Some(limit)) = (buffer.cpu_trend(window), limits.cpu_percent) {
        if trend > 0.5 && buffer.latest().map(|s| s.cpu_percent as f64).unwrap_or(0.0) > limit.warning * 0.8 {
            out.push(Recommendation {
                agent: agent.to_string(),
                text: "CPU usage trending upward toward its warning threshold; consider reducing CPU affinity or the agent's workload".to_string(),
            });
        }
    }
    if let (Some(trend), Some(limit)) = (buffer.rss_trend(window), limits.rss_bytes) {
        if trend > 0.0 && buffer.latest().map(|s| s.rss_bytes as f64).unwrap_or(0.0) > limit.warning * 0.8 {
            out.push(Recommendation {
                agent: agent.to_string(),
                text: "memory usage trending upward toward its warning threshold; consider increasing the memory budget".to_string(),
            });
        }
    }
    out
}

/// Abstracts per-PID metrics collection so the sampler thread is testable without a
/// real OS process table.
pub trait ProcessMetricsSource: Send + Sync {
    fn sample(&mut self, pid: u32) -> Option<ResourceSample>;
}

/// Real [`ProcessMetricsSource`] backed by `sysinfo`.
pub struct SysinfoMetricsSource {
    system: System,
    previous_io: std::collections::HashMap<u32, (u64, u64, SystemTime)>,
}

impl SysinfoMetricsSource {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            previous_io: std::collections::HashMap::new(),
        }
    }
}

impl Default for SysinfoMetricsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessMetricsSource for SysinfoMetricsSource {
    fn sample(&mut self, pid: u32) -> Option<ResourceSample> {
        let sys_pid = Pid::from_u32(pid);
        self.system.refresh_process(sys_pid);
        let process = self.system.process(sys_pid)?;

        let disk_usage = process.disk_usage();
        let now = SystemTime::now();
        let (read_rate, write_rate) = match self.previous_io.get(&pid) {
            Some((prev_read, prev_write, prev_at)) => {
                let elapsed = now.duration_since(*prev_at).unwrap_or(Duration::from_secs(1)).as_secs_f64().max(0.001);
                let read_rate = (disk_usage.total_read_bytes.saturating_sub(*prev_read)) as f64 / elapsed;
                let write_rate = (disk_usage.total_written_bytes.saturating_sub(*prev_write)) as f64 / elapsed;
                (read_rate, write_rate)
            }
            None => (0.0, 0.0),
        };
        self.previous_io.insert(
            pid,
            (disk_usage.total_read_bytes, disk_usage.total_written_bytes, now),
        );

        Some(ResourceSample {
            timestamp: now,
            cpu_percent: process.cpu_usage(),
            rss_bytes: process.memory(),
            io_read_rate: read_rate,
            io_write_rate: write_rate,
            thread_count: process.tasks().map(|t| t.len()).unwrap_or(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(cpu: f32, rss: u64) -> ResourceSample {
        ResourceSample {
            timestamp: SystemTime::now(),
            cpu_percent: cpu,
            rss_bytes: rss,
            io_read_rate: 0.0,
            io_write_rate: 0.0,
            thread_count: 1,
        }
    }

    #[test]
    fn ring_buffer_evicts_oldest() {
        let mut buf = RingBuffer::new(2);
        buf.push(sample(1.0, 1));
        buf.push(sample(2.0, 2));
        buf.push(sample(3.0, 3));
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.latest().unwrap().cpu_percent, 3.0);
    }

    #[test]
    fn cpu_trend_detects_upward_slope() {
        let mut buf = RingBuffer::new(10);
        for cpu in [10.0, 20.0, 30.0, 40.0] {
            buf.push(sample(cpu, 0));
        }
        let trend = buf.cpu_trend(10).unwrap();
        assert!(trend > 0.0, "expected positive slope, got {trend}");
    }

    #[test]
    fn flat_samples_have_zero_trend() {
        let mut buf = RingBuffer::new(10);
        for _ in 0..5 {
            buf.push(sample(50.0, 0));
        }
        assert_eq!(buf.cpu_trend(10).unwrap(), 0.0);
    }

    #[test]
    fn threshold_severity_escalates() {
        let t = Threshold { warning: 50.0, critical: 80.0, emergency: 95.0 };
        assert_eq!(t.severity_for(10.0), None);
        assert_eq!(t.severity_for(60.0), Some(Severity::Warning));
        assert_eq!(t.severity_for(85.0), Some(Severity::Critical));
        assert_eq!(t.severity_for(99.0), Some(Severity::Emergency));
    }

    #[test]
    fn resource_limits_reports_every_exceeded_kind() {
        let limits = ResourceLimits {
            cpu_percent: Some(Threshold { warning: 50.0, critical: 80.0, emergency: 95.0 }),
            rss_bytes: Some(Threshold { warning: 1_000.0, critical: 2_000.0, emergency: 3_000.0 }),
        };
        let hits = limits.exceeded(&sample(90.0, 2_500));
        assert_eq!(
            hits,
            vec![
                (ResourceLimitKind::CpuPercent, Severity::Critical),
                (ResourceLimitKind::RssBytes, Severity::Critical),
            ]
        );
    }

    #[test]
    fn recommendations_are_empty_without_limits() {
        let mut buf = RingBuffer::new(10);
        buf.push(sample(10.0, 10));
        let recs = recommendations("agent-a", &buf, &ResourceLimits::default(), 10);
        assert!(recs.is_empty());
    }
}
