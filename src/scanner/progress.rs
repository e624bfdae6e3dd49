//! Throughput and host-load sampling for the metrics tick.

use std::time::Instant;
use sysinfo::System;

const MIB: f64 = 1024.0 * 1024.0;

/// Rates computed over one sampling window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Throughput {
    pub files_per_sec: f64,
    pub mib_per_sec: f64,
}

/// Turns cumulative counters into per-second rates.
///
/// Rates are never negative: if a counter goes backwards (a reset between
/// samples) the delta is taken as zero.
#[derive(Debug, Default)]
pub struct SpeedMeter {
    last: Option<(Instant, u64, u64)>,
}

impl SpeedMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record cumulative `files` and `bytes` seen at `now`.
    pub fn sample(&mut self, now: Instant, files: u64, bytes: u64) -> Throughput {
        let rate = match self.last {
            Some((then, prev_files, prev_bytes)) => {
                let secs = now.saturating_duration_since(then).as_secs_f64();
                if secs > 0.0 {
                    Throughput {
                        files_per_sec: files.saturating_sub(prev_files) as f64 / secs,
                        mib_per_sec: bytes.saturating_sub(prev_bytes) as f64 / MIB / secs,
                    }
                } else {
                    Throughput::default()
                }
            }
            None => Throughput::default(),
        };
        self.last = Some((now, files, bytes));
        rate
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Host CPU and memory usage, in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HostLoad {
    pub cpu: f32,
    pub memory: f32,
}

/// Keeps one `sysinfo::System` alive so CPU usage is measured between refreshes.
pub struct SystemSampler {
    sys: System,
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSampler {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu();
        sys.refresh_memory();
        Self { sys }
    }

    pub fn sample(&mut self) -> HostLoad {
        self.sys.refresh_cpu();
        self.sys.refresh_memory();

        let cpus = self.sys.cpus();
        let cpu = cpus.iter().map(|c| c.cpu_usage()).sum::<f32>() / cpus.len().max(1) as f32;

        let total = self.sys.total_memory();
        let memory = if total > 0 {
            (self.sys.used_memory() as f64 / total as f64 * 100.0) as f32
        } else {
            0.0
        };

        HostLoad {
            cpu: cpu.clamp(0.0, 100.0),
            memory: memory.clamp(0.0, 100.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_first_sample_is_zero() {
        let mut meter = SpeedMeter::new();
        let rate = meter.sample(Instant::now(), 100, 1000);
        assert_eq!(rate, Throughput::default());
    }

    #[test]
    fn test_rate_over_window() {
        let mut meter = SpeedMeter::new();
        let start = Instant::now();
        meter.sample(start, 0, 0);
        let rate = meter.sample(start + Duration::from_secs(2), 50, 4 * 1024 * 1024);
        assert!((rate.files_per_sec - 25.0).abs() < 1e-9);
        assert!((rate.mib_per_sec - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_counter_reset_clamps_to_zero() {
        let mut meter = SpeedMeter::new();
        let start = Instant::now();
        meter.sample(start, 500, 500);
        let rate = meter.sample(start + Duration::from_secs(1), 10, 10);
        assert_eq!(rate.files_per_sec, 0.0);
        assert_eq!(rate.mib_per_sec, 0.0);
        assert!(rate.files_per_sec >= 0.0);
    }

    #[test]
    fn test_zero_interval() {
        let mut meter = SpeedMeter::new();
        let now = Instant::now();
        meter.sample(now, 0, 0);
        assert_eq!(meter.sample(now, 10, 10), Throughput::default());
    }

    #[test]
    fn test_host_load_in_range() {
        let mut sampler = SystemSampler::new();
        let load = sampler.sample();
        assert!((0.0..=100.0).contains(&load.cpu));
        assert!((0.0..=100.0).contains(&load.memory));
    }
}
