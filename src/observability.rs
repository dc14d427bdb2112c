use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

use crate::pipeline::Artifact;

#[derive(Debug, Default, Serialize, Clone)]
pub struct MetricsSnapshot {
    pub fragments: BTreeMap<String, FragmentMetrics>,
    pub total_duration_ms: f64,
    pub output_files: u64,
    pub output_bytes: u64,
}

#[derive(Debug, Default, Serialize, Clone)]
pub struct FragmentMetrics {
    pub calls: u64,
    pub total_duration_ms: f64,
    pub max_duration_ms: f64,
}

/// Shared, cloneable sink for fragment timings of a build run.
#[derive(Debug, Default, Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsSnapshot>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_fragment(&self, fragment: &str) -> FragmentTimer {
        FragmentTimer {
            fragment: fragment.to_string(),
            started_at: Instant::now(),
            collector: self.inner.clone(),
            recorded: false,
        }
    }

    pub fn record_total_duration(&self, duration: Duration) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.total_duration_ms = duration.as_secs_f64() * 1_000.0;
        }
    }

    pub fn record_output(&self, report: &SizeReport) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.output_files = report.files;
            guard.output_bytes = report.bytes;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

pub struct FragmentTimer {
    fragment: String,
    started_at: Instant,
    collector: Arc<Mutex<MetricsSnapshot>>,
    recorded: bool,
}

impl FragmentTimer {
    fn record(&mut self) {
        if self.recorded {
            return;
        }
        let duration_ms = self.started_at.elapsed().as_secs_f64() * 1_000.0;
        if let Ok(mut guard) = self.collector.lock() {
            let metrics = guard.fragments.entry(self.fragment.clone()).or_default();
            metrics.calls += 1;
            metrics.total_duration_ms += duration_ms;
            if duration_ms > metrics.max_duration_ms {
                metrics.max_duration_ms = duration_ms;
            }
        }
        debug!(
            fragment = self.fragment.as_str(),
            duration_ms, "Fragment duration recorded"
        );
        self.recorded = true;
    }
}

impl Drop for FragmentTimer {
    fn drop(&mut self) {
        self.record();
    }
}

/// File count and byte total of a stream, logged after persisting a build.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SizeReport {
    pub files: u64,
    pub bytes: u64,
}

impl SizeReport {
    pub fn of(artifacts: &[Artifact]) -> Self {
        artifacts.iter().fold(SizeReport::default(), |acc, artifact| SizeReport {
            files: acc.files + 1,
            bytes: acc.bytes + artifact.contents.len() as u64,
        })
    }
}

pub fn log_size(title: &str, artifacts: &[Artifact]) -> SizeReport {
    for artifact in artifacts {
        debug!(
            file = %artifact.relative_str(),
            size = %format_bytes(artifact.contents.len() as u64),
            "{title}"
        );
    }
    let report = SizeReport::of(artifacts);
    info!(
        files = report.files,
        total = %format_bytes(report.bytes),
        "{title}: all files"
    );
    report
}

pub fn log_snapshot(snapshot: &MetricsSnapshot) {
    info!(
        total_duration_ms = snapshot.total_duration_ms,
        fragment_count = snapshot.fragments.len(),
        output_files = snapshot.output_files,
        output_bytes = snapshot.output_bytes,
        "Build metrics summary"
    );
    for (fragment, metrics) in &snapshot.fragments {
        info!(
            fragment = fragment.as_str(),
            calls = metrics.calls,
            total_ms = metrics.total_duration_ms,
            max_ms = metrics.max_duration_ms,
            "Fragment metrics"
        );
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "kB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(999), "999 B");
        assert_eq!(format_bytes(1_500), "1.50 kB");
        assert_eq!(format_bytes(2_000_000), "2.00 MB");
    }

    #[test]
    fn timers_accumulate_per_fragment() {
        let metrics = MetricsCollector::new();
        drop(metrics.start_fragment("concat"));
        drop(metrics.start_fragment("concat"));
        drop(metrics.start_fragment("sort"));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.fragments["concat"].calls, 2);
        assert_eq!(snapshot.fragments["sort"].calls, 1);
    }

    #[test]
    fn size_report_counts_files_and_bytes() {
        let artifacts = vec![
            Artifact::new("a.js", "abc"),
            Artifact::new("b.css", "defgh"),
        ];
        assert_eq!(
            SizeReport::of(&artifacts),
            SizeReport { files: 2, bytes: 8 }
        );
    }
}
