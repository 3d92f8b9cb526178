// Metrics collection and tracking

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Latency samples kept per endpoint for percentiles
const MAX_LATENCY_SAMPLES: usize = 1000;

/// Per-endpoint metrics
#[derive(Debug, Clone)]
pub struct EndpointMetrics {
    pub request_count: Arc<AtomicU64>,
    pub error_count: Arc<AtomicU64>,
    pub total_latency_ms: Arc<AtomicU64>,
    pub min_latency_ms: Arc<AtomicU64>,
    pub max_latency_ms: Arc<AtomicU64>,
    pub latency_samples: Arc<std::sync::Mutex<Vec<u64>>>,
}

impl EndpointMetrics {
    pub fn new() -> Self {
        Self {
            request_count: Arc::new(AtomicU64::new(0)),
            error_count: Arc::new(AtomicU64::new(0)),
            total_latency_ms: Arc::new(AtomicU64::new(0)),
            min_latency_ms: Arc::new(AtomicU64::new(u64::MAX)),
            max_latency_ms: Arc::new(AtomicU64::new(0)),
            latency_samples: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    /// Record a finished request. For streamed endpoints the latency is time to first byte.
    pub fn record_request(&self, latency_ms: u64) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.min_latency_ms.fetch_min(latency_ms, Ordering::Relaxed);
        self.max_latency_ms.fetch_max(latency_ms, Ordering::Relaxed);

        if let Ok(mut samples) = self.latency_samples.lock() {
            samples.push(latency_ms);
            if samples.len() > MAX_LATENCY_SAMPLES {
                samples.remove(0);
            }
        }
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn avg_latency_ms(&self) -> f64 {
        let count = self.request_count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let total = self.total_latency_ms.load(Ordering::Relaxed);
        total as f64 / count as f64
    }

    fn percentile(&self, p: u8) -> u64 {
        if let Ok(samples) = self.latency_samples.lock() {
            if samples.is_empty() {
                return 0;
            }
            let mut sorted = samples.clone();
            sorted.sort_unstable();
            let index = (sorted.len() * p as usize / 100).min(sorted.len() - 1);
            sorted[index]
        } else {
            0
        }
    }

    pub fn stats(&self) -> EndpointStats {
        let min = self.min_latency_ms.load(Ordering::Relaxed);
        EndpointStats {
            request_count: self.request_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            avg_latency_ms: self.avg_latency_ms(),
            min_latency_ms: if min == u64::MAX { 0 } else { min },
            max_latency_ms: self.max_latency_ms.load(Ordering::Relaxed),
            p50_latency_ms: self.percentile(50),
            p95_latency_ms: self.percentile(95),
            p99_latency_ms: self.percentile(99),
        }
    }
}

impl Default for EndpointMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Provider-side counters
#[derive(Debug, Clone)]
pub struct UpstreamMetrics {
    pub calls: Arc<AtomicU64>,
    pub failures: Arc<AtomicU64>,
    pub audio_bytes: Arc<AtomicU64>,
    pub streamed_bytes: Arc<AtomicU64>,
    pub interrupted_streams: Arc<AtomicU64>,
}

impl UpstreamMetrics {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(AtomicU64::new(0)),
            failures: Arc::new(AtomicU64::new(0)),
            audio_bytes: Arc::new(AtomicU64::new(0)),
            streamed_bytes: Arc::new(AtomicU64::new(0)),
            interrupted_streams: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn record_call(&self, ok: bool) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_audio(&self, bytes: usize) {
        self.audio_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_streamed(&self, bytes: usize) {
        self.streamed_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_interrupted(&self) {
        self.interrupted_streams.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> UpstreamStats {
        UpstreamStats {
            calls: self.calls.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            audio_bytes: self.audio_bytes.load(Ordering::Relaxed),
            streamed_bytes: self.streamed_bytes.load(Ordering::Relaxed),
            interrupted_streams: self.interrupted_streams.load(Ordering::Relaxed),
        }
    }
}

impl Default for UpstreamMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// All counters shared by the handlers
#[derive(Debug, Clone)]
pub struct AppMetrics {
    pub audio: EndpointMetrics,
    pub chat: EndpointMetrics,
    pub translation: EndpointMetrics,
    pub upstream: UpstreamMetrics,
    pub started_at: Instant,
}

impl AppMetrics {
    pub fn new() -> Self {
        Self {
            audio: EndpointMetrics::new(),
            chat: EndpointMetrics::new(),
            translation: EndpointMetrics::new(),
            upstream: UpstreamMetrics::new(),
            started_at: Instant::now(),
        }
    }

    pub fn total_requests(&self) -> u64 {
        [&self.audio, &self.chat, &self.translation]
            .iter()
            .map(|m| m.request_count.load(Ordering::Relaxed) + m.error_count.load(Ordering::Relaxed))
            .sum()
    }

    pub fn snapshot(&self) -> MetricsResponse {
        MetricsResponse {
            timestamp: Utc::now(),
            system: collect_system_metrics(self.total_requests(), self.started_at.elapsed().as_secs()),
            endpoints: EndpointMetricsResponse {
                audio: self.audio.stats(),
                chat: self.chat.stats(),
                translation: self.translation.stats(),
            },
            upstream: self.upstream.stats(),
        }
    }
}

impl Default for AppMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_system_metrics(request_count: u64, uptime_seconds: u64) -> SystemMetrics {
    let mut system = sysinfo::System::new();
    system.refresh_cpu();
    system.refresh_memory();

    let cpu_usage = system.global_cpu_info().cpu_usage();
    let memory_used = system.used_memory();
    let memory_total = system.total_memory();
    let memory_usage_percent = if memory_total > 0 {
        (memory_used as f64 / memory_total as f64 * 100.0) as f32
    } else {
        0.0
    };

    // Unix-like systems only
    let system_load = {
        #[cfg(unix)]
        {
            std::fs::read_to_string("/proc/loadavg")
                .ok()
                .and_then(|l| l.split_whitespace().next().and_then(|s| s.parse::<f64>().ok()))
        }
        #[cfg(not(unix))]
        None
    };

    SystemMetrics {
        cpu_usage_percent: cpu_usage,
        memory_used_mb: memory_used / 1024 / 1024,
        memory_total_mb: memory_total / 1024 / 1024,
        memory_usage_percent,
        request_count,
        uptime_seconds,
        system_load,
    }
}

#[derive(Serialize)]
pub struct MetricsResponse {
    pub timestamp: DateTime<Utc>,
    pub system: SystemMetrics,
    pub endpoints: EndpointMetricsResponse,
    pub upstream: UpstreamStats,
}

#[derive(Serialize)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub memory_usage_percent: f32,
    pub request_count: u64,
    pub uptime_seconds: u64,
    pub system_load: Option<f64>,
}

#[derive(Serialize)]
pub struct EndpointMetricsResponse {
    pub audio: EndpointStats,
    pub chat: EndpointStats,
    pub translation: EndpointStats,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct EndpointStats {
    pub request_count: u64,
    pub error_count: u64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
    pub p99_latency_ms: u64,
}

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct UpstreamStats {
    pub calls: u64,
    pub failures: u64,
    pub audio_bytes: u64,
    pub streamed_bytes: u64,
    pub interrupted_streams: u64,
}
