//! Concurrent load runner.
//!
//! Drives one provider with many simultaneous calls through a started
//! [`McpClient`], exercising reply correlation under load, and summarises
//! throughput and latency.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use serde::Serialize;

use crate::mcp_client::McpClient;

/// Distinct error messages kept in a report.
const MAX_SAMPLE_ERRORS: usize = 5;

/// Latency distribution of successful calls, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub min: f64,
    pub mean: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub server: String,
    pub method: String,
    pub concurrency: usize,
    pub total: usize,
    pub ok: usize,
    pub errors: usize,
    pub success_rate: f64,
    pub elapsed_ms: u64,
    pub throughput_rps: f64,
    pub latency: LatencySummary,
    pub sample_errors: Vec<String>,
}

impl LoadReport {
    /// Write the report as pretty JSON.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

struct Sample {
    latency_ms: f64,
    error: Option<String>,
}

/// Issue `total` calls of `method` on `server` from `concurrency` workers.
pub async fn run_load(
    client: &McpClient,
    server: &str,
    method: &str,
    params: serde_json::Value,
    concurrency: usize,
    total: usize,
) -> LoadReport {
    let concurrency = concurrency.max(1);
    let next = AtomicUsize::new(0);
    let started = Instant::now();

    tracing::info!(server, method, concurrency, total, "load run starting");

    let next = &next;
    let params = &params;
    let workers = (0..concurrency).map(|_| async move {
        let mut samples = Vec::new();
        while next.fetch_add(1, Ordering::Relaxed) < total {
            let t0 = Instant::now();
            let outcome = client.call(server, method, params.clone()).await;
            samples.push(Sample {
                latency_ms: t0.elapsed().as_secs_f64() * 1000.0,
                error: outcome.err().map(|e| e.to_string()),
            });
        }
        samples
    });
    let samples: Vec<Sample> = futures::future::join_all(workers)
        .await
        .into_iter()
        .flatten()
        .collect();

    let elapsed = started.elapsed();
    let report = summarize(server, method, concurrency, samples, elapsed.as_secs_f64());
    tracing::info!(
        server,
        ok = report.ok,
        errors = report.errors,
        elapsed_ms = report.elapsed_ms,
        throughput_rps = report.throughput_rps,
        "load run finished"
    );
    report
}

fn summarize(
    server: &str,
    method: &str,
    concurrency: usize,
    samples: Vec<Sample>,
    elapsed_secs: f64,
) -> LoadReport {
    let total = samples.len();
    let mut latencies = Vec::with_capacity(total);
    let mut sample_errors: Vec<String> = Vec::new();
    for sample in samples {
        match sample.error {
            None => latencies.push(sample.latency_ms),
            Some(err) => {
                if sample_errors.len() < MAX_SAMPLE_ERRORS && !sample_errors.contains(&err) {
                    sample_errors.push(err);
                }
            }
        }
    }
    let ok = latencies.len();

    LoadReport {
        server: server.to_string(),
        method: method.to_string(),
        concurrency,
        total,
        ok,
        errors: total - ok,
        success_rate: round2(100.0 * ok as f64 / total.max(1) as f64),
        elapsed_ms: (elapsed_secs * 1000.0) as u64,
        throughput_rps: round2(total as f64 / elapsed_secs.max(1e-6)),
        latency: latency_summary(latencies),
        sample_errors,
    }
}

fn latency_summary(mut latencies: Vec<f64>) -> LatencySummary {
    if latencies.is_empty() {
        return LatencySummary::default();
    }
    latencies.sort_by(|a, b| a.total_cmp(b));
    let mean = latencies.iter().sum::<f64>() / latencies.len() as f64;
    LatencySummary {
        min: round2(latencies[0]),
        mean: round2(mean),
        p50: round2(percentile(&latencies, 50.0)),
        p90: round2(percentile(&latencies, 90.0)),
        p95: round2(percentile(&latencies, 95.0)),
        p99: round2(percentile(&latencies, 99.0)),
        max: round2(latencies[latencies.len() - 1]),
    }
}

/// Nearest-rank percentile of a sorted, non-empty slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

// ─── Tests ───────────────────────────────────────────────────────────────────
