use basalt_ipc::prelude::*;
use std::time::Instant;
use tempfile::TempDir;

// ─── Statistics ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Stats {
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub stddev: f64,
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
    pub p999: u64,
    pub count: usize,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BenchResult {
    pub name: String,
    pub unit: String,
    pub stats: Stats,
}

pub fn compute_stats(samples: &mut [u64]) -> Stats {
    assert!(!samples.is_empty(), "cannot compute stats on empty samples");
    samples.sort_unstable();

    let count = samples.len();
    let sum: u64 = samples.iter().sum();
    let mean = sum as f64 / count as f64;

    let variance = samples
        .iter()
        .map(|&x| {
            let diff = x as f64 - mean;
            diff * diff
        })
        .sum::<f64>()
        / count as f64;

    Stats {
        min: samples[0],
        max: samples[count - 1],
        mean,
        stddev: variance.sqrt(),
        p50: percentile_sorted(samples, 50.0),
        p90: percentile_sorted(samples, 90.0),
        p99: percentile_sorted(samples, 99.0),
        p999: percentile_sorted(samples, 99.9),
        count,
    }
}

fn percentile_sorted(sorted: &[u64], pct: f64) -> u64 {
    let len = sorted.len();
    if len == 1 {
        return sorted[0];
    }
    let rank = (pct / 100.0 * len as f64).ceil() as usize;
    let idx = rank.saturating_sub(1).min(len - 1);
    sorted[idx]
}

// ─── Measurement Harness ────────────────────────────────────────────────────

pub fn measure_batched<F: FnMut()>(
    name: &str,
    batches: usize,
    batch_size: usize,
    warmup: usize,
    mut f: F,
) -> BenchResult {
    for _ in 0..warmup * batch_size {
        f();
    }

    let mut samples = Vec::with_capacity(batches);
    for _ in 0..batches {
        let start = Instant::now();
        for _ in 0..batch_size {
            f();
        }
        let total = start.elapsed().as_nanos();
        let per_op = ((total + (batch_size as u128 / 2)) / batch_size as u128) as u64;
        samples.push(per_op.max(1));
    }

    BenchResult {
        name: name.to_string(),
        unit: "ns/op".to_string(),
        stats: compute_stats(&mut samples),
    }
}

// ─── Resource Usage ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, serde::Serialize)]
pub struct ResourceSnapshot {
    pub max_rss_bytes: i64,
    pub minor_faults: i64,
    pub major_faults: i64,
    pub vol_ctx_switches: i64,
    pub invol_ctx_switches: i64,
}

pub fn capture_rusage() -> ResourceSnapshot {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    #[cfg(target_os = "linux")]
    let max_rss_bytes = usage.ru_maxrss * 1024;
    #[cfg(not(target_os = "linux"))]
    let max_rss_bytes = usage.ru_maxrss;
    ResourceSnapshot {
        max_rss_bytes,
        minor_faults: usage.ru_minflt,
        major_faults: usage.ru_majflt,
        vol_ctx_switches: usage.ru_nvcsw,
        invol_ctx_switches: usage.ru_nivcsw,
    }
}

// ─── Fixture ────────────────────────────────────────────────────────────────

/// A node attached to a private root directory that disappears with it.
pub struct BenchNode {
    pub node: Node,
    _root: TempDir,
}

impl BenchNode {
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("failed to create bench root");
        let config = Config::default().with_root_path(root.path());
        let node = NodeBuilder::new()
            .config(&config)
            .create()
            .expect("failed to create bench node");
        Self { node, _root: root }
    }

    pub fn service_name(label: &str) -> ServiceName {
        ServiceName::new(&format!("bench/{label}")).expect("invalid bench service name")
    }
}

impl Default for BenchNode {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Output ─────────────────────────────────────────────────────────────────

pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

pub fn print_table_header() {
    println!(
        "  {:<34} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}  unit",
        "Benchmark", "min", "p50", "p90", "p99", "p99.9", "max",
    );
    println!("  {}", "─".repeat(96));
}

pub fn print_result_row(r: &BenchResult) {
    println!(
        "  {:<34} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}  {}",
        r.name,
        r.stats.min,
        r.stats.p50,
        r.stats.p90,
        r.stats.p99,
        r.stats.p999,
        r.stats.max,
        r.unit,
    );
}

pub fn section_header(title: &str) {
    println!("\n{}", "─".repeat(90));
    println!("  {title}");
    println!("{}\n", "─".repeat(90));
}
