//! Container resource sampling and restart counting.
//!
//! `docker stats --no-stream` is sampled in the background while the load
//! phase runs; `docker compose ps --format json` supplies restart counts
//! for the restart objective afterwards.

use std::collections::BTreeMap;
use std::time::Duration;

use qa_core::config::InfraConfig;
use qa_core::{ContainerStats, QaError, QaResult};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::environment::ComposeStack;
use crate::external::Invocation;

const STATS_FORMAT: &str = "{{.Name}}\t{{.CPUPerc}}\t{{.MemUsage}}\t{{.MemPerc}}";
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// One `docker stats` row.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSample {
    pub name: String,
    pub cpu_pct: f64,
    pub mem_usage_mb: f64,
    pub mem_limit_mb: f64,
    pub mem_pct: f64,
}

/// Convert a docker memory figure to MB.
pub fn to_mb(value: f64, unit: &str) -> Option<f64> {
    match unit {
        "KiB" | "kB" | "KB" => Some(value / 1024.0),
        "MiB" | "MB" => Some(value),
        "GiB" | "GB" => Some(value * 1024.0),
        "B" => Some(value / (1024.0 * 1024.0)),
        _ => None,
    }
}

fn parse_quantity(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let split = raw.find(|c: char| !(c.is_ascii_digit() || c == '.'))?;
    let (number, unit) = raw.split_at(split);
    to_mb(number.parse().ok()?, unit.trim())
}

/// Parse `123.4MiB / 1.5GiB` into (usage, limit) in MB.
pub fn parse_mem_usage(raw: &str) -> Option<(f64, f64)> {
    let (usage, limit) = raw.split_once('/')?;
    Some((parse_quantity(usage)?, parse_quantity(limit)?))
}

fn parse_pct(raw: &str) -> f64 {
    raw.trim().trim_end_matches('%').parse().unwrap_or(0.0)
}

/// Parse one tab-separated stats row. Unparseable figures count as zero,
/// rows with missing columns are dropped.
pub fn parse_stats_line(line: &str) -> Option<ContainerSample> {
    let parts: Vec<&str> = line.split('\t').collect();
    if parts.len() < 4 {
        return None;
    }
    let name = parts[0].trim();
    if name.is_empty() {
        return None;
    }
    let (mem_usage_mb, mem_limit_mb) = parse_mem_usage(parts[2]).unwrap_or((0.0, 0.0));
    Some(ContainerSample {
        name: name.to_string(),
        cpu_pct: parse_pct(parts[1]),
        mem_usage_mb,
        mem_limit_mb,
        mem_pct: parse_pct(parts[3]),
    })
}

pub fn parse_stats(stdout: &str) -> Vec<ContainerSample> {
    stdout.lines().filter_map(parse_stats_line).collect()
}

/// Sum `RestartCount` over `compose ps --format json` output. Accepts one
/// object per line as well as a single JSON array.
pub fn parse_restart_counts(stdout: &str) -> u32 {
    let count = |value: &Value| value.get("RestartCount").and_then(Value::as_u64).unwrap_or(0);
    let trimmed = stdout.trim();
    if trimmed.starts_with('[') {
        return serde_json::from_str::<Vec<Value>>(trimmed)
            .map(|rows| rows.iter().map(count).sum::<u64>())
            .unwrap_or(0) as u32;
    }
    trimmed
        .lines()
        .filter_map(|line| serde_json::from_str::<Value>(line.trim()).ok())
        .map(|row| count(&row))
        .sum::<u64>() as u32
}

/// Fold samples into per-container averages and peaks, sorted by name.
pub fn summarize(samples: &[ContainerSample]) -> Vec<ContainerStats> {
    let mut grouped: BTreeMap<&str, Vec<&ContainerSample>> = BTreeMap::new();
    for sample in samples {
        grouped.entry(sample.name.as_str()).or_default().push(sample);
    }

    grouped
        .into_iter()
        .map(|(name, rows)| {
            let n = rows.len() as f64;
            let max = |f: fn(&ContainerSample) -> f64| rows.iter().map(|r| f(r)).fold(0.0, f64::max);
            ContainerStats {
                name: name.to_string(),
                samples: rows.len(),
                cpu_pct_avg: rows.iter().map(|r| r.cpu_pct).sum::<f64>() / n,
                cpu_pct_max: max(|r| r.cpu_pct),
                mem_mb_avg: rows.iter().map(|r| r.mem_usage_mb).sum::<f64>() / n,
                mem_mb_max: max(|r| r.mem_usage_mb),
                mem_pct_max: max(|r| r.mem_pct),
            }
        })
        .collect()
}

/// Take one `docker stats` snapshot.
pub async fn sample_once(stack: &ComposeStack) -> QaResult<Vec<ContainerSample>> {
    let invocation = Invocation::new(
        "docker",
        vec![
            "stats".to_string(),
            "--no-stream".to_string(),
            "--format".to_string(),
            STATS_FORMAT.to_string(),
        ],
        stack.project_root(),
        PROBE_TIMEOUT,
    );
    let output = stack.shell().run(invocation).await?;
    if !output.success() {
        return Err(QaError::command("docker", format!("stats failed: {}", output.tail(200))));
    }
    Ok(parse_stats(&output.stdout))
}

/// Total container restarts of the stack.
pub async fn restart_count(stack: &ComposeStack) -> QaResult<u32> {
    let output = stack
        .shell()
        .run(stack.invocation(&["ps", "--format", "json"], PROBE_TIMEOUT))
        .await?;
    if !output.success() {
        return Err(QaError::command("docker", format!("compose ps failed: {}", output.tail(200))));
    }
    Ok(parse_restart_counts(&output.stdout))
}

/// Background `docker stats` sampler.
pub struct StatsSampler {
    stop: watch::Sender<bool>,
    task: JoinHandle<Vec<ContainerSample>>,
}

impl StatsSampler {
    /// Sample immediately, then every interval, up to the configured
    /// number of samples or until finished.
    pub fn spawn(stack: ComposeStack, config: &InfraConfig) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let interval = config.interval();
        let max_samples = config.samples.max(1);

        let task = tokio::spawn(async move {
            let mut samples = Vec::new();
            for taken in 1..=max_samples {
                match sample_once(&stack).await {
                    Ok(batch) => {
                        debug!(containers = batch.len(), taken, "stats sample");
                        samples.extend(batch);
                    }
                    Err(e) => debug!(error = %e, "stats sample failed"),
                }
                if taken == max_samples || *stopped.borrow() {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = stopped.changed() => break,
                }
            }
            samples
        });

        Self { stop, task }
    }

    /// Stop sampling and collect what was gathered.
    pub async fn finish(self) -> Vec<ContainerSample> {
        let _ = self.stop.send(true);
        match self.task.await {
            Ok(samples) => samples,
            Err(e) => {
                warn!(error = %e, "stats sampler task failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stats_rows() {
        let stdout = "poi-service\t12.50%\t123.4MiB / 1.5GiB\t8.03%\n\
                      render-service\t0.00%\t512KiB / 2GiB\t0.02%\n\
                      broken-row\t1%\n";
        let samples = parse_stats(stdout);

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].name, "poi-service");
        assert_eq!(samples[0].cpu_pct, 12.5);
        assert!((samples[0].mem_usage_mb - 123.4).abs() < 1e-9);
        assert_eq!(samples[0].mem_limit_mb, 1536.0);
        assert_eq!(samples[0].mem_pct, 8.03);
        assert_eq!(samples[1].mem_usage_mb, 0.5);
        assert_eq!(samples[1].mem_limit_mb, 2048.0);
    }

    #[test]
    fn unknown_units_degrade_to_zero() {
        let sample = parse_stats_line("db\t--\t1.2TiB / 4TiB\tn/a").unwrap();
        assert_eq!(sample.cpu_pct, 0.0);
        assert_eq!(sample.mem_usage_mb, 0.0);
        assert_eq!(sample.mem_pct, 0.0);
    }

    #[test]
    fn restart_counts_from_lines_or_array() {
        let lines = "{\"Name\":\"poi\",\"RestartCount\":2}\n{\"Name\":\"asset\",\"RestartCount\":0}\nnot json\n";
        assert_eq!(parse_restart_counts(lines), 2);

        let array = r#"[{"Name":"poi","RestartCount":1},{"Name":"render","RestartCount":3}]"#;
        assert_eq!(parse_restart_counts(array), 4);
        assert_eq!(parse_restart_counts(""), 0);
    }

    #[test]
    fn summary_averages_and_peaks() {
        let sample = |cpu: f64, mem: f64| ContainerSample {
            name: "poi".to_string(),
            cpu_pct: cpu,
            mem_usage_mb: mem,
            mem_limit_mb: 1024.0,
            mem_pct: mem / 10.24,
        };
        let stats = summarize(&[sample(10.0, 100.0), sample(30.0, 300.0)]);

        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].samples, 2);
        assert_eq!(stats[0].cpu_pct_avg, 20.0);
        assert_eq!(stats[0].cpu_pct_max, 30.0);
        assert_eq!(stats[0].mem_mb_avg, 200.0);
        assert_eq!(stats[0].mem_mb_max, 300.0);
    }
}
