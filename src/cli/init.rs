use anyhow::Result;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::cli::config::{Config, LineConfig, PayloadConfig, ScenarioConfig, ThresholdSpec};

/// Built-in workloads against the two ledger endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Preset {
    /// 10k events/s against `POST /v1/events` for 10 minutes.
    EventIngestion,
    /// 200 looping users against `POST /v1/journal-entries` for 10 minutes.
    JournalPosting,
}

impl Preset {
    pub fn name(&self) -> &'static str {
        match self {
            Preset::EventIngestion => "event-ingestion",
            Preset::JournalPosting => "journal-posting",
        }
    }

    pub fn config(&self) -> Config {
        let (scenario, thresholds) = match self {
            Preset::EventIngestion => (
                ScenarioConfig {
                    executor: Some("constant-arrival-rate".to_string()),
                    endpoint: Some("events".to_string()),
                    rate: Some(10_000),
                    time_unit: Some("1s".to_string()),
                    duration: Some("10m".to_string()),
                    pre_allocated_vus: Some(1000),
                    max_vus: Some(5000),
                    accept: Some(vec![202, 409]),
                    source_system_header: Some(true),
                    payload: Some(payload("ing", Some("LOAD_EVENT"))),
                    ..Default::default()
                },
                vec![("http_req_failed", "rate<0.01")],
            ),
            Preset::JournalPosting => (
                ScenarioConfig {
                    executor: Some("constant-vus".to_string()),
                    endpoint: Some("journal-entries".to_string()),
                    vus: Some(200),
                    duration: Some("10m".to_string()),
                    pacing: Some("10ms".to_string()),
                    accept: Some(vec![201, 409]),
                    source_system_header: Some(false),
                    payload: Some(payload("je", None)),
                    ..Default::default()
                },
                vec![
                    ("http_req_duration", "p(99)<200"),
                    ("http_req_failed", "rate<0.01"),
                ],
            ),
        };

        let mut criteria: BTreeMap<String, Vec<ThresholdSpec>> = BTreeMap::new();
        for (metric, expr) in thresholds {
            criteria
                .entry(metric.to_string())
                .or_default()
                .push(ThresholdSpec::Expression(expr.to_string()));
        }

        Config {
            scenarios: BTreeMap::from([(self.name().to_string(), scenario)]),
            thresholds: criteria,
            target: None,
            threshold_check_interval: None,
        }
    }
}

fn payload(key_prefix: &str, event_type: Option<&str>) -> PayloadConfig {
    let line = |account: &str, is_credit: bool| LineConfig {
        account_code: account.to_string(),
        amount_cents: 100,
        is_credit,
        dimensions: None,
    };
    PayloadConfig {
        key_prefix: Some(key_prefix.to_string()),
        event_type: event_type.map(str::to_string),
        posted_date: Some("2026-02-25".to_string()),
        currency: Some("USD".to_string()),
        created_by: Some("loadgen".to_string()),
        description: None,
        reference_id: None,
        lines: Some(vec![line("CASH", false), line("REV", true)]),
    }
}

const HEADER: &str = "# fis-loadgen run configuration\n\
# Target settings come from BASE_URL, TENANT_ID, JWT_TOKEN and SOURCE_SYSTEM.\n\
# Use with: fis-loadgen run <this file>\n\n";

/// Write `preset` as a YAML config file. Refuses to overwrite.
pub fn run_init(preset: Preset, output: Option<&Path>) -> Result<PathBuf> {
    let path = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(format!("{}.yaml", preset.name())));

    if path.exists() {
        anyhow::bail!(
            "File already exists: {:?}. Remove it first or choose a different output path.",
            path
        );
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let yaml = serde_yaml::to_string(&preset.config())?;
    fs::write(&path, format!("{}{}", HEADER, yaml))?;
    println!("✓ Created {}", path.display());
    println!("\nRun it with:");
    println!("  fis-loadgen run {}", path.display());

    Ok(path)
}
