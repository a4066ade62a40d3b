use anyhow::Result;
use std::path::Path;

use crate::cli::config::{Config, TargetConfig};
use crate::engine::scenario::{Executor, RunPlan};

/// Load a config file and build its run plan without sending anything.
/// Checks for:
/// - YAML/JSON syntax errors
/// - Scenario and threshold validity
/// - Target settings from the environment
pub fn run_validate(config_path: &Path) -> Result<RunPlan> {
    validate_with(config_path, |var| std::env::var(var).ok())
}

/// [`run_validate`] with target settings resolved through `lookup`.
pub fn validate_with<F>(config_path: &Path, lookup: F) -> Result<RunPlan>
where
    F: Fn(&str) -> Option<String>,
{
    println!("Validating {}...", config_path.display());

    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("  ✗ Config file invalid: {:#}", e);
            return Err(e);
        }
    };
    println!("  ✓ Config parsed");

    let target = TargetConfig::from_lookup(lookup, config.target.as_ref()).inspect_err(|e| {
        println!("  ✗ Target invalid: {}", e);
    })?;
    if target.token.is_empty() {
        println!("  ⚠ JWT_TOKEN is not set; requests will carry an empty bearer token");
    }

    let plan = config.into_plan(target).inspect_err(|e| {
        println!("  ✗ Validation failed: {}", e);
    })?;

    println!("  ✓ Target: {}", plan.target.base_url);
    for s in &plan.scenarios {
        let shape = match &s.executor {
            Executor::ConstantArrivalRate {
                rate,
                time_unit,
                pre_allocated_vus,
                max_vus,
            } => format!(
                "{} {}/{:?}, vus {}..{}",
                s.executor.name(),
                rate,
                time_unit,
                pre_allocated_vus,
                max_vus
            ),
            Executor::ClosedWorkload { vus, pacing } => {
                format!("{} {} vus, pacing {:?}", s.executor.name(), vus, pacing)
            }
        };
        println!("    {}: {} -> {}", s.name, shape, s.endpoint().path());
    }
    for t in &plan.thresholds {
        println!("    threshold {}", t.id);
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_validate_good_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("run.yaml");
        fs::write(
            &path,
            r#"
target:
  baseUrl: http://ledger.internal:8080
scenarios:
  ingest:
    endpoint: events
    rate: 20
    preAllocatedVUs: 2
    duration: 5s
thresholds:
  http_req_failed: ["rate<0.01"]
"#,
        )
        .unwrap();

        let plan = validate_with(&path, no_env).unwrap();
        assert_eq!(plan.scenarios.len(), 1);
        assert_eq!(plan.thresholds.len(), 1);
    }

    #[test]
    fn test_validate_rejects_bad_scenario() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("run.yaml");
        fs::write(
            &path,
            "scenarios:\n  ingest:\n    endpoint: events\n    rate: 20\n    duration: 5s\n",
        )
        .unwrap();

        assert!(validate_with(&path, no_env).is_err());
    }

    #[test]
    fn test_validate_rejects_syntax_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("run.yaml");
        fs::write(&path, "scenarios: [unclosed").unwrap();

        assert!(validate_with(&path, no_env).is_err());
    }

    #[test]
    fn test_validate_resolves_target_through_lookup() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("run.yaml");
        fs::write(
            &path,
            "scenarios:\n  posting:\n    endpoint: journal-entries\n    vus: 2\n    iterations: 3\n",
        )
        .unwrap();

        let plan = validate_with(&path, |var| {
            (var == "BASE_URL").then(|| "https://ledger.example.com".to_string())
        })
        .unwrap();
        assert_eq!(plan.target.base_url, "https://ledger.example.com");

        let bad = validate_with(&path, |var| {
            (var == "BASE_URL").then(|| "not a url".to_string())
        });
        assert!(bad.is_err());
    }
}
