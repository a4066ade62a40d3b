use anyhow::{Context, Result};
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::classify::AcceptanceRule;
use crate::engine::request::{Endpoint, JournalLine, PayloadTemplate, RequestBuilder};
use crate::engine::scenario::{
    Executor, RunPlan, Scenario, StopCondition, DEFAULT_GRACEFUL_STOP, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_THRESHOLD_CHECK_INTERVAL,
};
use crate::error::ConfigError;
use crate::stats::Threshold;
use crate::utils::parse_duration_field;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_TENANT_ID: &str = "00000000-0000-0000-0000-000000000001";
pub const DEFAULT_SOURCE_SYSTEM: &str = "K6";

/// One journal line of the payload template.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq, JsonSchema)]
pub struct LineConfig {
    #[serde(alias = "accountCode")]
    pub account_code: String,
    /// Amount in integer minor currency units.
    #[serde(alias = "amountCents")]
    pub amount_cents: i64,
    #[serde(default, alias = "isCredit")]
    pub is_credit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<BTreeMap<String, String>>,
}

/// Payload template overrides. Anything left out keeps the balanced default.
#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
pub struct PayloadConfig {
    /// Prefix of the generated idempotency key (default: `ing` for events, `je` for journal entries)
    #[serde(alias = "keyPrefix", skip_serializing_if = "Option::is_none")]
    pub key_prefix: Option<String>,
    #[serde(alias = "eventType", skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    /// ISO date, e.g. "2026-02-25"
    #[serde(alias = "postedDate", skip_serializing_if = "Option::is_none")]
    pub posted_date: Option<String>,
    /// Three-letter currency code
    #[serde(alias = "transactionCurrency", skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(alias = "createdBy", skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(alias = "referenceId", skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    /// Sent exactly as given; the harness does not balance them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines: Option<Vec<LineConfig>>,
}

/// A threshold expression, optionally with abort settings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
#[serde(untagged)]
pub enum ThresholdSpec {
    Expression(String),
    Detailed {
        threshold: String,
        #[serde(default, alias = "abortOnFail")]
        abort_on_fail: bool,
        #[serde(
            default,
            alias = "delayAbortEval",
            skip_serializing_if = "Option::is_none"
        )]
        delay_abort_eval: Option<String>,
    },
}

/// Configuration for a single scenario
#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
pub struct ScenarioConfig {
    /// Executor type (constant-arrival-rate, constant-vus, closed-workload, per-vu-iterations)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor: Option<String>,
    /// Target endpoint (events, journal-entries)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Arrivals per time unit (constant-arrival-rate)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<u64>,
    /// Time unit for rate (default: "1s")
    #[serde(alias = "timeUnit", skip_serializing_if = "Option::is_none")]
    pub time_unit: Option<String>,
    /// Users started before the first arrival (constant-arrival-rate)
    #[serde(
        alias = "preAllocatedVUs",
        alias = "pre_allocated",
        skip_serializing_if = "Option::is_none"
    )]
    pub pre_allocated_vus: Option<usize>,
    /// Pool ceiling; arrivals beyond it are dropped (default: pre_allocated_vus)
    #[serde(alias = "maxVUs", skip_serializing_if = "Option::is_none")]
    pub max_vus: Option<usize>,
    /// Fixed concurrency (closed workload, default: 1)
    #[serde(alias = "workers", skip_serializing_if = "Option::is_none")]
    pub vus: Option<usize>,
    /// Sleep between iterations of one user (closed workload)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pacing: Option<String>,
    /// Duration of the scenario (e.g., "10m")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    /// Total arrivals (constant-arrival-rate) or iterations per user (closed workload)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u64>,
    /// Delay before starting this scenario (e.g., "30s")
    #[serde(alias = "startTime", skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    /// How long in-flight iterations may run after stop (default: "30s")
    #[serde(alias = "gracefulStop", skip_serializing_if = "Option::is_none")]
    pub graceful_stop: Option<String>,
    /// Per-request deadline (default: "60s")
    #[serde(alias = "requestTimeout", skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<String>,
    /// Status codes counted as success (default: 202/409 for events, 201/409 for journal entries)
    #[serde(alias = "acceptStatuses", skip_serializing_if = "Option::is_none")]
    pub accept: Option<Vec<u16>>,
    /// Send the X-Source-System header (default: on for events only)
    #[serde(alias = "sourceSystemHeader", skip_serializing_if = "Option::is_none")]
    pub source_system_header: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<PayloadConfig>,
}

/// Target settings from the config file. Environment variables win.
#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
pub struct TargetFileConfig {
    #[serde(alias = "baseUrl", skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(alias = "tenantId", skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(alias = "sourceSystem", skip_serializing_if = "Option::is_none")]
    pub source_system: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
pub struct Config {
    /// Named scenarios, run concurrently
    #[serde(default)]
    pub scenarios: BTreeMap<String, ScenarioConfig>,
    /// Pass/fail criteria keyed by metric, e.g. `http_req_failed` or `http_req_failed{scenario:name}`
    #[serde(default, alias = "criteria")]
    pub thresholds: BTreeMap<String, Vec<ThresholdSpec>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetFileConfig>,
    /// How often abort_on_fail thresholds are checked during the run (default: "2s")
    #[serde(alias = "thresholdCheckInterval", skip_serializing_if = "Option::is_none")]
    pub threshold_check_interval: Option<String>,
}

/// Where requests go and who they claim to come from. Built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    pub base_url: String,
    pub tenant_id: String,
    pub token: String,
    pub source_system: String,
}

impl TargetConfig {
    /// Resolve from `lookup` (normally the process environment), then the
    /// file block, then the defaults. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F, file: Option<&TargetFileConfig>) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |var: &str, from_file: Option<&String>, default: &str| {
            lookup(var)
                .filter(|v| !v.is_empty())
                .or_else(|| from_file.filter(|v| !v.is_empty()).cloned())
                .unwrap_or_else(|| default.to_string())
        };
        let file = file.cloned().unwrap_or_default();

        let base_url = pick("BASE_URL", file.base_url.as_ref(), DEFAULT_BASE_URL);
        let base_url = base_url.trim_end_matches('/').to_string();
        let valid = base_url
            .parse::<http::Uri>()
            .ok()
            .filter(|uri| {
                matches!(uri.scheme_str(), Some("http" | "https")) && uri.authority().is_some()
            })
            .is_some();
        if !valid {
            return Err(ConfigError::InvalidBaseUrl(base_url));
        }

        let token = pick("JWT_TOKEN", file.token.as_ref(), "");
        if token.is_empty() {
            tracing::warn!("JWT_TOKEN is not set, requests carry an empty bearer token");
        }

        Ok(Self {
            base_url,
            tenant_id: pick("TENANT_ID", file.tenant_id.as_ref(), DEFAULT_TENANT_ID),
            token,
            source_system: pick(
                "SOURCE_SYSTEM",
                file.source_system.as_ref(),
                DEFAULT_SOURCE_SYSTEM,
            ),
        })
    }

    pub fn from_env(file: Option<&TargetFileConfig>) -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok(), file)
    }
}

fn optional_duration(
    scenario: &str,
    field: &str,
    value: Option<&String>,
) -> Result<Option<Duration>, ConfigError> {
    value
        .map(|v| parse_duration_field(&format!("{}.{}", scenario, field), v))
        .transpose()
}

impl PayloadConfig {
    fn apply(&self, scenario: &str, mut template: PayloadTemplate) -> Result<PayloadTemplate, ConfigError> {
        if let Some(prefix) = &self.key_prefix {
            template.key_prefix = prefix.clone();
        }
        if let Some(event_type) = &self.event_type {
            template.event_type = event_type.clone();
        }
        if let Some(date) = &self.posted_date {
            template.posted_date = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| {
                ConfigError::InvalidDate {
                    scenario: scenario.to_string(),
                    value: date.clone(),
                }
            })?;
        }
        if let Some(currency) = &self.currency {
            if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
                return Err(ConfigError::InvalidCurrency {
                    scenario: scenario.to_string(),
                    value: currency.clone(),
                });
            }
            template.currency = currency.clone();
        }
        if let Some(created_by) = &self.created_by {
            template.created_by = created_by.clone();
        }
        if self.description.is_some() {
            template.description = self.description.clone();
        }
        if self.reference_id.is_some() {
            template.reference_id = self.reference_id.clone();
        }
        if let Some(lines) = &self.lines {
            template.lines = lines
                .iter()
                .map(|l| JournalLine {
                    account_code: l.account_code.clone(),
                    amount_cents: l.amount_cents,
                    is_credit: l.is_credit,
                    dimensions: l.dimensions.clone(),
                })
                .collect();
        }
        Ok(template)
    }
}

impl ScenarioConfig {
    fn executor(&self, name: &str) -> Result<Executor, ConfigError> {
        let missing = |field: &'static str| ConfigError::MissingField {
            scenario: name.to_string(),
            field,
        };
        let executor = match &self.executor {
            Some(executor) => executor.clone(),
            None if self.rate.is_some() => "constant-arrival-rate".to_string(),
            None => "constant-vus".to_string(),
        };

        // Options that belong to the other executor are errors, not ignored.
        let reject_stray = |fields: &[(&'static str, bool)]| {
            match fields.iter().find(|(_, set)| *set) {
                Some(&(field, _)) => Err(ConfigError::NotApplicable {
                    scenario: name.to_string(),
                    field,
                    executor: executor.clone(),
                }),
                None => Ok(()),
            }
        };

        if Executor::ARRIVAL_RATE_NAMES.contains(&executor.as_str()) {
            reject_stray(&[
                ("vus", self.vus.is_some()),
                ("pacing", self.pacing.is_some()),
            ])?;
            let pre_allocated_vus = self
                .pre_allocated_vus
                .ok_or_else(|| missing("pre_allocated_vus"))?;
            Ok(Executor::ConstantArrivalRate {
                rate: self.rate.ok_or_else(|| missing("rate"))?,
                time_unit: optional_duration(name, "time_unit", self.time_unit.as_ref())?
                    .unwrap_or(Duration::from_secs(1)),
                pre_allocated_vus,
                max_vus: self.max_vus.unwrap_or(pre_allocated_vus),
            })
        } else if Executor::CLOSED_NAMES.contains(&executor.as_str()) {
            reject_stray(&[
                ("rate", self.rate.is_some()),
                ("time_unit", self.time_unit.is_some()),
                ("pre_allocated_vus", self.pre_allocated_vus.is_some()),
                ("max_vus", self.max_vus.is_some()),
            ])?;
            Ok(Executor::ClosedWorkload {
                vus: self.vus.unwrap_or(1),
                pacing: optional_duration(name, "pacing", self.pacing.as_ref())?
                    .unwrap_or(Duration::ZERO),
            })
        } else {
            Err(ConfigError::UnknownExecutor {
                scenario: name.to_string(),
                executor,
            })
        }
    }

    /// Validate into an immutable [`Scenario`].
    pub fn to_scenario(&self, name: &str, target: &TargetConfig) -> Result<Scenario, ConfigError> {
        let executor = self.executor(name)?;

        let endpoint_name = self.endpoint.as_deref().ok_or(ConfigError::MissingField {
            scenario: name.to_string(),
            field: "endpoint",
        })?;
        let endpoint = Endpoint::parse(endpoint_name).ok_or_else(|| ConfigError::UnknownEndpoint {
            scenario: name.to_string(),
            endpoint: endpoint_name.to_string(),
        })?;

        let acceptance = match &self.accept {
            Some(statuses) => AcceptanceRule::new(name, statuses.iter().copied())?,
            None => match endpoint {
                Endpoint::Events => AcceptanceRule::accepted_or_conflict(),
                Endpoint::JournalEntries => AcceptanceRule::created_or_conflict(),
            },
        };

        let defaults = PayloadTemplate::balanced_default(endpoint);
        let template = match &self.payload {
            Some(payload) => payload.apply(name, defaults)?,
            None => defaults,
        };
        let key_prefix = template.key_prefix.clone();
        let send_source_system = self
            .source_system_header
            .unwrap_or(endpoint == Endpoint::Events);
        let requests = RequestBuilder::new(endpoint, template, target, send_source_system)?;

        let scenario = Scenario {
            name: Arc::from(name),
            executor,
            stop: StopCondition {
                duration: optional_duration(name, "duration", self.duration.as_ref())?,
                iterations: self.iterations,
            },
            start_time: optional_duration(name, "start_time", self.start_time.as_ref())?
                .unwrap_or(Duration::ZERO),
            graceful_stop: optional_duration(name, "graceful_stop", self.graceful_stop.as_ref())?
                .unwrap_or(DEFAULT_GRACEFUL_STOP),
            request_timeout: optional_duration(
                name,
                "request_timeout",
                self.request_timeout.as_ref(),
            )?
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            acceptance,
            requests: Arc::new(requests),
            key_prefix,
        };
        scenario.validate()?;
        Ok(scenario)
    }
}

impl Config {
    /// Read a YAML file, or JSON when the extension is `.json`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let config = if is_json {
            serde_json::from_str(&content)
                .with_context(|| format!("failed to parse JSON config {}", path.display()))?
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("failed to parse YAML config {}", path.display()))?
        };
        Ok(config)
    }

    pub fn thresholds(&self) -> Result<Vec<Threshold>, ConfigError> {
        let mut thresholds = Vec::new();
        for (metric, specs) in &self.thresholds {
            for spec in specs {
                let threshold = match spec {
                    ThresholdSpec::Expression(expr) => Threshold::parse(metric, expr)?,
                    ThresholdSpec::Detailed {
                        threshold,
                        abort_on_fail,
                        delay_abort_eval,
                    } => {
                        let parsed = Threshold::parse(metric, threshold)?;
                        if *abort_on_fail {
                            let delay = delay_abort_eval
                                .as_deref()
                                .map(|d| parse_duration_field("delay_abort_eval", d))
                                .transpose()?
                                .unwrap_or(Duration::ZERO);
                            parsed.abort_on_fail(delay)
                        } else {
                            parsed
                        }
                    }
                };
                thresholds.push(threshold);
            }
        }
        Ok(thresholds)
    }

    /// Validate everything into a [`RunPlan`]. All-or-nothing: the first
    /// problem found is returned and no plan is produced.
    pub fn into_plan(self, target: TargetConfig) -> Result<RunPlan, ConfigError> {
        let scenarios = self
            .scenarios
            .iter()
            .map(|(name, scenario)| scenario.to_scenario(name, &target))
            .collect::<Result<Vec<_>, _>>()?;
        let thresholds = self.thresholds()?;
        let interval = self
            .threshold_check_interval
            .as_deref()
            .map(|v| parse_duration_field("threshold_check_interval", v))
            .transpose()?
            .unwrap_or(DEFAULT_THRESHOLD_CHECK_INTERVAL);
        RunPlan::new(scenarios, thresholds, target, interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::schema_for;
    use std::collections::HashMap;
    use std::io::Write;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn target() -> TargetConfig {
        TargetConfig::from_lookup(no_env, None).unwrap()
    }

    #[test]
    fn test_config_schema() {
        let schema = schema_for!(Config);
        let schema_json = serde_json::to_string(&schema).unwrap();
        assert!(schema_json.contains("scenarios"));
        assert!(schema_json.contains("pre_allocated_vus"));
        assert!(schema_json.contains("thresholds"));
        assert!(schema_json.contains("account_code"));
    }

    #[test]
    fn test_target_defaults() {
        let t = target();
        assert_eq!(t.base_url, "http://localhost:8080");
        assert_eq!(t.tenant_id, "00000000-0000-0000-0000-000000000001");
        assert_eq!(t.token, "");
        assert_eq!(t.source_system, "K6");
    }

    #[test]
    fn test_target_env_beats_file() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("BASE_URL", "https://ledger.example.com/"),
            ("JWT_TOKEN", "abc"),
            ("TENANT_ID", ""),
        ]);
        let file = TargetFileConfig {
            base_url: Some("http://ignored:1".to_string()),
            tenant_id: Some("file-tenant".to_string()),
            token: None,
            source_system: Some("BATCH".to_string()),
        };
        let t = TargetConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()), Some(&file))
            .unwrap();
        assert_eq!(t.base_url, "https://ledger.example.com");
        assert_eq!(t.token, "abc");
        assert_eq!(t.tenant_id, "file-tenant");
        assert_eq!(t.source_system, "BATCH");
    }

    #[test]
    fn test_target_rejects_bad_base_url() {
        let err = TargetConfig::from_lookup(
            |k| (k == "BASE_URL").then(|| "ftp://x".to_string()),
            None,
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::InvalidBaseUrl("ftp://x".to_string()));
    }

    #[test]
    fn test_config_deserialize_full() {
        let yaml = r#"
threshold_check_interval: 1s
scenarios:
  sustained:
    executor: constant-arrival-rate
    endpoint: events
    rate: 500
    timeUnit: 1s
    duration: 2m
    preAllocatedVUs: 50
    maxVUs: 200
  posting:
    executor: constant-vus
    endpoint: journal-entries
    vus: 20
    pacing: 10ms
    duration: 1m
    start_time: 30s
    payload:
      posted_date: "2026-03-01"
      currency: EUR
      description: soak
      lines:
        - { account_code: CASH, amount_cents: 250, is_credit: false }
        - { accountCode: REV, amountCents: 250, isCredit: true, dimensions: { region: eu } }
thresholds:
  http_req_failed:
    - rate<0.01
  "http_req_duration{scenario:posting}":
    - threshold: p(99)<200
      abort_on_fail: true
      delay_abort_eval: 10s
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.scenarios.len(), 2);
        let plan = config.into_plan(target()).unwrap();

        assert_eq!(plan.threshold_check_interval, Duration::from_secs(1));
        let posting = plan
            .scenarios
            .iter()
            .find(|s| &*s.name == "posting")
            .unwrap();
        assert_eq!(posting.start_time, Duration::from_secs(30));
        assert_eq!(
            posting.executor,
            Executor::ClosedWorkload {
                vus: 20,
                pacing: Duration::from_millis(10)
            }
        );
        assert_eq!(posting.key_prefix, "je");

        let sustained = plan
            .scenarios
            .iter()
            .find(|s| &*s.name == "sustained")
            .unwrap();
        assert_eq!(sustained.executor.max_vus(), 200);
        assert_eq!(sustained.graceful_stop, DEFAULT_GRACEFUL_STOP);
        assert_eq!(sustained.acceptance.statuses().collect::<Vec<_>>(), vec![202, 409]);

        let body: serde_json::Value =
            serde_json::from_str(&posting.requests.build(1, 0).body).unwrap();
        assert_eq!(body["transactionCurrency"], "EUR");
        assert_eq!(body["postedDate"], "2026-03-01");
        assert_eq!(body["lines"][1]["dimensions"]["region"], "eu");

        assert_eq!(plan.thresholds.len(), 2);
        let abort = plan.thresholds.iter().find(|t| t.abort_on_fail).unwrap();
        assert_eq!(abort.scenario.as_deref(), Some("posting"));
        assert_eq!(abort.delay_abort_eval, Duration::from_secs(10));
    }

    #[test]
    fn test_executor_inferred_from_rate() {
        let sc = ScenarioConfig {
            endpoint: Some("events".to_string()),
            rate: Some(10),
            pre_allocated_vus: Some(2),
            duration: Some("1s".to_string()),
            ..Default::default()
        };
        let s = sc.to_scenario("s", &target()).unwrap();
        assert!(matches!(
            s.executor,
            Executor::ConstantArrivalRate { max_vus: 2, .. }
        ));
    }

    #[test]
    fn test_validation_errors() {
        let base = ScenarioConfig {
            executor: Some("constant-arrival-rate".to_string()),
            endpoint: Some("events".to_string()),
            rate: Some(10),
            pre_allocated_vus: Some(20),
            max_vus: Some(10),
            duration: Some("1s".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            base.to_scenario("s", &target()),
            Err(ConfigError::PoolBounds { .. })
        ));

        let sc = ScenarioConfig {
            executor: Some("ramping-vus".to_string()),
            ..base.clone()
        };
        assert!(matches!(
            sc.to_scenario("s", &target()),
            Err(ConfigError::UnknownExecutor { .. })
        ));

        let sc = ScenarioConfig {
            endpoint: Some("accounts".to_string()),
            max_vus: None,
            ..base.clone()
        };
        assert!(matches!(
            sc.to_scenario("s", &target()),
            Err(ConfigError::UnknownEndpoint { .. })
        ));

        let sc = ScenarioConfig {
            duration: Some("soon".to_string()),
            max_vus: None,
            ..base.clone()
        };
        assert!(matches!(
            sc.to_scenario("s", &target()),
            Err(ConfigError::InvalidDuration { .. })
        ));

        let sc = ScenarioConfig {
            max_vus: None,
            payload: Some(PayloadConfig {
                posted_date: Some("25/02/2026".to_string()),
                ..Default::default()
            }),
            ..base.clone()
        };
        assert!(matches!(
            sc.to_scenario("s", &target()),
            Err(ConfigError::InvalidDate { .. })
        ));

        let sc = ScenarioConfig {
            max_vus: None,
            accept: Some(vec![]),
            ..base.clone()
        };
        assert!(matches!(
            sc.to_scenario("s", &target()),
            Err(ConfigError::EmptyAcceptance { .. })
        ));

        let sc = ScenarioConfig {
            rate: Some(0),
            max_vus: None,
            ..base
        };
        assert!(matches!(
            sc.to_scenario("s", &target()),
            Err(ConfigError::NotPositive { field: "rate", .. })
        ));
    }

    #[test]
    fn test_options_of_other_executor_rejected() {
        let rate = ScenarioConfig {
            endpoint: Some("events".to_string()),
            rate: Some(10),
            pre_allocated_vus: Some(2),
            pacing: Some("10ms".to_string()),
            duration: Some("1s".to_string()),
            ..Default::default()
        };
        assert_eq!(
            rate.to_scenario("ingest", &target()).unwrap_err(),
            ConfigError::NotApplicable {
                scenario: "ingest".to_string(),
                field: "pacing",
                executor: "constant-arrival-rate".to_string(),
            }
        );

        let closed = ScenarioConfig {
            executor: Some("constant-vus".to_string()),
            endpoint: Some("journal-entries".to_string()),
            vus: Some(5),
            max_vus: Some(10),
            duration: Some("1s".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            closed.to_scenario("posting", &target()),
            Err(ConfigError::NotApplicable {
                field: "max_vus",
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let mut config = Config::default();
        config.thresholds.insert(
            "http_req_failed".to_string(),
            vec![ThresholdSpec::Expression("rate<<0.01".to_string())],
        );
        assert!(matches!(
            config.thresholds(),
            Err(ConfigError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn test_empty_config_has_no_scenarios() {
        assert_eq!(
            Config::default().into_plan(target()).unwrap_err(),
            ConfigError::NoScenarios
        );
    }

    #[test]
    fn test_load_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"scenarios": {{"c": {{"endpoint": "journal-entries", "vus": 2, "iterations": 3}}}}}}"#
        )
        .unwrap();
        let config = Config::load(file.path()).unwrap();
        let plan = config.into_plan(target()).unwrap();
        assert_eq!(plan.scenarios[0].stop.iterations, Some(3));
        assert_eq!(plan.scenarios[0].stop.duration, None);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(Config::load(Path::new("/definitely/not/here.yaml")).is_err());
    }
}
