//! Request construction for the two ledger endpoints.

use chrono::{NaiveDate, SecondsFormat, Utc};
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cli::config::TargetConfig;
use crate::error::ConfigError;

const TENANT_HEADER: HeaderName = HeaderName::from_static("x-tenant-id");
const SOURCE_SYSTEM_HEADER: HeaderName = HeaderName::from_static("x-source-system");

/// Service endpoint a scenario posts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// `POST /v1/events`, asynchronous ingestion.
    Events,
    /// `POST /v1/journal-entries`, synchronous posting.
    JournalEntries,
}

impl Endpoint {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "events" | "event-ingestion" | "/v1/events" => Some(Self::Events),
            "journal-entries" | "journal_entries" | "journal-posting" | "/v1/journal-entries" => {
                Some(Self::JournalEntries)
            }
            _ => None,
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            Self::Events => "/v1/events",
            Self::JournalEntries => "/v1/journal-entries",
        }
    }

    pub fn default_key_prefix(&self) -> &'static str {
        match self {
            Self::Events => "ing",
            Self::JournalEntries => "je",
        }
    }
}

/// One journal line. Amounts are integer minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalLine {
    pub account_code: String,
    pub amount_cents: i64,
    pub is_credit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<BTreeMap<String, String>>,
}

impl JournalLine {
    pub fn debit(account_code: &str, amount_cents: i64) -> Self {
        Self {
            account_code: account_code.to_string(),
            amount_cents,
            is_credit: false,
            dimensions: None,
        }
    }

    pub fn credit(account_code: &str, amount_cents: i64) -> Self {
        Self {
            is_credit: true,
            ..Self::debit(account_code, amount_cents)
        }
    }
}

/// Fixed body shape emitted on every iteration. The lines are sent as
/// configured; balancing them is the author's job.
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadTemplate {
    pub key_prefix: String,
    pub event_type: String,
    pub posted_date: NaiveDate,
    pub currency: String,
    pub created_by: String,
    pub description: Option<String>,
    pub reference_id: Option<String>,
    pub lines: Vec<JournalLine>,
}

impl PayloadTemplate {
    /// `CASH` debit 100 against `REV` credit 100 in USD.
    pub fn balanced_default(endpoint: Endpoint) -> Self {
        Self {
            key_prefix: endpoint.default_key_prefix().to_string(),
            event_type: "LOAD_EVENT".to_string(),
            posted_date: NaiveDate::from_ymd_opt(2026, 2, 25).unwrap_or_default(),
            currency: "USD".to_string(),
            created_by: "loadgen".to_string(),
            description: None,
            reference_id: None,
            lines: vec![JournalLine::debit("CASH", 100), JournalLine::credit("REV", 100)],
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventBody<'a> {
    event_id: &'a str,
    event_type: &'a str,
    occurred_at: String,
    posted_date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference_id: Option<&'a str>,
    transaction_currency: &'a str,
    created_by: &'a str,
    lines: &'a [JournalLine],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JournalEntryBody<'a> {
    event_id: &'a str,
    posted_date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference_id: Option<&'a str>,
    transaction_currency: &'a str,
    created_by: &'a str,
    lines: &'a [JournalLine],
}

/// A fully built request, ready for a [`Transport`](crate::engine::http_client::Transport).
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: String,
    pub idempotency_key: String,
}

/// Builds one request per iteration from a scenario's template.
///
/// Shared read-only by every virtual user of the scenario; URL and static
/// headers are computed once.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    endpoint: Endpoint,
    template: PayloadTemplate,
    url: String,
    headers: HeaderMap,
}

impl RequestBuilder {
    pub fn new(
        endpoint: Endpoint,
        template: PayloadTemplate,
        target: &TargetConfig,
        send_source_system: bool,
    ) -> Result<Self, ConfigError> {
        let header = |name: &'static str, value: &str| {
            HeaderValue::from_str(value).map_err(|_| ConfigError::InvalidHeader(name))
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(TENANT_HEADER, header("X-Tenant-Id", &target.tenant_id)?);
        headers.insert(
            AUTHORIZATION,
            header("Authorization", &format!("Bearer {}", target.token))?,
        );
        if send_source_system {
            headers.insert(
                SOURCE_SYSTEM_HEADER,
                header("X-Source-System", &target.source_system)?,
            );
        }

        Ok(Self {
            endpoint,
            url: format!("{}{}", target.base_url, endpoint.path()),
            template,
            headers,
        })
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// Idempotency key: `<prefix>-<vu>-<iteration>-<epoch millis>`.
    ///
    /// A virtual user index is never reused within a scenario and its
    /// iteration counter only grows, so keys cannot collide within a run.
    pub fn idempotency_key(&self, vu: usize, iteration: u64, epoch_millis: i64) -> String {
        format!(
            "{}-{}-{}-{}",
            self.template.key_prefix, vu, iteration, epoch_millis
        )
    }

    pub fn build(&self, vu: usize, iteration: u64) -> LoadRequest {
        let now = Utc::now();
        let key = self.idempotency_key(vu, iteration, now.timestamp_millis());
        let t = &self.template;

        let body = match self.endpoint {
            Endpoint::Events => serde_json::to_string(&EventBody {
                event_id: &key,
                event_type: &t.event_type,
                occurred_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
                posted_date: t.posted_date,
                description: t.description.as_deref(),
                reference_id: t.reference_id.as_deref(),
                transaction_currency: &t.currency,
                created_by: &t.created_by,
                lines: &t.lines,
            }),
            Endpoint::JournalEntries => serde_json::to_string(&JournalEntryBody {
                event_id: &key,
                posted_date: t.posted_date,
                description: t.description.as_deref(),
                reference_id: t.reference_id.as_deref(),
                transaction_currency: &t.currency,
                created_by: &t.created_by,
                lines: &t.lines,
            }),
        }
        .unwrap_or_default();

        LoadRequest {
            method: Method::POST,
            url: self.url.clone(),
            headers: self.headers.clone(),
            body,
            idempotency_key: key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn target() -> TargetConfig {
        TargetConfig {
            base_url: "http://ledger.test:8080".to_string(),
            tenant_id: "tenant-1".to_string(),
            token: "secret".to_string(),
            source_system: "K6".to_string(),
        }
    }

    fn builder(endpoint: Endpoint, source: bool) -> RequestBuilder {
        RequestBuilder::new(
            endpoint,
            PayloadTemplate::balanced_default(endpoint),
            &target(),
            source,
        )
        .unwrap()
    }

    #[test]
    fn test_event_request_shape() {
        let req = builder(Endpoint::Events, true).build(3, 7);
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.url, "http://ledger.test:8080/v1/events");
        assert_eq!(req.headers["x-tenant-id"], "tenant-1");
        assert_eq!(req.headers["authorization"], "Bearer secret");
        assert_eq!(req.headers["content-type"], "application/json");
        assert_eq!(req.headers["x-source-system"], "K6");

        let body: serde_json::Value = serde_json::from_str(&req.body).unwrap();
        assert_eq!(body["eventId"], req.idempotency_key.as_str());
        assert_eq!(body["eventType"], "LOAD_EVENT");
        assert_eq!(body["postedDate"], "2026-02-25");
        assert_eq!(body["transactionCurrency"], "USD");
        assert!(body["occurredAt"].as_str().unwrap().ends_with('Z'));
        assert_eq!(body["lines"][0]["accountCode"], "CASH");
        assert_eq!(body["lines"][0]["amountCents"], 100);
        assert_eq!(body["lines"][0]["isCredit"], false);
        assert_eq!(body["lines"][1]["isCredit"], true);
        assert!(body.get("description").is_none());
        assert!(body["lines"][0].get("dimensions").is_none());
    }

    #[test]
    fn test_journal_entry_request_shape() {
        let req = builder(Endpoint::JournalEntries, false).build(1, 0);
        assert_eq!(req.url, "http://ledger.test:8080/v1/journal-entries");
        assert!(req.headers.get("x-source-system").is_none());

        let body: serde_json::Value = serde_json::from_str(&req.body).unwrap();
        assert!(body.get("eventType").is_none());
        assert!(body.get("occurredAt").is_none());
        assert_eq!(body["createdBy"], "loadgen");
        assert_eq!(body["lines"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_idempotency_key_is_traceable() {
        let b = builder(Endpoint::Events, true);
        assert_eq!(b.idempotency_key(12, 345, 1_700_000_000_000), "ing-12-345-1700000000000");
        let req = b.build(4, 9);
        assert!(req.idempotency_key.starts_with("ing-4-9-"));
    }

    #[test]
    fn test_idempotency_keys_unique_across_vus_and_iterations() {
        let b = builder(Endpoint::JournalEntries, false);
        let mut keys = HashSet::new();
        for vu in 1..=20 {
            for iteration in 0..50 {
                assert!(keys.insert(b.build(vu, iteration).idempotency_key));
            }
        }
        assert_eq!(keys.len(), 1000);
    }

    #[test]
    fn test_optional_fields_are_emitted_when_set() {
        let mut template = PayloadTemplate::balanced_default(Endpoint::Events);
        template.description = Some("nightly soak".to_string());
        template.reference_id = Some("REF-1".to_string());
        template.lines[0].dimensions = Some(BTreeMap::from([(
            "costCenter".to_string(),
            "CC-9".to_string(),
        )]));
        let b = RequestBuilder::new(Endpoint::Events, template, &target(), true).unwrap();
        let body: serde_json::Value = serde_json::from_str(&b.build(1, 1).body).unwrap();
        assert_eq!(body["description"], "nightly soak");
        assert_eq!(body["referenceId"], "REF-1");
        assert_eq!(body["lines"][0]["dimensions"]["costCenter"], "CC-9");
    }

    #[test]
    fn test_invalid_token_rejected_at_construction() {
        let mut bad = target();
        bad.token = "line\nbreak".to_string();
        let err = RequestBuilder::new(
            Endpoint::Events,
            PayloadTemplate::balanced_default(Endpoint::Events),
            &bad,
            true,
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::InvalidHeader("Authorization"));
    }
}
