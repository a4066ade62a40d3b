use thiserror::Error;

/// Invalid run configuration. Always fatal, raised before any traffic is sent.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// The run plan contains no scenarios.
    #[error("no scenarios configured")]
    NoScenarios,

    /// Unknown executor name.
    #[error("scenario `{scenario}`: unknown executor `{executor}`")]
    UnknownExecutor { scenario: String, executor: String },

    /// Unknown target endpoint name.
    #[error("scenario `{scenario}`: unknown endpoint `{endpoint}`")]
    UnknownEndpoint { scenario: String, endpoint: String },

    /// A required field is absent.
    #[error("scenario `{scenario}`: `{field}` is required")]
    MissingField { scenario: String, field: &'static str },

    /// A numeric field must be strictly positive.
    #[error("scenario `{scenario}`: `{field}` must be positive")]
    NotPositive { scenario: String, field: &'static str },

    /// Pre-allocated pool exceeds its ceiling.
    #[error("scenario `{scenario}`: pre_allocated_vus ({pre_allocated}) exceeds max_vus ({max})")]
    PoolBounds {
        scenario: String,
        pre_allocated: usize,
        max: usize,
    },

    /// A duration string could not be parsed.
    #[error("invalid duration for `{field}`: `{value}`")]
    InvalidDuration { field: String, value: String },

    /// The acceptance set is empty, so every response would be rejected.
    #[error("scenario `{scenario}`: acceptance status set is empty")]
    EmptyAcceptance { scenario: String },

    /// A status code outside 100..=599.
    #[error("scenario `{scenario}`: invalid HTTP status {status} in acceptance set")]
    InvalidStatus { scenario: String, status: u16 },

    /// A threshold expression could not be parsed.
    #[error("invalid threshold `{expression}` for metric `{metric}`: {reason}")]
    InvalidThreshold {
        metric: String,
        expression: String,
        reason: String,
    },

    /// The base URL is not an absolute http(s) URL.
    #[error("invalid base URL `{0}`")]
    InvalidBaseUrl(String),

    /// A value that must travel in an HTTP header contains illegal characters.
    #[error("value for header `{0}` is not a valid header value")]
    InvalidHeader(&'static str),

    /// Posted date is not an ISO `YYYY-MM-DD` date.
    #[error("scenario `{scenario}`: invalid posted_date `{value}`")]
    InvalidDate { scenario: String, value: String },

    /// Currency is not a three-letter uppercase code.
    #[error("scenario `{scenario}`: invalid currency `{value}`")]
    InvalidCurrency { scenario: String, value: String },

    /// An option that the scenario's executor does not use.
    #[error("scenario `{scenario}`: `{field}` does not apply to executor `{executor}`")]
    NotApplicable {
        scenario: String,
        field: &'static str,
        executor: String,
    },

    /// The same threshold is configured twice and would share one report entry.
    #[error("threshold `{0}` is configured more than once")]
    DuplicateThreshold(String),

    /// Two scenarios would generate idempotency keys from the same prefix.
    #[error("scenarios `{first}` and `{second}` share idempotency key prefix `{prefix}`")]
    DuplicateKeyPrefix {
        prefix: String,
        first: String,
        second: String,
    },
}

/// Failure to obtain a status code from the system under test.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The per-request deadline expired.
    #[error("request timed out")]
    Timeout,

    /// Connection refused, DNS failure, TLS failure.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The request could not be built or the exchange broke mid-flight.
    #[error("request failed: {0}")]
    Other(String),
}

impl TransportError {
    /// Stable tag recorded on the sample so errored outcomes can be told apart.
    pub fn tag(&self) -> &'static str {
        match self {
            TransportError::Timeout => "timeout",
            TransportError::Connect(_) => "connect",
            TransportError::Other(_) => "request",
        }
    }
}

/// Harness fault during a run. Distinct from a failed verdict.
#[derive(Debug, Error)]
pub enum RunError {
    /// The metrics consumers could not be joined.
    #[error("metrics aggregation failed: {0}")]
    Aggregation(String),

    /// Virtual users of a scenario panicked. Their iterations were never
    /// classified, so the collected metrics cannot be trusted.
    #[error("scenario `{scenario}`: {panicked} virtual user(s) panicked")]
    Worker { scenario: String, panicked: u64 },

    /// A scenario's scheduler task failed.
    #[error("scenario task failed: {0}")]
    ScenarioTask(String),
}
