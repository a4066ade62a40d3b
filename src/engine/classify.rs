use crossbeam_channel::Sender;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::http_client::TransportResponse;
use crate::error::{ConfigError, TransportError};
use crate::stats::{Metric, RequestTimings};

/// Result of one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Status code in the scenario's acceptance set.
    Accepted,
    /// Status code outside the acceptance set.
    Rejected,
    /// No status code was obtained; carries the error tag.
    TransportError(&'static str),
}

/// Set of HTTP statuses a scenario treats as success.
///
/// A 409 in the set is deliberate: the service answers a replayed idempotency
/// key with a conflict, and that no-op counts as success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptanceRule {
    statuses: BTreeSet<u16>,
}

impl AcceptanceRule {
    pub fn new(scenario: &str, statuses: impl IntoIterator<Item = u16>) -> Result<Self, ConfigError> {
        let statuses: BTreeSet<u16> = statuses.into_iter().collect();
        if statuses.is_empty() {
            return Err(ConfigError::EmptyAcceptance {
                scenario: scenario.to_string(),
            });
        }
        if let Some(&status) = statuses.iter().find(|s| !(100..=599).contains(*s)) {
            return Err(ConfigError::InvalidStatus {
                scenario: scenario.to_string(),
                status,
            });
        }
        Ok(Self { statuses })
    }

    /// `202 Accepted` or `409 Conflict`.
    pub fn accepted_or_conflict() -> Self {
        Self {
            statuses: BTreeSet::from([202, 409]),
        }
    }

    /// `201 Created` or `409 Conflict`.
    pub fn created_or_conflict() -> Self {
        Self {
            statuses: BTreeSet::from([201, 409]),
        }
    }

    pub fn statuses(&self) -> impl Iterator<Item = u16> + '_ {
        self.statuses.iter().copied()
    }

    pub fn outcome_for(&self, status: u16) -> Outcome {
        if self.statuses.contains(&status) {
            Outcome::Accepted
        } else {
            Outcome::Rejected
        }
    }
}

/// Maps a finished exchange to an [`Outcome`] and emits exactly one sample for it.
pub struct ResponseClassifier {
    scenario: Arc<str>,
    rule: AcceptanceRule,
    metrics: Sender<Metric>,
}

impl ResponseClassifier {
    pub fn new(scenario: Arc<str>, rule: AcceptanceRule, metrics: Sender<Metric>) -> Self {
        Self {
            scenario,
            rule,
            metrics,
        }
    }

    /// Pure mapping from an exchange result to its outcome.
    pub fn outcome(&self, exchange: &Result<TransportResponse, TransportError>) -> Outcome {
        match exchange {
            Ok(response) => self.rule.outcome_for(response.status),
            Err(err) => Outcome::TransportError(err.tag()),
        }
    }

    pub fn classify(
        &self,
        exchange: Result<TransportResponse, TransportError>,
        latency: Duration,
    ) -> Outcome {
        let outcome = self.outcome(&exchange);
        let (status, timings) = match &exchange {
            Ok(response) => (
                Some(response.status),
                RequestTimings {
                    duration: latency,
                    request_size: response.request_size,
                    response_size: response.response_size,
                },
            ),
            Err(_) => (
                None,
                RequestTimings {
                    duration: latency,
                    ..Default::default()
                },
            ),
        };
        // The sink only disconnects once the run is over.
        let _ = self.metrics.send(Metric::Request {
            scenario: self.scenario.clone(),
            status,
            outcome,
            timings,
        });
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16) -> Result<TransportResponse, TransportError> {
        Ok(TransportResponse {
            status,
            request_size: 10,
            response_size: 20,
        })
    }

    #[test]
    fn test_conflict_counts_as_accepted() {
        let events = AcceptanceRule::accepted_or_conflict();
        assert_eq!(events.outcome_for(202), Outcome::Accepted);
        assert_eq!(events.outcome_for(409), Outcome::Accepted);
        assert_eq!(events.outcome_for(201), Outcome::Rejected);
        assert_eq!(events.outcome_for(500), Outcome::Rejected);

        let journal = AcceptanceRule::created_or_conflict();
        assert_eq!(journal.outcome_for(201), Outcome::Accepted);
        assert_eq!(journal.outcome_for(409), Outcome::Accepted);
        assert_eq!(journal.outcome_for(202), Outcome::Rejected);
    }

    #[test]
    fn test_rule_validation() {
        assert!(AcceptanceRule::new("s", Vec::<u16>::new()).is_err());
        assert!(AcceptanceRule::new("s", [200, 700]).is_err());
        let rule = AcceptanceRule::new("s", [409, 201, 409]).unwrap();
        assert_eq!(rule.statuses().collect::<Vec<_>>(), vec![201, 409]);
    }

    #[test]
    fn test_classification_is_pure() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let classifier =
            ResponseClassifier::new(Arc::from("s"), AcceptanceRule::created_or_conflict(), tx);
        for status in [200, 201, 404, 409, 429, 500] {
            let first = classifier.outcome(&response(status));
            for _ in 0..10 {
                assert_eq!(classifier.outcome(&response(status)), first);
            }
        }
    }

    #[test]
    fn test_classify_emits_one_sample() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let classifier =
            ResponseClassifier::new(Arc::from("s"), AcceptanceRule::accepted_or_conflict(), tx);

        let outcome = classifier.classify(response(202), Duration::from_millis(5));
        assert_eq!(outcome, Outcome::Accepted);
        let outcome = classifier.classify(Err(TransportError::Timeout), Duration::from_secs(1));
        assert_eq!(outcome, Outcome::TransportError("timeout"));

        let samples: Vec<Metric> = rx.try_iter().collect();
        assert_eq!(samples.len(), 2);
        match &samples[1] {
            Metric::Request {
                status,
                outcome,
                timings,
                ..
            } => {
                assert_eq!(*status, None);
                assert_eq!(*outcome, Outcome::TransportError("timeout"));
                assert_eq!(timings.duration, Duration::from_secs(1));
            }
            other => panic!("unexpected sample {:?}", other),
        }
    }
}
