//! # Prometheus Metrics
//!
//! Operational counters for the identity node, scraped at `/metrics`.
//!
//! All metrics live in a dedicated [`prometheus::Registry`] with the
//! `kairos` prefix so they do not collide with the default global registry.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use kairos_identity::account::AccountStatus;
use kairos_identity::auth::ChallengeVerdict;

/// Metric handles shared across request handlers.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Account derivations, labelled by outcome
    /// (`created`, `returning`, `key-mismatch`, `unconfirmed`).
    pub accounts_derived_total: IntCounterVec,
    /// Challenges handed out by this node.
    pub challenges_issued_total: IntCounter,
    /// Challenge verifications, labelled by verdict.
    pub verifications_total: IntCounterVec,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("kairos".into()), None)?;

        let accounts_derived_total = IntCounterVec::new(
            Opts::new(
                "accounts_derived_total",
                "Account derivations from chip taps, by outcome",
            ),
            &["status"],
        )?;
        registry.register(Box::new(accounts_derived_total.clone()))?;

        let challenges_issued_total = IntCounter::new(
            "challenges_issued_total",
            "Authentication challenges issued",
        )?;
        registry.register(Box::new(challenges_issued_total.clone()))?;

        let verifications_total = IntCounterVec::new(
            Opts::new("verifications_total", "Challenge verifications, by verdict"),
            &["verdict"],
        )?;
        registry.register(Box::new(verifications_total.clone()))?;

        Ok(Self {
            registry,
            accounts_derived_total,
            challenges_issued_total,
            verifications_total,
        })
    }

    pub fn record_derivation(&self, status: AccountStatus) {
        let label = match status {
            AccountStatus::Created => "created",
            AccountStatus::Returning => "returning",
            AccountStatus::KeyMismatch => "key-mismatch",
            AccountStatus::Unconfirmed => "unconfirmed",
        };
        self.accounts_derived_total.with_label_values(&[label]).inc();
    }

    pub fn record_verification(&self, verdict: ChallengeVerdict) {
        self.verifications_total
            .with_label_values(&[verdict.as_str()])
            .inc();
    }

    /// Encodes all registered metrics into the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub type SharedMetrics = Arc<NodeMetrics>;

/// `GET /metrics`. Returns 500 if encoding fails.
pub async fn metrics_handler(State(metrics): State<SharedMetrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_exposition() {
        let metrics = NodeMetrics::new().unwrap();
        metrics.record_derivation(AccountStatus::Created);
        metrics.record_derivation(AccountStatus::Returning);
        metrics.record_derivation(AccountStatus::Returning);
        metrics.challenges_issued_total.inc();
        metrics.record_verification(ChallengeVerdict::Expired);
        metrics.record_derivation(AccountStatus::Unconfirmed);

        let text = metrics.encode().unwrap();
        assert!(text.contains("kairos_accounts_derived_total{status=\"returning\"} 2"));
        assert!(text.contains("kairos_challenges_issued_total 1"));
        assert!(text.contains("kairos_accounts_derived_total{status=\"unconfirmed\"} 1"));
        assert!(text.contains("kairos_verifications_total{verdict=\"expired\"} 1"));
    }

    #[test]
    fn registries_are_independent() {
        let a = NodeMetrics::new().unwrap();
        let b = NodeMetrics::new().unwrap();
        a.challenges_issued_total.inc();
        assert_eq!(b.challenges_issued_total.get(), 0);
    }
}
