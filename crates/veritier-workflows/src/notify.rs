//! Drift notification sinks.

use async_trait::async_trait;
use tracing::warn;

use crate::retry::ActivityError;
use crate::schemas::RuleDriftResult;

/// Delivers drift alerts somewhere operators will see them. Returns the
/// number of notifications dispatched.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, drifted: &[RuleDriftResult]) -> Result<usize, ActivityError>;
}

/// Notifier that emits one structured warning per drifted rule.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, drifted: &[RuleDriftResult]) -> Result<usize, ActivityError> {
        for result in drifted {
            warn!(
                rule_id = %result.rule_id,
                severity = ?result.severity,
                drift_types = ?result.drift_types,
                "rule drift"
            );
        }
        Ok(drifted.len())
    }
}

/// Posts the drifted batch as JSON to a configured endpoint.
#[cfg(feature = "http")]
pub struct WebhookNotifier {
    client: reqwest::Client,
    endpoint: String,
}

#[cfg(feature = "http")]
impl WebhookNotifier {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, drifted: &[RuleDriftResult]) -> Result<usize, ActivityError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&drifted)
            .send()
            .await
            .map_err(|e| ActivityError::Transient(format!("webhook send failed: {e}")))?;
        response
            .error_for_status()
            .map_err(|e| ActivityError::Transient(format!("webhook rejected: {e}")))?;
        Ok(drifted.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::DriftSeverity;
    use chrono::Utc;

    #[tokio::test]
    async fn log_notifier_counts_every_entry() {
        let drifted = vec![
            RuleDriftResult {
                rule_id: "eu.mica.art36".into(),
                has_drift: true,
                drift_types: vec!["schema_drift".into()],
                details: vec!["schema check failed: missing decision_tree".into()],
                severity: DriftSeverity::High,
                last_verified: None,
                current_check: Utc::now(),
            },
            RuleDriftResult {
                rule_id: "uk.fsma.s21".into(),
                has_drift: true,
                drift_types: vec!["reference_drift".into()],
                details: vec![],
                severity: DriftSeverity::Medium,
                last_verified: None,
                current_check: Utc::now(),
            },
        ];
        assert_eq!(LogNotifier.notify(&drifted).await.unwrap(), 2);
        assert_eq!(LogNotifier.notify(&[]).await.unwrap(), 0);
    }
}
