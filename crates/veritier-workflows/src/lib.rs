//! Long-running orchestration for compliance checks, rule verification,
//! counterfactual analysis, and drift detection.
//!
//! Each workflow is an async state machine spawned onto the runtime. The
//! caller keeps a handle: progress snapshots over a watch channel,
//! cooperative cancellation, and hard termination. Every external call goes
//! through the `Activities` trait with uniform timeout and retry policy.

pub mod activities;
pub mod compliance;
pub mod counterfactual;
pub mod drift;
pub mod handle;
pub mod notify;
pub mod retry;
pub mod schemas;
pub mod verification;

#[cfg(test)]
mod testing;

pub use activities::{Activities, CoreActivities, JurisdictionOracle, ScenarioEvaluator};
pub use compliance::start_compliance_check;
pub use counterfactual::start_counterfactual_analysis;
pub use drift::start_drift_detection;
pub use handle::{RunError, RunHandle, VerificationHandle};
pub use notify::{LogNotifier, Notifier};
pub use retry::{call_with_retry, ActivityError, RetryPolicy, TimeoutClass};
pub use schemas::{
    ComplianceCheckInput, ComplianceCheckOutput, ComplianceCheckProgress, CounterfactualInput,
    CounterfactualOutput, CounterfactualProgress, DriftDetectionInput, DriftDetectionOutput,
    DriftDetectionProgress, DriftSeverity, JurisdictionStatus, RuleVerificationInput,
    RuleVerificationOutput, RuleVerificationProgress, TierResult, WorkflowStatus,
};
pub use verification::start_rule_verification;

#[cfg(feature = "http")]
pub use notify::WebhookNotifier;
