//! Toggle evaluation engine.
//!
//! Evaluation is a pure function of a toggle, a user and the toggle/segment maps of a single
//! repository snapshot. Nothing here performs I/O; failures caused by inconsistent server data are
//! returned as [`EvalError`](crate::EvalError).
mod condition;
mod segment;
mod serve;
mod toggle;

use serde::Serialize;

/// Outcome of evaluating a toggle for a user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    /// Served value, or the caller's default when no variation was selected.
    pub value: Option<serde_json::Value>,
    /// Index of the rule that matched.
    pub rule_index: Option<usize>,
    /// Index of the served variation.
    pub variation_index: Option<usize>,
    /// Version of the evaluated toggle.
    pub version: Option<i64>,
    /// Human-readable explanation of the outcome.
    pub reason: String,
}

/// Result of matching a rule or resolving a serve.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HitResult {
    /// Whether the rule matched and a variation was chosen.
    pub hit: bool,
    /// The chosen variation index.
    pub index: Option<usize>,
    /// Why the serve failed to produce a variation, when it did not.
    pub reason: Option<String>,
}

impl HitResult {
    pub(crate) fn hit(index: usize, reason: Option<String>) -> HitResult {
        HitResult {
            hit: true,
            index: Some(index),
            reason,
        }
    }

    pub(crate) fn miss() -> HitResult {
        HitResult::default()
    }

    pub(crate) fn miss_with_reason(reason: String) -> HitResult {
        HitResult {
            hit: false,
            index: None,
            reason: Some(reason),
        }
    }
}

/// Reason reported when a user lacks an attribute a rule or split depends on.
pub(crate) fn missing_attribute_warning(user_key: &str, attribute: &str) -> String {
    format!("Warning: User with key '{user_key}' does not have attribute name '{attribute}'")
}
