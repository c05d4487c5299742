//! Usage events reported back to the FeatureProbe server.
use serde::Serialize;

use crate::{eval::EvaluationResult, FPUser};

mod dispatcher;
mod processor;
mod recorder;

pub use processor::{EventProcessor, EventProcessorConfig};
pub use recorder::{AccessCounter, AccessSummary, EventBatch};

/// Events produced by evaluations and `track` calls.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Event {
    /// Serialized with `"kind": "access"`.
    Access(AccessEvent),
    /// Serialized with `"kind": "custom"`.
    Custom(CustomEvent),
    /// Serialized with `"kind": "debug"`.
    Debug(DebugEvent),
}

/// A toggle evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessEvent {
    /// Epoch milliseconds.
    pub time: i64,
    /// User key.
    pub user: String,
    /// Toggle key.
    pub key: String,
    /// Served value; `None` when the caller's default was used.
    pub value: Option<serde_json::Value>,
    /// Toggle version.
    pub version: Option<i64>,
    /// Served variation index.
    pub variation_index: Option<usize>,
    /// Matched rule index.
    pub rule_index: Option<usize>,
    /// Whether the event itself should be reported, not only aggregated.
    #[serde(skip)]
    pub track_access_events: bool,
}

/// A custom metric reported with [`FeatureProbe::track`](crate::FeatureProbe::track).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomEvent {
    /// Epoch milliseconds.
    pub time: i64,
    /// User key.
    pub user: String,
    /// Event name.
    pub name: String,
    /// Optional metric value.
    pub value: Option<f64>,
}

/// A toggle evaluation recorded with full user details while the debug window is open.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugEvent {
    /// Epoch milliseconds.
    pub time: i64,
    /// User key.
    pub user: String,
    /// Toggle key.
    pub key: String,
    /// Served value.
    pub value: Option<serde_json::Value>,
    /// Toggle version.
    pub version: Option<i64>,
    /// Served variation index.
    pub variation_index: Option<usize>,
    /// Matched rule index.
    pub rule_index: Option<usize>,
    /// Evaluation reason.
    pub reason: String,
    /// The full user, attributes included.
    pub user_detail: FPUser,
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl Event {
    /// Record an evaluation of `toggle_key`. With `track_access_events` the event is reported
    /// individually in addition to being counted.
    pub fn access(
        user: &FPUser,
        toggle_key: &str,
        result: &EvaluationResult,
        track_access_events: bool,
    ) -> Event {
        Event::Access(AccessEvent {
            time: now_millis(),
            user: user.key().to_owned(),
            key: toggle_key.to_owned(),
            value: result.value.clone(),
            version: result.version,
            variation_index: result.variation_index,
            rule_index: result.rule_index,
            track_access_events,
        })
    }

    /// Record an evaluation together with the user's attributes.
    pub fn debug(user: &FPUser, toggle_key: &str, result: &EvaluationResult) -> Event {
        Event::Debug(DebugEvent {
            time: now_millis(),
            user: user.key().to_owned(),
            key: toggle_key.to_owned(),
            value: result.value.clone(),
            version: result.version,
            variation_index: result.variation_index,
            rule_index: result.rule_index,
            reason: result.reason.clone(),
            user_detail: user.clone(),
        })
    }

    /// A custom event, as sent by [`FeatureProbe::track`](crate::FeatureProbe::track).
    pub fn custom(user: &FPUser, name: &str, value: Option<f64>) -> Event {
        Event::Custom(CustomEvent {
            time: now_millis(),
            user: user.key().to_owned(),
            name: name.to_owned(),
            value,
        })
    }
}
