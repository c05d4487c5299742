//! User representation that toggles are evaluated against.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A user that toggles are evaluated for.
///
/// A user has a key used for percentage rollouts and a set of string attributes referenced by
/// toggle conditions.
///
/// # Examples
/// ```
/// # use featureprobe::FPUser;
/// let user = FPUser::new()
///     .stable_rollout("user-123")
///     .with("city", "Paris")
///     .with("plan", "premium");
/// assert_eq!(user.key(), "user-123");
/// assert_eq!(user.attr("city"), Some("Paris"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FPUser {
    key: String,
    attrs: HashMap<String, String>,
}

impl FPUser {
    /// Create a user with a generated key.
    ///
    /// The generated key is unique per process but not stable across calls, so percentage rollouts
    /// are random for such users. Use [`FPUser::stable_rollout`] to get sticky assignments.
    pub fn new() -> FPUser {
        let now = chrono::Utc::now();
        let key = now
            .timestamp_nanos_opt()
            .unwrap_or_else(|| now.timestamp_micros())
            .to_string();
        FPUser {
            key,
            attrs: HashMap::new(),
        }
    }

    /// Set the key used for percentage rollouts.
    pub fn stable_rollout(mut self, key: impl Into<String>) -> FPUser {
        self.key = key.into();
        self
    }

    /// Add an attribute, replacing the previous value with the same name.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> FPUser {
        self.attrs.insert(name.into(), value.into());
        self
    }

    /// Add several attributes at once.
    pub fn with_attrs(
        mut self,
        attrs: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> FPUser {
        self.attrs
            .extend(attrs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// The key used for bucketing and reported with events.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Value of the attribute `name`.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// Whether the attribute `name` is set.
    pub fn contains_attr(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    /// All attributes.
    pub fn attrs(&self) -> &HashMap<String, String> {
        &self.attrs
    }
}

impl Default for FPUser {
    fn default() -> FPUser {
        FPUser::new()
    }
}
