//! Ruleset data model as served by the FeatureProbe server.
//!
//! All types are immutable once deserialized. Unknown fields are ignored so that newer servers can
//! add fields without breaking older SDKs.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A versioned snapshot of all toggles and segments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    /// Toggles by key. `None` marks an ill-formed response.
    #[serde(default)]
    pub toggles: Option<HashMap<String, Toggle>>,
    /// Segments by unique id. `None` marks an ill-formed response.
    #[serde(default)]
    pub segments: Option<HashMap<String, Segment>>,
    /// Repository version. Snapshots are only replaced by higher versions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    /// Debug events are emitted while current time (in milliseconds) is before this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_until_time: Option<i64>,
}

impl Repository {
    /// Create a well-formed repository from toggle and segment maps.
    pub fn new(toggles: HashMap<String, Toggle>, segments: HashMap<String, Segment>) -> Repository {
        Repository {
            toggles: Some(toggles),
            segments: Some(segments),
            version: None,
            debug_until_time: None,
        }
    }

    /// Set [`Repository::version`].
    pub fn with_version(mut self, version: i64) -> Repository {
        self.version = Some(version);
        self
    }

    /// Set [`Repository::debug_until_time`].
    pub fn with_debug_until_time(mut self, debug_until_time: i64) -> Repository {
        self.debug_until_time = Some(debug_until_time);
        self
    }

    /// Whether both toggle and segment maps are present.
    pub fn is_well_formed(&self) -> bool {
        self.toggles.is_some() && self.segments.is_some()
    }

    /// Look up a toggle by key.
    pub fn toggle(&self, key: &str) -> Option<&Toggle> {
        self.toggles.as_ref()?.get(key)
    }

    /// Look up a segment by unique id.
    pub fn segment(&self, unique_id: &str) -> Option<&Segment> {
        self.segments.as_ref()?.get(unique_id)
    }
}

/// A feature toggle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Toggle {
    /// Toggle key.
    pub key: String,
    /// A disabled toggle always serves [`Toggle::disabled_serve`].
    #[serde(default)]
    pub enabled: bool,
    /// Whether individual access events should be reported in addition to aggregated counters.
    #[serde(default)]
    pub track_access_events: bool,
    /// Epoch milliseconds of the last change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<i64>,
    /// Toggle version, reported with evaluation results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    /// Served when the toggle is disabled or a prerequisite fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_serve: Option<Serve>,
    /// Served when no rule matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_serve: Option<Serve>,
    /// Rules in evaluation order.
    #[serde(default)]
    pub rules: Vec<Rule>,
    /// Variation values, addressed by index.
    #[serde(default)]
    pub variations: Vec<serde_json::Value>,
    /// Toggles that must evaluate to given values for this toggle to be considered enabled.
    #[serde(default)]
    pub prerequisites: Vec<Prerequisite>,
    /// Whether client-side SDKs may evaluate this toggle. Unused by this SDK.
    #[serde(default)]
    pub for_client: bool,
}

/// Requirement that another toggle evaluates to `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prerequisite {
    /// Key of the required toggle.
    pub key: String,
    /// Value the required toggle must evaluate to.
    pub value: serde_json::Value,
}

/// A toggle rule: all conditions must match for `serve` to apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Variation policy applied when the rule matches.
    pub serve: Serve,
    /// Conditions, all of which must hold.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// A reusable set of users, described by rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    /// Id referenced by segment conditions.
    pub unique_id: String,
    /// Segment version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    /// A user is a member if any rule matches.
    #[serde(default)]
    pub rules: Vec<SegmentRule>,
}

/// One segment rule: all conditions must hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRule {
    /// Conditions of the rule.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// A single predicate over a user attribute or segment membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// How the attribute and objects are interpreted.
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    /// Attribute name. Ignored for segment conditions.
    #[serde(default)]
    pub subject: String,
    /// Comparison applied to the attribute.
    pub predicate: Predicate,
    /// Literals compared against the attribute, or segment ids.
    #[serde(default)]
    pub objects: Vec<String>,
}

/// Type of a [`Condition`], selecting how attribute and objects are parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionType {
    /// Plain string comparison.
    String,
    /// Segment membership; the subject is ignored.
    Segment,
    /// Epoch seconds.
    Datetime,
    /// Floating point number.
    Number,
    /// Semantic version.
    Semver,
    /// A condition type this SDK version does not know about. Never matches.
    #[serde(other)]
    Unknown,
}

/// Comparison of a [`Condition`]. Which predicates apply depends on the [`ConditionType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Predicate {
    // string
    /// Attribute equals one of the objects.
    #[serde(rename = "is one of")]
    IsOneOf,
    /// Attribute ends with one of the objects.
    #[serde(rename = "ends with")]
    EndsWith,
    /// Attribute starts with one of the objects.
    #[serde(rename = "starts with")]
    StartsWith,
    /// Attribute contains one of the objects.
    #[serde(rename = "contains")]
    Contains,
    /// One of the object patterns finds a match in the attribute.
    #[serde(rename = "matches regex")]
    MatchesRegex,
    /// Negation of [`Predicate::IsOneOf`].
    #[serde(rename = "is not any of")]
    IsNotAnyOf,
    /// Negation of [`Predicate::EndsWith`].
    #[serde(rename = "does not end with")]
    DoesNotEndWith,
    /// Negation of [`Predicate::StartsWith`].
    #[serde(rename = "does not start with")]
    DoesNotStartWith,
    /// Negation of [`Predicate::Contains`].
    #[serde(rename = "does not contain")]
    DoesNotContain,
    /// Negation of [`Predicate::MatchesRegex`].
    #[serde(rename = "does not match regex")]
    DoesNotMatchRegex,

    // segment
    /// User belongs to one of the segments.
    #[serde(rename = "is in")]
    IsIn,
    /// User belongs to none of the segments.
    #[serde(rename = "is not in")]
    IsNotIn,

    // datetime
    /// Attribute time is at or after one of the objects.
    #[serde(rename = "after")]
    After,
    /// Attribute time is before one of the objects.
    #[serde(rename = "before")]
    Before,

    // number and semver
    /// Attribute equals one of the objects.
    #[serde(rename = "=")]
    EqualTo,
    /// Attribute equals none of the objects.
    #[serde(rename = "!=")]
    NotEqualTo,
    /// Attribute is greater than one of the objects.
    #[serde(rename = ">")]
    GreaterThan,
    /// Attribute is greater than or equal to one of the objects.
    #[serde(rename = ">=")]
    GreaterOrEqual,
    /// Attribute is less than one of the objects.
    #[serde(rename = "<")]
    LessThan,
    /// Attribute is less than or equal to one of the objects.
    #[serde(rename = "<=")]
    LessOrEqual,

    /// A predicate this SDK version does not know about. Never matches.
    #[serde(other)]
    Unknown,
}

/// Variation selection policy: a fixed index or a percentage split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ServeWire", into = "ServeWire")]
pub enum Serve {
    /// Always serve the variation at this index.
    Select(usize),
    /// Bucket the user into a variation.
    Split(Split),
}

/// Wire shape of [`Serve`]: exactly one of the fields is expected to be present.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServeWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    select: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    split: Option<Split>,
}

impl TryFrom<ServeWire> for Serve {
    type Error = &'static str;

    fn try_from(value: ServeWire) -> Result<Self, Self::Error> {
        match value {
            ServeWire {
                select: Some(index),
                ..
            } => Ok(Serve::Select(index)),
            ServeWire {
                split: Some(split), ..
            } => Ok(Serve::Split(split)),
            _ => Err("serve must contain either `select` or `split`"),
        }
    }
}

impl From<Serve> for ServeWire {
    fn from(value: Serve) -> Self {
        match value {
            Serve::Select(index) => ServeWire {
                select: Some(index),
                split: None,
            },
            Serve::Split(split) => ServeWire {
                select: None,
                split: Some(split),
            },
        }
    }
}

/// Percentage split over [`BUCKET_SIZE`](crate::BUCKET_SIZE) buckets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Split {
    /// `distribution[i]` lists the `[lo, hi)` bucket ranges served with variation `i`.
    pub distribution: Vec<Vec<[u32; 2]>>,
    /// Attribute hashed for bucketing. Defaults to the user key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_by: Option<String>,
    /// Hash salt. Defaults to the toggle key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
}
