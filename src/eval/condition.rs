use std::collections::HashMap;

use regex::Regex;
use semver::Version;

use crate::{
    model::{Condition, ConditionType, Predicate, Segment},
    EvalError, FPUser,
};

impl Condition {
    /// Check whether the condition holds for `user`.
    ///
    /// Problems with user data (missing or unparsable attributes) are a non-match. Problems with
    /// server data that make the condition meaningless (unknown segment, malformed datetime
    /// literal) are returned as errors.
    pub fn matches(
        &self,
        user: &FPUser,
        segments: &HashMap<String, Segment>,
    ) -> Result<bool, EvalError> {
        match self.condition_type {
            ConditionType::String => Ok(self.match_string(user)),
            ConditionType::Segment => self.match_segment(user, segments),
            ConditionType::Datetime => self.match_datetime(user),
            ConditionType::Number => Ok(self.try_match_number(user).unwrap_or(false)),
            ConditionType::Semver => Ok(self.try_match_semver(user).unwrap_or(false)),
            ConditionType::Unknown => Ok(false),
        }
    }

    fn attribute<'a>(&self, user: &'a FPUser) -> Option<&'a str> {
        user.attr(&self.subject)
            .filter(|value| !value.trim().is_empty())
    }

    fn match_string(&self, user: &FPUser) -> bool {
        let Some(target) = self.attribute(user) else {
            return false;
        };
        let objects = self.objects.iter().map(String::as_str);

        match self.predicate {
            Predicate::IsOneOf => self.objects.iter().any(|o| o == target),
            Predicate::IsNotAnyOf => !self.objects.iter().any(|o| o == target),
            Predicate::StartsWith => objects.clone().any(|o| target.starts_with(o)),
            Predicate::DoesNotStartWith => !objects.clone().any(|o| target.starts_with(o)),
            Predicate::EndsWith => objects.clone().any(|o| target.ends_with(o)),
            Predicate::DoesNotEndWith => !objects.clone().any(|o| target.ends_with(o)),
            Predicate::Contains => objects.clone().any(|o| target.contains(o)),
            Predicate::DoesNotContain => !objects.clone().any(|o| target.contains(o)),
            Predicate::MatchesRegex => self.any_regex_matches(target),
            Predicate::DoesNotMatchRegex => !self.any_regex_matches(target),
            _ => false,
        }
    }

    fn any_regex_matches(&self, target: &str) -> bool {
        self.objects.iter().any(|pattern| match Regex::new(pattern) {
            Ok(regex) => regex.is_match(target),
            Err(err) => {
                log::warn!(target: "featureprobe", subject = self.subject.as_str(), pattern = pattern.as_str(); "invalid regex in condition: {err}");
                false
            }
        })
    }

    fn match_segment(
        &self,
        user: &FPUser,
        segments: &HashMap<String, Segment>,
    ) -> Result<bool, EvalError> {
        let negate = match self.predicate {
            Predicate::IsIn => false,
            Predicate::IsNotIn => true,
            _ => return Ok(false),
        };

        for unique_id in &self.objects {
            let segment = segments
                .get(unique_id)
                .ok_or_else(|| EvalError::SegmentNotFound(unique_id.clone()))?;
            if segment.contains(user, segments)? {
                return Ok(!negate);
            }
        }
        Ok(negate)
    }

    fn match_datetime(&self, user: &FPUser) -> Result<bool, EvalError> {
        let after = match self.predicate {
            Predicate::After => true,
            Predicate::Before => false,
            _ => return Ok(false),
        };

        let timestamp = match self.attribute(user) {
            None => chrono::Utc::now().timestamp(),
            Some(value) => match value.trim().parse::<i64>() {
                Ok(timestamp) => timestamp,
                Err(_) => {
                    log::debug!(target: "featureprobe", subject = self.subject.as_str(), value; "datetime attribute is not a timestamp");
                    return Ok(false);
                }
            },
        };

        let mut matched = false;
        for object in &self.objects {
            let target = object
                .trim()
                .parse::<i64>()
                .map_err(|_| EvalError::InvalidDatetime(object.clone()))?;
            matched |= if after {
                timestamp >= target
            } else {
                timestamp < target
            };
        }
        Ok(matched)
    }

    fn try_match_number(&self, user: &FPUser) -> Option<bool> {
        let value = self.attribute(user)?;
        let value = match value.trim().parse::<f64>() {
            Ok(value) => value,
            Err(_) => {
                log::debug!(target: "featureprobe", subject = self.subject.as_str(), value; "number attribute cannot be parsed");
                return None;
            }
        };

        let objects = match self
            .objects
            .iter()
            .map(|o| o.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(objects) => objects,
            Err(err) => {
                log::warn!(target: "featureprobe", subject = self.subject.as_str(); "number condition contains invalid literal: {err}");
                return None;
            }
        };

        compare(self.predicate, &value, &objects)
    }

    fn try_match_semver(&self, user: &FPUser) -> Option<bool> {
        let value = self.attribute(user)?;
        let value = match parse_version(value) {
            Ok(value) => value,
            Err(err) => {
                log::debug!(target: "featureprobe", subject = self.subject.as_str(), value; "semver attribute cannot be parsed: {err}");
                return None;
            }
        };

        let objects = match self
            .objects
            .iter()
            .map(|o| parse_version(o))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(objects) => objects,
            Err(err) => {
                log::warn!(target: "featureprobe", subject = self.subject.as_str(); "semver condition contains invalid literal: {err}");
                return None;
            }
        };

        compare(self.predicate, &value, &objects)
    }
}

/// Parse a version, accepting a leading `v` and a missing minor or patch component.
fn parse_version(text: &str) -> Result<Version, semver::Error> {
    let text = text.trim();
    let text = text
        .strip_prefix('v')
        .or_else(|| text.strip_prefix('V'))
        .unwrap_or(text);

    let core_end = text.find(['-', '+']).unwrap_or(text.len());
    let (core, suffix) = text.split_at(core_end);
    let padding = match core.split('.').count() {
        1 => ".0.0",
        2 => ".0",
        _ => "",
    };
    Version::parse(&format!("{core}{padding}{suffix}"))
}

/// Compare `value` against each of `objects`. Positive comparators match if any object satisfies
/// them, `!=` matches if no object is equal.
fn compare<T: PartialOrd>(predicate: Predicate, value: &T, objects: &[T]) -> Option<bool> {
    let result = match predicate {
        Predicate::EqualTo => objects.iter().any(|o| value == o),
        Predicate::NotEqualTo => !objects.iter().any(|o| value == o),
        Predicate::GreaterThan => objects.iter().any(|o| value > o),
        Predicate::GreaterOrEqual => objects.iter().any(|o| value >= o),
        Predicate::LessThan => objects.iter().any(|o| value < o),
        Predicate::LessOrEqual => objects.iter().any(|o| value <= o),
        _ => return None,
    };
    Some(result)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::{
        eval::test_support::{condition, segment, segments},
        model::{ConditionType, Predicate},
        EvalError, FPUser,
    };

    fn user() -> FPUser {
        FPUser::new()
            .stable_rollout("u1")
            .with("city", "Paris")
            .with("email", "alice@example.com")
            .with("age", "25")
            .with("version", "1.2.3")
            .with("signup", "1700000000")
    }

    fn matches(condition_type: ConditionType, subject: &str, predicate: Predicate, objects: &[&str]) -> bool {
        condition(condition_type, subject, predicate, objects)
            .matches(&user(), &HashMap::new())
            .unwrap()
    }

    #[test]
    fn string_predicates() {
        use Predicate::*;
        let s = ConditionType::String;

        assert!(matches(s, "city", IsOneOf, &["Berlin", "Paris"]));
        assert!(!matches(s, "city", IsOneOf, &["Berlin"]));
        assert!(matches(s, "city", IsNotAnyOf, &["Berlin"]));
        assert!(!matches(s, "city", IsNotAnyOf, &["Paris"]));
        assert!(matches(s, "email", EndsWith, &["@example.com"]));
        assert!(matches(s, "email", DoesNotEndWith, &["@example.org"]));
        assert!(matches(s, "email", StartsWith, &["bob", "alice"]));
        assert!(!matches(s, "email", DoesNotStartWith, &["alice"]));
        assert!(matches(s, "email", Contains, &["@"]));
        assert!(matches(s, "email", DoesNotContain, &["#"]));
        assert!(matches(s, "email", MatchesRegex, &["ali.e@"]));
        assert!(matches(s, "email", DoesNotMatchRegex, &["^bob"]));
    }

    #[test]
    fn string_blank_attribute_never_matches() {
        let user = FPUser::new().with("city", "  ");
        let c = condition(ConditionType::String, "city", Predicate::IsNotAnyOf, &["Paris"]);
        assert!(!c.matches(&user, &HashMap::new()).unwrap());

        let c = condition(ConditionType::String, "missing", Predicate::DoesNotContain, &["x"]);
        assert!(!c.matches(&user, &HashMap::new()).unwrap());
    }

    #[test]
    fn invalid_regex_does_not_match() {
        let _ = env_logger::builder().is_test(true).try_init();

        assert!(!matches(ConditionType::String, "email", Predicate::MatchesRegex, &["(unclosed"]));
    }

    #[test]
    fn number_predicates() {
        use Predicate::*;
        let n = ConditionType::Number;

        assert!(matches(n, "age", EqualTo, &["25"]));
        assert!(matches(n, "age", EqualTo, &["1", "25.0"]));
        assert!(matches(n, "age", NotEqualTo, &["1", "2"]));
        assert!(!matches(n, "age", NotEqualTo, &["1", "25"]));
        assert!(matches(n, "age", GreaterThan, &["24.5"]));
        assert!(matches(n, "age", GreaterOrEqual, &["25"]));
        assert!(matches(n, "age", LessThan, &["100", "1"]));
        assert!(!matches(n, "age", LessOrEqual, &["24"]));
    }

    #[test]
    fn number_parse_failures_do_not_match() {
        let _ = env_logger::builder().is_test(true).try_init();

        assert!(!matches(ConditionType::Number, "city", Predicate::NotEqualTo, &["1"]));
        assert!(!matches(ConditionType::Number, "age", Predicate::EqualTo, &["25", "abc"]));
        assert!(!matches(ConditionType::Number, "missing", Predicate::NotEqualTo, &["1"]));
    }

    #[test]
    fn semver_predicates() {
        use Predicate::*;
        let v = ConditionType::Semver;

        assert!(matches(v, "version", EqualTo, &["1.2.3"]));
        assert!(matches(v, "version", NotEqualTo, &["1.2.4"]));
        assert!(matches(v, "version", GreaterThan, &["1.2.0"]));
        assert!(matches(v, "version", GreaterOrEqual, &["1.2.3"]));
        assert!(matches(v, "version", LessThan, &["1.10.0"]));
        assert!(!matches(v, "version", LessOrEqual, &["1.0.0"]));
        // unparsable attribute
        assert!(!matches(v, "city", EqualTo, &["1.2.3"]));
    }

    #[test]
    fn semver_accepts_short_and_prefixed_versions() {
        use Predicate::*;
        let v = ConditionType::Semver;

        assert!(matches(v, "version", GreaterThan, &["1.2"]));
        assert!(!matches(v, "version", NotEqualTo, &["v1.2.3"]));
        assert!(matches(v, "version", LessThan, &["2"]));

        let user = FPUser::new().with("version", "1.2");
        let c = condition(v, "version", EqualTo, &["1.2.0"]);
        assert!(c.matches(&user, &HashMap::new()).unwrap());
        let c = condition(v, "version", NotEqualTo, &["1.2"]);
        assert!(!c.matches(&user, &HashMap::new()).unwrap());

        let user = FPUser::new().with("version", "v2.0-beta.1");
        let c = condition(v, "version", LessThan, &["2.0.0"]);
        assert!(c.matches(&user, &HashMap::new()).unwrap());
    }

    #[test]
    fn semver_invalid_literal_fails_condition() {
        let _ = env_logger::builder().is_test(true).try_init();
        use Predicate::*;
        let v = ConditionType::Semver;

        assert!(!matches(v, "version", NotEqualTo, &["not-a-version"]));
        assert!(!matches(v, "version", GreaterThan, &["not-a-version", "1.0.0"]));
    }

    #[test]
    fn datetime_predicates() {
        use Predicate::*;
        let d = ConditionType::Datetime;

        assert!(matches(d, "signup", After, &["1700000000"]));
        assert!(!matches(d, "signup", Before, &["1700000000"]));
        assert!(matches(d, "signup", Before, &["1600000000", "1800000000"]));
        // missing attribute defaults to now
        assert!(matches(d, "missing", After, &["1600000000"]));
        assert!(matches(d, "missing", Before, &["99999999999"]));
        // unparsable attribute
        assert!(!matches(d, "city", After, &["1"]));
    }

    #[test]
    fn datetime_malformed_literal_is_an_error() {
        let c = condition(ConditionType::Datetime, "signup", Predicate::After, &["yesterday"]);
        assert_eq!(
            c.matches(&user(), &HashMap::new()),
            Err(EvalError::InvalidDatetime("yesterday".to_owned()))
        );
    }

    #[test]
    fn segment_predicates() {
        let segments = segments(vec![
            segment(
                "parisians",
                vec![vec![condition(ConditionType::String, "city", Predicate::IsOneOf, &["Paris"])]],
            ),
            segment(
                "berliners",
                vec![vec![condition(ConditionType::String, "city", Predicate::IsOneOf, &["Berlin"])]],
            ),
        ]);
        let user = user();

        let is_in = |objects: &[&str]| {
            condition(ConditionType::Segment, "", Predicate::IsIn, objects)
                .matches(&user, &segments)
                .unwrap()
        };
        let is_not_in = |objects: &[&str]| {
            condition(ConditionType::Segment, "", Predicate::IsNotIn, objects)
                .matches(&user, &segments)
                .unwrap()
        };

        assert!(is_in(&["berliners", "parisians"]));
        assert!(!is_in(&["berliners"]));
        assert!(is_not_in(&["berliners"]));
        assert!(!is_not_in(&["berliners", "parisians"]));
    }

    #[test]
    fn missing_segment_is_an_error() {
        let c = condition(ConditionType::Segment, "", Predicate::IsIn, &["ghost"]);
        assert_eq!(
            c.matches(&user(), &HashMap::new()),
            Err(EvalError::SegmentNotFound("ghost".to_owned()))
        );
    }

    #[test]
    fn mismatched_predicate_never_matches() {
        assert!(!matches(ConditionType::String, "city", Predicate::GreaterThan, &["A"]));
        assert!(!matches(ConditionType::Number, "age", Predicate::Contains, &["2"]));
        assert!(!matches(ConditionType::Datetime, "signup", Predicate::EqualTo, &["1700000000"]));
        assert!(!matches(ConditionType::Unknown, "city", Predicate::IsOneOf, &["Paris"]));
    }
}
