use std::collections::HashMap;

use crate::{
    bucketer::{Bucketer, Sha1Bucketer, BUCKET_SIZE},
    eval::{missing_attribute_warning, HitResult},
    model::{ConditionType, Rule, Segment, Serve, Split},
    EvalError, FPUser,
};

impl Rule {
    /// Match the rule against `user` and, if all conditions hold, resolve its serve.
    pub fn hit(
        &self,
        user: &FPUser,
        segments: &HashMap<String, Segment>,
        toggle_key: &str,
    ) -> Result<HitResult, EvalError> {
        for condition in &self.conditions {
            let needs_attribute = !matches!(
                condition.condition_type,
                ConditionType::Segment | ConditionType::Datetime
            );
            if needs_attribute && !user.contains_attr(&condition.subject) {
                return Ok(HitResult::miss_with_reason(missing_attribute_warning(
                    user.key(),
                    &condition.subject,
                )));
            }
            if !condition.matches(user, segments)? {
                return Ok(HitResult::miss());
            }
        }
        Ok(self.serve.eval_index(user, toggle_key))
    }
}

impl Serve {
    /// Resolve the variation index served to `user`.
    pub fn eval_index(&self, user: &FPUser, toggle_key: &str) -> HitResult {
        match self {
            Serve::Select(index) => HitResult::hit(*index, None),
            Serve::Split(split) => split.find_index(user, toggle_key),
        }
    }
}

impl Split {
    fn find_index(&self, user: &FPUser, toggle_key: &str) -> HitResult {
        let hash_key = match non_blank(self.bucket_by.as_deref()) {
            Some(bucket_by) => match user.attr(bucket_by) {
                Some(value) => value,
                None => {
                    return HitResult::miss_with_reason(missing_attribute_warning(
                        user.key(),
                        bucket_by,
                    ))
                }
            },
            None => user.key(),
        };
        let salt = non_blank(self.salt.as_deref()).unwrap_or(toggle_key);

        let bucket = Sha1Bucketer.bucket(hash_key, salt, BUCKET_SIZE);
        match self.group(bucket) {
            Some(index) => HitResult::hit(index, Some(format!("selected {index} percentage group"))),
            None => {
                log::warn!(target: "featureprobe", toggle_key, bucket; "bucket is not covered by split distribution");
                HitResult::miss()
            }
        }
    }

    fn group(&self, bucket: u32) -> Option<usize> {
        self.distribution.iter().position(|ranges| {
            ranges
                .iter()
                .any(|[lo, hi]| bucket >= *lo && bucket < *hi)
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::{
        bucketer::{Bucketer, Sha1Bucketer, BUCKET_SIZE},
        eval::{test_support::{condition, rule}, HitResult},
        model::{ConditionType, Predicate, Serve, Split},
        FPUser,
    };

    fn half_split() -> Split {
        Split {
            distribution: vec![vec![[0, 5000]], vec![[5000, 10000]]],
            bucket_by: None,
            salt: None,
        }
    }

    #[test]
    fn select_serve_hits_without_reason() {
        assert_eq!(
            Serve::Select(2).eval_index(&FPUser::new(), "toggle"),
            HitResult::hit(2, None)
        );
    }

    #[test]
    fn split_uses_rollout_key_and_toggle_key_as_salt() {
        // "u1" + "toggle" lands in bucket 230, "u2" + "toggle" in 1352
        let split = Serve::Split(Split {
            distribution: vec![vec![[0, 1000]], vec![[1000, 10000]]],
            bucket_by: None,
            salt: Some("  ".to_owned()),
        });

        let u1 = FPUser::new().stable_rollout("u1");
        let u2 = FPUser::new().stable_rollout("u2");

        assert_eq!(
            split.eval_index(&u1, "toggle"),
            HitResult::hit(0, Some("selected 0 percentage group".to_owned()))
        );
        assert_eq!(
            split.eval_index(&u2, "toggle"),
            HitResult::hit(1, Some("selected 1 percentage group".to_owned()))
        );
    }

    #[test]
    fn split_is_sticky() {
        let split = Serve::Split(half_split());
        for key in ["u1", "u2"] {
            let user = FPUser::new().stable_rollout(key);
            let first = split.eval_index(&user, "toggle");
            for _ in 0..10 {
                assert_eq!(split.eval_index(&user, "toggle"), first);
            }
        }
    }

    #[test]
    fn split_bucket_by_attribute() {
        let split = Serve::Split(Split {
            bucket_by: Some("company".to_owned()),
            salt: Some("salt".to_owned()),
            ..half_split()
        });

        // same company, different rollout keys: same group
        let a = FPUser::new().stable_rollout("a").with("company", "key");
        let b = FPUser::new().stable_rollout("b").with("company", "key");
        let expected = if Sha1Bucketer.bucket("key", "salt", BUCKET_SIZE) < 5000 { 0 } else { 1 };

        assert_eq!(split.eval_index(&a, "toggle").index, Some(expected));
        assert_eq!(split.eval_index(&b, "toggle").index, Some(expected));

        let missing = FPUser::new().stable_rollout("c");
        assert_eq!(
            split.eval_index(&missing, "toggle"),
            HitResult::miss_with_reason(
                "Warning: User with key 'c' does not have attribute name 'company'".to_owned()
            )
        );
    }

    #[test]
    fn split_covers_every_bucket_exactly_once() {
        let split = Split {
            distribution: vec![vec![[0, 3333], [6666, 10000]], vec![[3333, 6666]]],
            bucket_by: None,
            salt: None,
        };
        for bucket in 0..BUCKET_SIZE {
            let index = split.group(bucket).unwrap();
            let covering = split
                .distribution
                .iter()
                .filter(|ranges| ranges.iter().any(|[lo, hi]| bucket >= *lo && bucket < *hi))
                .count();
            assert_eq!(covering, 1);
            assert!(index < 2);
        }
    }

    #[test]
    fn split_gap_is_a_miss() {
        let _ = env_logger::builder().is_test(true).try_init();

        let split = Serve::Split(Split {
            distribution: vec![vec![[0, 100]]],
            bucket_by: None,
            salt: None,
        });
        // "u1" + "toggle" lands in bucket 230
        let result = split.eval_index(&FPUser::new().stable_rollout("u1"), "toggle");
        assert!(!result.hit);
        assert_eq!(result.index, None);
    }

    #[test]
    fn rule_hits_when_all_conditions_match() {
        let rule = rule(
            Serve::Select(1),
            vec![
                condition(ConditionType::String, "city", Predicate::IsOneOf, &["Paris"]),
                condition(ConditionType::Number, "age", Predicate::GreaterOrEqual, &["18"]),
            ],
        );
        let user = FPUser::new().with("city", "Paris").with("age", "18");

        assert_eq!(
            rule.hit(&user, &HashMap::new(), "toggle").unwrap(),
            HitResult::hit(1, None)
        );

        let minor = FPUser::new().with("city", "Paris").with("age", "17");
        assert_eq!(
            rule.hit(&minor, &HashMap::new(), "toggle").unwrap(),
            HitResult::miss()
        );
    }

    #[test]
    fn rule_reports_missing_attribute() {
        let rule = rule(
            Serve::Select(1),
            vec![condition(ConditionType::String, "plan", Predicate::IsOneOf, &["gold"])],
        );
        let user = FPUser::new().stable_rollout("some-user");

        assert_eq!(
            rule.hit(&user, &HashMap::new(), "toggle").unwrap(),
            HitResult::miss_with_reason(
                "Warning: User with key 'some-user' does not have attribute name 'plan'".to_owned()
            )
        );
    }

    #[test]
    fn rule_does_not_require_datetime_attribute() {
        let rule = rule(
            Serve::Select(0),
            vec![condition(ConditionType::Datetime, "ts", Predicate::After, &["0"])],
        );
        assert!(rule.hit(&FPUser::new(), &HashMap::new(), "toggle").unwrap().hit);
    }
}
