use std::collections::HashMap;

use crate::{
    model::{ConditionType, Segment, SegmentRule},
    EvalError, FPUser,
};

impl Segment {
    /// Whether `user` belongs to the segment, i.e. any of its rules matches.
    pub fn contains(
        &self,
        user: &FPUser,
        segments: &HashMap<String, Segment>,
    ) -> Result<bool, EvalError> {
        for rule in &self.rules {
            if rule.hit(user, segments)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl SegmentRule {
    fn hit(&self, user: &FPUser, segments: &HashMap<String, Segment>) -> Result<bool, EvalError> {
        for condition in &self.conditions {
            if condition.condition_type != ConditionType::Segment
                && !user.contains_attr(&condition.subject)
            {
                return Ok(false);
            }
            if !condition.matches(user, segments)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
