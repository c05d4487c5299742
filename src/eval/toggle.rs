use std::collections::HashMap;

use serde_json::Value;

use crate::{
    eval::{EvaluationResult, HitResult},
    model::{Segment, Serve, Toggle},
    EvalError, FPUser,
};

impl Toggle {
    /// Evaluate the toggle for `user`.
    ///
    /// `toggles` and `segments` must come from the same repository snapshot as the toggle itself.
    /// `default_value` is returned when no variation gets selected. `max_depth` bounds the
    /// prerequisite chain; evaluating an enabled toggle at depth zero fails with
    /// [`EvalError::PrerequisiteDepthOverflow`], which also breaks prerequisite cycles.
    pub fn eval(
        &self,
        user: &FPUser,
        toggles: &HashMap<String, Toggle>,
        segments: &HashMap<String, Segment>,
        default_value: Option<&Value>,
        max_depth: u8,
    ) -> Result<EvaluationResult, EvalError> {
        if !self.enabled {
            let hit = self.serve_index(self.disabled_serve.as_ref(), user)?;
            let mut result = self.hit_value(hit, default_value, None)?;
            result.reason = "Toggle disabled".to_owned();
            return Ok(result);
        }

        if max_depth == 0 {
            return Err(EvalError::PrerequisiteDepthOverflow);
        }

        if !self.prerequisites_met(user, toggles, segments, max_depth)? {
            return self.default_result(user, default_value, "");
        }

        let mut warning = String::new();
        for (index, rule) in self.rules.iter().enumerate() {
            let hit = rule.hit(user, segments, &self.key)?;
            if hit.hit {
                return self.hit_value(hit, default_value, Some(index));
            }
            warning = hit.reason.unwrap_or_default();
        }

        self.default_result(user, default_value, &warning)
    }

    fn prerequisites_met(
        &self,
        user: &FPUser,
        toggles: &HashMap<String, Toggle>,
        segments: &HashMap<String, Segment>,
        max_depth: u8,
    ) -> Result<bool, EvalError> {
        for prerequisite in &self.prerequisites {
            let Some(toggle) = toggles.get(&prerequisite.key) else {
                log::debug!(target: "featureprobe", toggle = self.key.as_str(), prerequisite = prerequisite.key.as_str(); "prerequisite toggle not found");
                return Ok(false);
            };
            let result = toggle.eval(user, toggles, segments, None, max_depth - 1)?;
            if result.value.as_ref() != Some(&prerequisite.value) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn default_result(
        &self,
        user: &FPUser,
        default_value: Option<&Value>,
        warning: &str,
    ) -> Result<EvaluationResult, EvalError> {
        let hit = self.serve_index(self.default_serve.as_ref(), user)?;
        let mut result = self.hit_value(hit, default_value, None)?;
        result.reason = format!("Default rule hit. {warning}");
        Ok(result)
    }

    fn serve_index(&self, serve: Option<&Serve>, user: &FPUser) -> Result<HitResult, EvalError> {
        let serve = serve.ok_or_else(|| EvalError::MissingServe(self.key.clone()))?;
        Ok(serve.eval_index(user, &self.key))
    }

    fn hit_value(
        &self,
        hit: HitResult,
        default_value: Option<&Value>,
        rule_index: Option<usize>,
    ) -> Result<EvaluationResult, EvalError> {
        let mut result = EvaluationResult {
            value: default_value.cloned(),
            rule_index,
            variation_index: None,
            version: self.version,
            reason: hit.reason.unwrap_or_default(),
        };

        let Some(index) = hit.index.filter(|_| hit.hit) else {
            return Ok(result);
        };
        let variation = self
            .variations
            .get(index)
            .ok_or_else(|| EvalError::InvalidVariationIndex {
                toggle: self.key.clone(),
                index,
            })?;

        result.value = Some(widen(variation, default_value));
        result.variation_index = Some(index);
        if let Some(rule_index) = rule_index {
            result.reason = format!("Rule {rule_index} hit");
        }
        Ok(result)
    }
}

/// Widen an integer variation to a float when the caller expects a float.
fn widen(variation: &Value, default_value: Option<&Value>) -> Value {
    match (variation, default_value) {
        (Value::Number(n), Some(Value::Number(d))) if d.is_f64() && !n.is_f64() => n
            .as_f64()
            .map(Value::from)
            .unwrap_or_else(|| variation.clone()),
        _ => variation.clone(),
    }
}
