//! Condition targets as offered to an editor, and condition lint.
//!
//! A [`ConditionTarget`] describes a question that conditions may read: its
//! answer type decides which comparison operators make sense.
//! [`validate_condition`] checks a condition tree against the targets
//! currently available.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use delib_types::{raise_on_errors, Diagnostic, Result, Severity};

use crate::condition::{
    condition_target_key, AggregationOperator, ComparisonOperator, Condition, ConditionOperator,
    ConditionTargetReference, ConditionValue,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionTargetType {
    Text,
    Number,
    Boolean,
    Choice,
}

const EQUALITY: &[ComparisonOperator] =
    &[ComparisonOperator::Equals, ComparisonOperator::NotEquals];

const NUMERIC: &[ComparisonOperator] = &[
    ComparisonOperator::Equals,
    ComparisonOperator::NotEquals,
    ComparisonOperator::GreaterThan,
    ComparisonOperator::GreaterThanOrEqual,
    ComparisonOperator::LessThan,
    ComparisonOperator::LessThanOrEqual,
];

const TEXTUAL: &[ComparisonOperator] = &[
    ComparisonOperator::Equals,
    ComparisonOperator::NotEquals,
    ComparisonOperator::Contains,
    ComparisonOperator::NotContains,
];

impl ConditionTargetType {
    pub fn allowed_operators(&self) -> &'static [ComparisonOperator] {
        match self {
            ConditionTargetType::Number => NUMERIC,
            ConditionTargetType::Text => TEXTUAL,
            ConditionTargetType::Boolean | ConditionTargetType::Choice => EQUALITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionTarget {
    #[serde(rename = "ref")]
    pub reference: ConditionTargetReference,
    pub label: String,
    #[serde(rename = "type")]
    pub target_type: ConditionTargetType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<ChoiceOption>,
}

impl ConditionTarget {
    pub fn new(
        reference: ConditionTargetReference,
        label: impl Into<String>,
        target_type: ConditionTargetType,
    ) -> Self {
        Self {
            reference,
            label: label.into(),
            target_type,
            choices: Vec::new(),
        }
    }

    pub fn with_choice(mut self, id: impl Into<String>, label: impl Into<String>) -> Self {
        self.choices.push(ChoiceOption {
            id: id.into(),
            label: label.into(),
        });
        self
    }
}

/// Operators an aggregate value (a count, sum or average) may be compared with.
pub fn aggregate_operators() -> &'static [ComparisonOperator] {
    NUMERIC
}

// ---------------------------------------------------------------------------
// Lint
// ---------------------------------------------------------------------------

/// Check a condition tree against the targets it may read.
///
/// Reports unknown targets and operators illegal for the target type as
/// errors; choice values that name no option and empty groups as warnings.
pub fn validate_condition(condition: &Condition, targets: &[ConditionTarget]) -> Vec<Diagnostic> {
    let by_key: HashMap<String, &ConditionTarget> = targets
        .iter()
        .map(|t| (condition_target_key(&t.reference), t))
        .collect();
    let mut diagnostics = Vec::new();
    lint(condition, &by_key, &mut diagnostics);
    diagnostics
}

pub fn validate_condition_or_raise(
    condition: &Condition,
    targets: &[ConditionTarget],
) -> Result<Vec<Diagnostic>> {
    raise_on_errors(validate_condition(condition, targets))
}

fn lint(
    condition: &Condition,
    targets: &HashMap<String, &ConditionTarget>,
    out: &mut Vec<Diagnostic>,
) {
    match condition {
        Condition::Group(group) => {
            if group.conditions.is_empty() {
                let outcome = match group.operator {
                    ConditionOperator::And => "always passes",
                    ConditionOperator::Or => "never passes",
                };
                out.push(diagnostic(
                    "empty_group",
                    Severity::Warning,
                    &group.id,
                    format!("Empty {} group {outcome}", group.operator),
                ));
            }
            for c in &group.conditions {
                lint(c, targets, out);
            }
        }
        Condition::Comparison(c) => {
            let Some(target) = resolve_target(&c.id, &c.target, targets, out) else {
                return;
            };
            check_operator(&c.id, target, c.operator, target.target_type.allowed_operators(), out);
            check_choice(&c.id, target, &c.value, out);
        }
        Condition::Aggregation(a) => {
            let Some(target) = resolve_target(&a.id, &a.target, targets, out) else {
                return;
            };
            let per_value = target.target_type.allowed_operators();
            match a.aggregator {
                AggregationOperator::Any | AggregationOperator::All | AggregationOperator::None => {
                    check_operator(&a.id, target, a.operator, per_value, out);
                    check_choice(&a.id, target, &a.value, out);
                }
                AggregationOperator::Count
                | AggregationOperator::Sum
                | AggregationOperator::Average => {
                    check_operator(&a.id, target, a.operator, aggregate_operators(), out);
                    if a.value.as_number().is_none() {
                        out.push(diagnostic(
                            "aggregate_value",
                            Severity::Error,
                            &a.id,
                            format!(
                                "{} must be compared with a number, got {}",
                                a.aggregator, a.value
                            ),
                        ));
                    }
                }
            }
            if let Some(filter) = &a.filter_comparison {
                check_operator(&a.id, target, filter.operator, per_value, out);
                check_choice(&a.id, target, &filter.value, out);
            }
        }
    }
}

fn resolve_target<'a>(
    condition_id: &str,
    reference: &ConditionTargetReference,
    targets: &HashMap<String, &'a ConditionTarget>,
    out: &mut Vec<Diagnostic>,
) -> Option<&'a ConditionTarget> {
    let key = condition_target_key(reference);
    let found = targets.get(&key).copied();
    if found.is_none() {
        out.push(diagnostic(
            "unknown_target",
            Severity::Error,
            condition_id,
            format!("Condition reads '{key}', which is not an available target"),
        ));
    }
    found
}

fn check_operator(
    condition_id: &str,
    target: &ConditionTarget,
    operator: ComparisonOperator,
    allowed: &[ComparisonOperator],
    out: &mut Vec<Diagnostic>,
) {
    if !allowed.contains(&operator) {
        let mut d = diagnostic(
            "operator_not_allowed",
            Severity::Error,
            condition_id,
            format!(
                "'{operator}' cannot be used with {:?} target '{}'",
                target.target_type, target.label
            ),
        );
        d.fix = Some(format!(
            "Use one of: {}",
            allowed.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
        ));
        out.push(d);
    }
}

fn check_choice(
    condition_id: &str,
    target: &ConditionTarget,
    value: &ConditionValue,
    out: &mut Vec<Diagnostic>,
) {
    if target.target_type != ConditionTargetType::Choice {
        return;
    }
    let known = matches!(
        value,
        ConditionValue::Text(id) if target.choices.iter().any(|c| &c.id == id)
    );
    if !known {
        out.push(diagnostic(
            "choice_value",
            Severity::Warning,
            condition_id,
            format!("{value} is not an option of '{}'", target.label),
        ));
    }
}

fn diagnostic(rule: &str, severity: Severity, condition_id: &str, message: String) -> Diagnostic {
    Diagnostic {
        rule: rule.into(),
        severity,
        message,
        subject: Some(condition_id.to_string()),
        fix: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{AggregationCondition, ComparisonCondition, ConditionGroup};

    fn reference(q: &str) -> ConditionTargetReference {
        ConditionTargetReference::new("survey", q)
    }

    fn targets() -> Vec<ConditionTarget> {
        vec![
            ConditionTarget::new(reference("age"), "Age", ConditionTargetType::Number),
            ConditionTarget::new(reference("bio"), "Bio", ConditionTargetType::Text),
            ConditionTarget::new(reference("agree"), "Agree?", ConditionTargetType::Boolean),
            ConditionTarget::new(reference("color"), "Color", ConditionTargetType::Choice)
                .with_choice("red", "Red")
                .with_choice("blue", "Blue"),
        ]
    }

    fn cmp(q: &str, op: ComparisonOperator, value: impl Into<ConditionValue>) -> Condition {
        ComparisonCondition::new(reference(q), op, value).into()
    }

    fn rules(diagnostics: &[Diagnostic]) -> Vec<&str> {
        diagnostics.iter().map(|d| d.rule.as_str()).collect()
    }

    #[test]
    fn operator_tables() {
        use ComparisonOperator::*;
        assert!(ConditionTargetType::Number.allowed_operators().contains(&LessThan));
        assert!(!ConditionTargetType::Number.allowed_operators().contains(&Contains));
        assert!(ConditionTargetType::Text.allowed_operators().contains(&NotContains));
        assert!(!ConditionTargetType::Text.allowed_operators().contains(&GreaterThan));
        assert_eq!(ConditionTargetType::Choice.allowed_operators(), &[Equals, NotEquals]);
        assert_eq!(ConditionTargetType::Boolean.allowed_operators(), &[Equals, NotEquals]);
    }

    #[test]
    fn valid_condition_is_clean() {
        use ComparisonOperator::*;
        let cond: Condition = ConditionGroup::and(vec![
            cmp("age", GreaterThanOrEqual, 18),
            cmp("bio", Contains, "nurse"),
            cmp("agree", Equals, true),
            cmp("color", NotEquals, "red"),
        ])
        .into();
        assert!(validate_condition(&cond, &targets()).is_empty());
    }

    #[test]
    fn reports_unknown_target() {
        let cond = cmp("gone", ComparisonOperator::Equals, "x");
        let diags = validate_condition(&cond, &targets());
        assert_eq!(rules(&diags), vec!["unknown_target"]);
        assert!(diags[0].message.contains("survey::gone"));
        assert!(validate_condition_or_raise(&cond, &targets()).is_err());
    }

    #[test]
    fn reports_illegal_operator_with_fix() {
        let cond = cmp("agree", ComparisonOperator::GreaterThan, 1);
        let diags = validate_condition(&cond, &targets());
        assert_eq!(rules(&diags), vec!["operator_not_allowed"]);
        assert_eq!(diags[0].fix.as_deref(), Some("Use one of: equals, not equals"));
    }

    #[test]
    fn reports_unknown_choice() {
        let cond = cmp("color", ComparisonOperator::Equals, "green");
        let diags = validate_condition(&cond, &targets());
        assert_eq!(rules(&diags), vec!["choice_value"]);
        assert_eq!(diags[0].severity, Severity::Warning);
        // warnings alone do not raise
        assert_eq!(validate_condition_or_raise(&cond, &targets()).unwrap().len(), 1);
    }

    #[test]
    fn empty_group_is_a_warning() {
        let cond: Condition = ConditionGroup::or(vec![]).into();
        let diags = validate_condition(&cond, &targets());
        assert_eq!(rules(&diags), vec!["empty_group"]);
        assert!(diags[0].message.contains("never passes"));
    }

    #[test]
    fn aggregations_check_aggregate_and_filter() {
        use AggregationOperator::{Any, Count, Sum};
        use ComparisonOperator::*;
        let count: Condition = AggregationCondition::new(reference("color"), Count, GreaterThan, 2)
            .with_filter(Equals, "blue")
            .into();
        assert!(validate_condition(&count, &targets()).is_empty());

        let bad: Condition = AggregationCondition::new(reference("bio"), Sum, Contains, "x")
            .with_filter(GreaterThan, 3)
            .into();
        let diags = validate_condition(&bad, &targets());
        assert_eq!(
            rules(&diags),
            vec!["operator_not_allowed", "aggregate_value", "operator_not_allowed"]
        );

        let any: Condition =
            AggregationCondition::new(reference("agree"), Any, Equals, true).into();
        assert!(validate_condition(&any, &targets()).is_empty());
    }

    #[test]
    fn target_serde_shape() {
        let json = r#"{"ref":{"stageId":"s","questionId":"q"},"label":"Pick","type":"choice",
                       "choices":[{"id":"a","label":"A"}]}"#;
        let target: ConditionTarget = serde_json::from_str(json).unwrap();
        assert_eq!(target.target_type, ConditionTargetType::Choice);
        assert_eq!(target.choices[0].id, "a");
    }
}
