//! Condition trees and their evaluation.
//!
//! A [`Condition`] is either a group combining child conditions with AND/OR,
//! a comparison of one answer against an expected value, or an aggregation
//! over every answer recorded for a target (for example one per group
//! member). Evaluation is a pure function of the condition and an
//! [`AnswerLookup`]; a target without an answer makes its comparison `false`.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Condition {
    Group(ConditionGroup),
    Comparison(ComparisonCondition),
    Aggregation(AggregationCondition),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOperator {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionGroup {
    #[serde(default = "new_condition_id")]
    pub id: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// The (stage, question) pair whose answer a condition reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionTargetReference {
    pub stage_id: String,
    pub question_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Contains,
    NotContains,
}

/// Expected value of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

/// Operator and expected value, without a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterComparison {
    pub operator: ComparisonOperator,
    pub value: ConditionValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonCondition {
    #[serde(default = "new_condition_id")]
    pub id: String,
    pub target: ConditionTargetReference,
    pub operator: ComparisonOperator,
    pub value: ConditionValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationOperator {
    Any,
    All,
    None,
    Count,
    Sum,
    Average,
}

/// Comparison applied across every value recorded for a target.
///
/// `ANY`/`ALL`/`NONE` compare each value. `COUNT`/`SUM`/`AVERAGE` first keep
/// the values passing `filter_comparison` (if any) and then compare the
/// aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationCondition {
    #[serde(default = "new_condition_id")]
    pub id: String,
    pub target: ConditionTargetReference,
    pub aggregator: AggregationOperator,
    pub operator: ComparisonOperator,
    pub value: ConditionValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_comparison: Option<FilterComparison>,
}

fn new_condition_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ---------------------------------------------------------------------------
// Constructors
// ---------------------------------------------------------------------------

impl ConditionTargetReference {
    pub fn new(stage_id: impl Into<String>, question_id: impl Into<String>) -> Self {
        Self {
            stage_id: stage_id.into(),
            question_id: question_id.into(),
        }
    }
}

impl ConditionGroup {
    pub fn new(operator: ConditionOperator, conditions: Vec<Condition>) -> Self {
        Self {
            id: new_condition_id(),
            operator,
            conditions,
        }
    }

    pub fn and(conditions: Vec<Condition>) -> Self {
        Self::new(ConditionOperator::And, conditions)
    }

    pub fn or(conditions: Vec<Condition>) -> Self {
        Self::new(ConditionOperator::Or, conditions)
    }
}

impl ComparisonCondition {
    pub fn new(
        target: ConditionTargetReference,
        operator: ComparisonOperator,
        value: impl Into<ConditionValue>,
    ) -> Self {
        Self {
            id: new_condition_id(),
            target,
            operator,
            value: value.into(),
        }
    }
}

impl AggregationCondition {
    pub fn new(
        target: ConditionTargetReference,
        aggregator: AggregationOperator,
        operator: ComparisonOperator,
        value: impl Into<ConditionValue>,
    ) -> Self {
        Self {
            id: new_condition_id(),
            target,
            aggregator,
            operator,
            value: value.into(),
            filter_comparison: None,
        }
    }

    pub fn with_filter(
        mut self,
        operator: ComparisonOperator,
        value: impl Into<ConditionValue>,
    ) -> Self {
        self.filter_comparison = Some(FilterComparison {
            operator,
            value: value.into(),
        });
        self
    }
}

impl From<ConditionGroup> for Condition {
    fn from(group: ConditionGroup) -> Self {
        Condition::Group(group)
    }
}

impl From<ComparisonCondition> for Condition {
    fn from(comparison: ComparisonCondition) -> Self {
        Condition::Comparison(comparison)
    }
}

impl From<AggregationCondition> for Condition {
    fn from(aggregation: AggregationCondition) -> Self {
        Condition::Aggregation(aggregation)
    }
}

impl From<bool> for ConditionValue {
    fn from(b: bool) -> Self {
        ConditionValue::Bool(b)
    }
}

impl From<f64> for ConditionValue {
    fn from(n: f64) -> Self {
        ConditionValue::Number(n)
    }
}

impl From<i32> for ConditionValue {
    fn from(n: i32) -> Self {
        ConditionValue::Number(f64::from(n))
    }
}

impl From<&str> for ConditionValue {
    fn from(s: &str) -> Self {
        ConditionValue::Text(s.to_string())
    }
}

impl From<String> for ConditionValue {
    fn from(s: String) -> Self {
        ConditionValue::Text(s)
    }
}

impl ConditionValue {
    /// Numeric reading: numbers, and text that parses as a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ConditionValue::Number(n) => Some(*n),
            ConditionValue::Text(s) => s.trim().parse().ok(),
            ConditionValue::Bool(_) => None,
        }
    }

    fn as_text(&self) -> String {
        match self {
            ConditionValue::Text(s) => s.clone(),
            ConditionValue::Number(n) => n.to_string(),
            ConditionValue::Bool(b) => b.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Target keys
// ---------------------------------------------------------------------------

/// `"{stageId}::{questionId}"`, the key answer maps are indexed by.
pub fn condition_target_key(target: &ConditionTargetReference) -> String {
    format!("{}::{}", target.stage_id, target.question_id)
}

pub fn parse_condition_target_key(key: &str) -> Option<ConditionTargetReference> {
    let (stage_id, question_id) = key.split_once("::")?;
    Some(ConditionTargetReference::new(stage_id, question_id))
}

// ---------------------------------------------------------------------------
// Answer lookup
// ---------------------------------------------------------------------------

/// Source of answers for condition targets.
pub trait AnswerLookup {
    /// The single answer for `target`, if one has been recorded.
    fn lookup(&self, target: &ConditionTargetReference) -> Option<Value>;

    /// Every answer recorded for `target`; used by aggregation conditions.
    fn lookup_all(&self, _target: &ConditionTargetReference) -> Vec<Value> {
        Vec::new()
    }
}

impl<F> AnswerLookup for F
where
    F: Fn(&str, &str) -> Option<Value>,
{
    fn lookup(&self, target: &ConditionTargetReference) -> Option<Value> {
        self(&target.stage_id, &target.question_id)
    }
}

/// Answers keyed by [`condition_target_key`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetValues {
    #[serde(default)]
    pub values: HashMap<String, Value>,
    #[serde(default)]
    pub all_values: HashMap<String, Vec<Value>>,
}

impl TargetValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, target: &ConditionTargetReference, value: Value) {
        self.values.insert(condition_target_key(target), value);
    }

    pub fn insert_all(&mut self, target: &ConditionTargetReference, values: Vec<Value>) {
        self.all_values.insert(condition_target_key(target), values);
    }

    pub fn with(mut self, stage_id: &str, question_id: &str, value: Value) -> Self {
        self.insert(&ConditionTargetReference::new(stage_id, question_id), value);
        self
    }
}

impl AnswerLookup for TargetValues {
    fn lookup(&self, target: &ConditionTargetReference) -> Option<Value> {
        self.values.get(&condition_target_key(target)).cloned()
    }

    fn lookup_all(&self, target: &ConditionTargetReference) -> Vec<Value> {
        self.all_values
            .get(&condition_target_key(target))
            .cloned()
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Evaluate a condition. No condition means no gating (`true`).
pub fn evaluate_condition(condition: Option<&Condition>, lookup: &dyn AnswerLookup) -> bool {
    match condition {
        None => true,
        Some(c) => evaluate(c, lookup),
    }
}

fn evaluate(condition: &Condition, lookup: &dyn AnswerLookup) -> bool {
    match condition {
        // `all` / `any` short-circuit, and give true / false when empty
        Condition::Group(group) => match group.operator {
            ConditionOperator::And => group.conditions.iter().all(|c| evaluate(c, lookup)),
            ConditionOperator::Or => group.conditions.iter().any(|c| evaluate(c, lookup)),
        },
        Condition::Comparison(comparison) => match lookup.lookup(&comparison.target) {
            Some(actual) if !actual.is_null() => {
                apply_comparison(comparison.operator, &actual, &comparison.value)
            }
            _ => {
                tracing::trace!(
                    target_key = %condition_target_key(&comparison.target),
                    "Condition target unanswered"
                );
                false
            }
        },
        Condition::Aggregation(aggregation) => {
            evaluate_aggregation(aggregation, &lookup.lookup_all(&aggregation.target))
        }
    }
}

/// Compare an answer against an expected value.
///
/// Equality is type-strict (text with text, number with number, boolean with
/// boolean). Ordering needs a numeric answer; containment needs a text
/// answer. Anything else is `false`.
pub fn apply_comparison(
    operator: ComparisonOperator,
    actual: &Value,
    expected: &ConditionValue,
) -> bool {
    use ComparisonOperator::*;
    match operator {
        Equals => values_equal(actual, expected),
        NotEquals => !values_equal(actual, expected),
        GreaterThan | GreaterThanOrEqual | LessThan | LessThanOrEqual => {
            let (Some(a), Some(e)) = (actual.as_f64(), expected.as_number()) else {
                return false;
            };
            match operator {
                GreaterThan => a > e,
                GreaterThanOrEqual => a >= e,
                LessThan => a < e,
                _ => a <= e,
            }
        }
        Contains | NotContains => {
            let Value::String(text) = actual else {
                return false;
            };
            let found = text.contains(expected.as_text().as_str());
            if operator == Contains {
                found
            } else {
                !found
            }
        }
    }
}

fn values_equal(actual: &Value, expected: &ConditionValue) -> bool {
    match (actual, expected) {
        (Value::String(a), ConditionValue::Text(e)) => a == e,
        (Value::Bool(a), ConditionValue::Bool(e)) => a == e,
        (Value::Number(a), ConditionValue::Number(e)) => a.as_f64() == Some(*e),
        _ => false,
    }
}

fn numeric(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn evaluate_aggregation(condition: &AggregationCondition, values: &[Value]) -> bool {
    if values.is_empty() {
        return false;
    }
    let passes = |v: &Value| apply_comparison(condition.operator, v, &condition.value);
    let filter = condition.filter_comparison.as_ref();

    match condition.aggregator {
        AggregationOperator::Any => values.iter().any(passes),
        AggregationOperator::All => values.iter().all(passes),
        AggregationOperator::None => !values.iter().any(passes),
        AggregationOperator::Count => {
            let count = match filter {
                Some(_) => filtered(values, filter).len(),
                None => values.iter().filter(|v| !v.is_null()).count(),
            };
            passes(&Value::from(count))
        }
        AggregationOperator::Sum => {
            let sum: f64 = filtered(values, filter).into_iter().map(numeric).sum();
            passes(&number(sum))
        }
        AggregationOperator::Average => {
            let kept = filtered(values, filter);
            if kept.is_empty() {
                return false;
            }
            let sum: f64 = kept.iter().map(|v| numeric(v)).sum();
            passes(&number(sum / kept.len() as f64))
        }
    }
}

fn filtered<'a>(values: &'a [Value], filter: Option<&FilterComparison>) -> Vec<&'a Value> {
    match filter {
        Some(f) => values
            .iter()
            .filter(|v| apply_comparison(f.operator, v, &f.value))
            .collect(),
        None => values.iter().collect(),
    }
}

fn number(n: f64) -> Value {
    serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
}

// ---------------------------------------------------------------------------
// Dependencies
// ---------------------------------------------------------------------------

/// Every target the condition reads, deduplicated in order of first use.
pub fn extract_dependencies(condition: Option<&Condition>) -> Vec<ConditionTargetReference> {
    let mut deps = Vec::new();
    if let Some(c) = condition {
        collect_dependencies(c, &mut deps);
    }
    deps
}

/// Union of the dependencies of several conditions.
pub fn extract_multiple_dependencies<'a, I>(conditions: I) -> Vec<ConditionTargetReference>
where
    I: IntoIterator<Item = Option<&'a Condition>>,
{
    let mut deps = Vec::new();
    for c in conditions.into_iter().flatten() {
        collect_dependencies(c, &mut deps);
    }
    deps
}

fn collect_dependencies(condition: &Condition, deps: &mut Vec<ConditionTargetReference>) {
    let target = match condition {
        Condition::Group(group) => {
            for c in &group.conditions {
                collect_dependencies(c, deps);
            }
            return;
        }
        Condition::Comparison(c) => &c.target,
        Condition::Aggregation(a) => &a.target,
    };
    if !deps.contains(target) {
        deps.push(target.clone());
    }
}

pub fn has_aggregation_conditions(condition: Option<&Condition>) -> bool {
    match condition {
        Some(Condition::Aggregation(_)) => true,
        Some(Condition::Group(group)) => group
            .conditions
            .iter()
            .any(|c| has_aggregation_conditions(Some(c))),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComparisonOperator::Equals => "equals",
            ComparisonOperator::NotEquals => "not equals",
            ComparisonOperator::GreaterThan => "greater than",
            ComparisonOperator::GreaterThanOrEqual => "greater than or equal to",
            ComparisonOperator::LessThan => "less than",
            ComparisonOperator::LessThanOrEqual => "less than or equal to",
            ComparisonOperator::Contains => "contains",
            ComparisonOperator::NotContains => "does not contain",
        };
        f.write_str(s)
    }
}

impl fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConditionOperator::And => "AND",
            ConditionOperator::Or => "OR",
        })
    }
}

impl fmt::Display for AggregationOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AggregationOperator::Any => "ANY value",
            AggregationOperator::All => "ALL values",
            AggregationOperator::None => "NO value",
            AggregationOperator::Count => "COUNT of values",
            AggregationOperator::Sum => "SUM of values",
            AggregationOperator::Average => "AVERAGE of values",
        };
        f.write_str(s)
    }
}

impl fmt::Display for ConditionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionValue::Text(s) => write!(f, "\"{s}\""),
            ConditionValue::Number(n) => write!(f, "{n}"),
            ConditionValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Group(group) if group.conditions.is_empty() => {
                write!(f, "({} of nothing)", group.operator)
            }
            Condition::Group(group) => {
                f.write_str("(")?;
                for (i, c) in group.conditions.iter().enumerate() {
                    if i > 0 {
                        write!(f, " {} ", group.operator)?;
                    }
                    write!(f, "{c}")?;
                }
                f.write_str(")")
            }
            Condition::Comparison(c) => write!(
                f,
                "{} {} {}",
                condition_target_key(&c.target),
                c.operator,
                c.value
            ),
            Condition::Aggregation(a) => {
                write!(f, "{} of {}", a.aggregator, condition_target_key(&a.target))?;
                if let Some(filter) = &a.filter_comparison {
                    write!(f, " where value {} {}", filter.operator, filter.value)?;
                }
                write!(f, " {} {}", a.operator, a.value)
            }
        }
    }
}
