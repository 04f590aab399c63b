//! Conditional display for deliberation experiments.
//!
//! Condition trees gate prompt fragments and survey questions on answers
//! given earlier. Evaluation is pure and fails closed: an unanswered target
//! hides the content instead of erroring.

pub mod condition;
pub mod filter;
pub mod target;

pub use condition::{
    apply_comparison, condition_target_key, evaluate_condition, extract_dependencies,
    extract_multiple_dependencies, has_aggregation_conditions, parse_condition_target_key,
    AggregationCondition, AggregationOperator, AnswerLookup, ComparisonCondition,
    ComparisonOperator, Condition, ConditionGroup, ConditionOperator, ConditionTargetReference,
    ConditionValue, FilterComparison, TargetValues,
};
pub use filter::{
    filter_by_condition, sanitize_question_conditions, Conditional, ConditionalQuestion,
};
pub use target::{
    aggregate_operators, validate_condition, validate_condition_or_raise, ChoiceOption,
    ConditionTarget, ConditionTargetType,
};
