//! Applying conditions to collections of prompt items and survey questions.

use std::collections::HashMap;

use crate::condition::{evaluate_condition, extract_dependencies, AnswerLookup, Condition};

/// Anything that may carry a display condition.
pub trait Conditional {
    fn condition(&self) -> Option<&Condition>;
}

/// A survey question whose condition may need to be cleared after edits.
pub trait ConditionalQuestion: Conditional + Clone {
    fn id(&self) -> &str;
    fn clear_condition(&mut self);
}

/// Items whose condition passes; unconditioned items always pass.
pub fn filter_by_condition<'a, T: Conditional>(
    items: &'a [T],
    lookup: &dyn AnswerLookup,
) -> Vec<&'a T> {
    items
        .iter()
        .filter(|item| evaluate_condition(item.condition(), lookup))
        .collect()
}

/// Copy of `questions` with invalid same-stage conditions cleared.
///
/// A question may only depend on questions of its own stage that come
/// strictly before it. A condition naming a same-stage question that is
/// missing, or is the question itself or a later one, is removed entirely.
/// Dependencies on other stages are left alone.
pub fn sanitize_question_conditions<T: ConditionalQuestion>(
    questions: &[T],
    stage_id: &str,
) -> Vec<T> {
    let positions: HashMap<&str, usize> = questions
        .iter()
        .enumerate()
        .map(|(i, q)| (q.id(), i))
        .collect();

    questions
        .iter()
        .enumerate()
        .map(|(index, question)| {
            let invalid = extract_dependencies(question.condition())
                .iter()
                .filter(|dep| dep.stage_id == stage_id)
                .any(|dep| {
                    positions
                        .get(dep.question_id.as_str())
                        .map_or(true, |&pos| pos >= index)
                });
            let mut question = question.clone();
            if invalid {
                tracing::debug!(
                    question = question.id(),
                    stage = stage_id,
                    "Clearing invalid question condition"
                );
                question.clear_condition();
            }
            question
        })
        .collect()
}
