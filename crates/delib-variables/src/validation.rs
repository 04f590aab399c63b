//! Variable config validation: lint rules and diagnostics.
//!
//! Call [`validate_configs`] for advisory diagnostics or
//! [`validate_configs_or_raise`] to fail when any `Error`-severity issue is
//! found. Passing the serialised experiment content also enables the
//! unused-variable check.

use std::collections::HashMap;

use serde_json::Value;

use delib_types::{raise_on_errors, Diagnostic, Result, Severity};

use crate::assignment::duplicate_values;
use crate::codec::validate_value;
use crate::config::{extract_variable_definitions, sanitize_variable_name, VariableConfig};
use crate::schema::Schema;
use crate::usage::find_unused_variables;

/// What every rule gets to look at.
pub struct LintInput<'a> {
    pub configs: &'a [VariableConfig],
    pub content: Option<&'a str>,
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, input: &LintInput<'_>) -> Vec<Diagnostic>;
}

fn diagnostic(
    rule: &dyn LintRule,
    severity: Severity,
    variable: &str,
    message: String,
) -> Diagnostic {
    Diagnostic {
        rule: rule.name().into(),
        severity,
        message,
        subject: Some(variable.to_string()),
        fix: None,
    }
}

fn with_fix(mut d: Diagnostic, fix: &str) -> Diagnostic {
    d.fix = Some(fix.into());
    d
}

/// Messages for a serialised value that does not parse or match `schema`.
fn value_problems(schema: &Schema, raw: &str) -> Option<String> {
    let parsed = match serde_json::from_str::<Value>(raw) {
        Ok(v) => v,
        Err(_) if matches!(schema, Schema::String) => return None,
        Err(e) => return Some(format!("is not valid JSON ({e})")),
    };
    if matches!(schema, Schema::String) && !parsed.is_string() {
        // bare text is accepted for string variables
        return None;
    }
    validate_value(schema, &parsed).err().map(|errors| errors.join("; "))
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct VariableNameRule;
impl LintRule for VariableNameRule {
    fn name(&self) -> &str { "variable_name" }
    fn apply(&self, input: &LintInput<'_>) -> Vec<Diagnostic> {
        input
            .configs
            .iter()
            .filter_map(|c| {
                let name = c.name();
                let sanitized = sanitize_variable_name(name);
                if name.is_empty() || sanitized.is_empty() {
                    Some(diagnostic(self, Severity::Error, name, "Variable name is empty".into()))
                } else if sanitized != name {
                    Some(with_fix(
                        diagnostic(
                            self,
                            Severity::Error,
                            name,
                            format!(
                                "Variable name '{name}' may only contain letters, digits \
                                 and underscores"
                            ),
                        ),
                        &format!("Rename to '{sanitized}'"),
                    ))
                } else {
                    None
                }
            })
            .collect()
    }
}

struct UniqueNamesRule;
impl LintRule for UniqueNamesRule {
    fn name(&self) -> &str { "unique_names" }
    fn apply(&self, input: &LintInput<'_>) -> Vec<Diagnostic> {
        let mut seen: HashMap<String, usize> = HashMap::new();
        for def in extract_variable_definitions(input.configs) {
            *seen.entry(def.name).or_insert(0) += 1;
        }
        let mut duplicates: Vec<_> = seen.into_iter().filter(|(_, n)| *n > 1).collect();
        duplicates.sort();
        duplicates
            .into_iter()
            .map(|(name, n)| {
                diagnostic(
                    self,
                    Severity::Error,
                    &name,
                    format!("Variable '{name}' is defined {n} times"),
                )
            })
            .collect()
    }
}

struct BalancedValuesRule;
impl LintRule for BalancedValuesRule {
    fn name(&self) -> &str { "balanced_values" }
    fn apply(&self, input: &LintInput<'_>) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for config in input.configs {
            let VariableConfig::BalancedAssignment(b) = config else {
                continue;
            };
            let name = &b.definition.name;
            if b.values.len() < 2 {
                diags.push(with_fix(
                    diagnostic(
                        self,
                        Severity::Error,
                        name,
                        format!(
                            "Balanced assignment '{name}' needs at least 2 values, has {}",
                            b.values.len()
                        ),
                    ),
                    "Add more values or use a static variable",
                ));
            }
            let duplicates = duplicate_values(&b.values);
            if !duplicates.is_empty() {
                diags.push(with_fix(
                    diagnostic(
                        self,
                        Severity::Error,
                        name,
                        format!(
                            "Balanced assignment '{name}' lists {} more than once",
                            duplicates.join(", ")
                        ),
                    ),
                    "List each value once and use weights for unequal shares",
                ));
            }
        }
        diags
    }
}

struct BalancedWeightsRule;
impl LintRule for BalancedWeightsRule {
    fn name(&self) -> &str { "balanced_weights" }
    fn apply(&self, input: &LintInput<'_>) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for config in input.configs {
            let VariableConfig::BalancedAssignment(b) = config else {
                continue;
            };
            let Some(weights) = &b.weights else {
                continue;
            };
            let name = &b.definition.name;
            if weights.len() != b.values.len() {
                diags.push(diagnostic(
                    self,
                    Severity::Error,
                    name,
                    format!("'{name}' has {} weights for {} values", weights.len(), b.values.len()),
                ));
            }
            if weights.iter().any(|&w| w == 0) {
                diags.push(diagnostic(
                    self,
                    Severity::Error,
                    name,
                    format!("'{name}' has a zero weight; weights must be positive"),
                ));
            }
        }
        diags
    }
}

struct SelectRangeRule;
impl LintRule for SelectRangeRule {
    fn name(&self) -> &str { "num_to_select" }
    fn apply(&self, input: &LintInput<'_>) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for config in input.configs {
            let VariableConfig::RandomPermutation(p) = config else {
                continue;
            };
            let name = &p.definition.name;
            if p.values.is_empty() {
                let message = format!("'{name}' has no values");
                diags.push(diagnostic(self, Severity::Warning, name, message));
                continue;
            }
            if let Some(n) = p.num_to_select {
                if n == 0 || n > p.values.len() {
                    diags.push(with_fix(
                        diagnostic(
                            self,
                            Severity::Warning,
                            name,
                            format!(
                                "'{name}' selects {n} of {} values; it will be clamped",
                                p.values.len()
                            ),
                        ),
                        &format!("Use a value between 1 and {}", p.values.len()),
                    ));
                }
            }
        }
        diags
    }
}

struct StaticValueRule;
impl LintRule for StaticValueRule {
    fn name(&self) -> &str { "static_value" }
    fn apply(&self, input: &LintInput<'_>) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for config in input.configs {
            let VariableConfig::Static(s) = config else {
                continue;
            };
            let name = &s.definition.name;
            let values = std::iter::once(("value".to_string(), &s.value)).chain(
                s.cohort_values
                    .iter()
                    .map(|(cohort, v)| (format!("value for cohort '{cohort}'"), v)),
            );
            for (label, raw) in values {
                if let Some(problem) = value_problems(&s.definition.schema, raw) {
                    diags.push(diagnostic(
                        self,
                        Severity::Warning,
                        name,
                        format!("'{name}' {label} {problem}; the schema default will be used"),
                    ));
                }
            }
        }
        diags
    }
}

struct PoolValuesRule;
impl LintRule for PoolValuesRule {
    fn name(&self) -> &str { "pool_values" }
    fn apply(&self, input: &LintInput<'_>) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for config in input.configs {
            let (definition, values) = match config {
                VariableConfig::RandomPermutation(p) => (&p.definition, &p.values),
                VariableConfig::BalancedAssignment(b) => (&b.definition, &b.values),
                VariableConfig::Static(_) => continue,
            };
            let (name, schema) = (&definition.name, &definition.schema);
            let item = schema.item_schema();
            for (i, raw) in values.iter().enumerate() {
                if let Some(problem) = value_problems(item, raw) {
                    diags.push(diagnostic(
                        self,
                        Severity::Warning,
                        name,
                        format!("'{name}' value #{} {problem}", i + 1),
                    ));
                }
            }
        }
        diags
    }
}

struct UnusedVariableRule;
impl LintRule for UnusedVariableRule {
    fn name(&self) -> &str { "unused_variable" }
    fn apply(&self, input: &LintInput<'_>) -> Vec<Diagnostic> {
        let Some(content) = input.content else {
            return vec![];
        };
        let definitions: Vec<_> = input.configs.iter().map(|c| c.definition().clone()).collect();
        find_unused_variables(content, &definitions)
            .into_iter()
            .map(|name| {
                with_fix(
                    diagnostic(
                        self,
                        Severity::Warning,
                        &name,
                        format!("Variable '{name}' is never referenced"),
                    ),
                    &format!("Reference it as {{{{{name}}}}} or remove it"),
                )
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run all built-in lint rules and return collected diagnostics.
pub fn validate_configs(configs: &[VariableConfig], content: Option<&str>) -> Vec<Diagnostic> {
    let rules: Vec<Box<dyn LintRule>> = vec![
        Box::new(VariableNameRule),
        Box::new(UniqueNamesRule),
        Box::new(BalancedValuesRule),
        Box::new(BalancedWeightsRule),
        Box::new(SelectRangeRule),
        Box::new(StaticValueRule),
        Box::new(PoolValuesRule),
        Box::new(UnusedVariableRule),
    ];

    let input = LintInput { configs, content };
    let mut diagnostics = Vec::new();
    for rule in &rules {
        diagnostics.extend(rule.apply(&input));
    }
    diagnostics
}

/// Run all lint rules; return `Err` if any `Error`-severity diagnostic found.
pub fn validate_configs_or_raise(
    configs: &[VariableConfig],
    content: Option<&str>,
) -> Result<Vec<Diagnostic>> {
    raise_on_errors(validate_configs(configs, content))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        BalancedAssignmentVariableConfig, RandomPermutationVariableConfig, StaticVariableConfig,
        VariableDefinition,
    };
    use delib_types::VariableScope;

    fn rules_hit(diags: &[Diagnostic]) -> Vec<&str> {
        diags.iter().map(|d| d.rule.as_str()).collect()
    }

    fn static_config(name: &str, schema: Schema, value: &str) -> VariableConfig {
        StaticVariableConfig::new(VariableDefinition::new(name, schema), value).into()
    }

    fn balanced(name: &str, values: &[&str]) -> BalancedAssignmentVariableConfig {
        BalancedAssignmentVariableConfig::new(
            VariableDefinition::new(name, Schema::array(Schema::String)),
            values.iter().map(|v| format!("\"{v}\"")).collect(),
        )
    }

    #[test]
    fn valid_configs_pass() {
        let configs = vec![
            static_config("topic", Schema::String, "\"energy\""),
            balanced("arm", &["control", "treatment"]).with_weights(vec![1, 1]).into(),
        ];
        let diags = validate_configs(&configs, Some("{{topic}} {{arm}}"));
        assert!(diags.is_empty(), "Expected no diagnostics, got: {diags:?}");
    }

    #[test]
    fn bad_name_is_error_with_fix() {
        let diags = validate_configs(&[static_config("my var", Schema::String, "\"x\"")], None);
        assert_eq!(rules_hit(&diags), vec!["variable_name"]);
        assert_eq!(diags[0].severity, Severity::Error);
        assert_eq!(diags[0].fix.as_deref(), Some("Rename to 'myvar'"));
    }

    #[test]
    fn duplicate_names_include_expanded_items() {
        let perm = RandomPermutationVariableConfig::new(
            VariableDefinition::new("item", Schema::array(Schema::String)),
            VariableScope::Participant,
            vec!["\"a\"".into(), "\"b\"".into()],
        );
        let configs = vec![
            perm.into(),
            static_config("item_2", Schema::String, "\"x\""),
        ];
        let diags = validate_configs(&configs, None);
        assert_eq!(rules_hit(&diags), vec!["unique_names"]);
        assert_eq!(diags[0].subject.as_deref(), Some("item_2"));
    }

    #[test]
    fn balanced_problems_are_errors() {
        let configs = vec![
            balanced("solo", &["only"]).into(),
            balanced("skewed", &["a", "b"]).with_weights(vec![0, 2, 1]).into(),
        ];
        let diags = validate_configs(&configs, None);
        assert_eq!(
            rules_hit(&diags),
            vec!["balanced_values", "balanced_weights", "balanced_weights"]
        );
        assert!(validate_configs_or_raise(&configs, None).is_err());
    }

    #[test]
    fn repeated_balanced_values_are_errors() {
        let configs = vec![balanced("arm", &["A", "A", "B"]).into()];
        let diags = validate_configs(&configs, None);
        assert_eq!(rules_hit(&diags), vec!["balanced_values"]);
        assert_eq!(diags[0].severity, Severity::Error);
        assert!(diags[0].message.contains("\"A\" more than once"), "{}", diags[0].message);
        assert!(validate_configs_or_raise(&configs, None).is_err());
    }

    #[test]
    fn select_range_is_warning() {
        let perm = RandomPermutationVariableConfig::new(
            VariableDefinition::new("item", Schema::array(Schema::String)),
            VariableScope::Cohort,
            vec!["\"a\"".into()],
        )
        .select(3)
        .expanded(false);
        let diags = validate_configs_or_raise(&[perm.into()], None).unwrap();
        assert_eq!(rules_hit(&diags), vec!["num_to_select"]);
        assert_eq!(diags[0].severity, Severity::Warning);
    }

    #[test]
    fn mismatching_values_are_warnings() {
        let configs = vec![
            static_config("count", Schema::Number, "\"three\""),
            static_config("label", Schema::String, "bare text"),
            RandomPermutationVariableConfig::new(
                VariableDefinition::new("n", Schema::array(Schema::Number)),
                VariableScope::Experiment,
                vec!["1".into(), "true".into()],
            )
            .into(),
        ];
        let diags = validate_configs(&configs, None);
        assert_eq!(rules_hit(&diags), vec!["static_value", "pool_values"]);
        assert!(diags[0].message.contains("expected number"));
        assert!(diags[1].message.contains("value #2"));
    }

    #[test]
    fn cohort_values_are_checked() {
        let config: VariableConfig =
            StaticVariableConfig::new(VariableDefinition::new("n", Schema::Number), "1")
                .with_cohort_value("c1", "{")
                .into();
        let diags = validate_configs(&[config], None);
        assert_eq!(rules_hit(&diags), vec!["static_value"]);
        assert!(diags[0].message.contains("cohort 'c1'"));
    }

    #[test]
    fn unused_variables_only_with_content() {
        let configs = vec![static_config("topic", Schema::String, "\"x\"")];
        assert!(validate_configs(&configs, None).is_empty());

        let diags = validate_configs(&configs, Some("no references here"));
        assert_eq!(rules_hit(&diags), vec!["unused_variable"]);
        assert_eq!(diags[0].fix.as_deref(), Some("Reference it as {{topic}} or remove it"));
    }
}
