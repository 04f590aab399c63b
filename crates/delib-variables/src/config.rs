//! Variable configuration types as authored by the experiment editor.
//!
//! Configs are serde-compatible with the editor's JSON: a `type` tag
//! (`static`, `random_permutation`, `balanced_assignment`), camelCase fields,
//! and values stored in their serialised (JSON text) form.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use delib_types::VariableScope;

use crate::schema::Schema;

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// Name, description and value shape of a template variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub schema: Schema,
}

impl VariableDefinition {
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            schema,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Strip every character outside `[A-Za-z0-9_]`; prefix `_` when the result
/// would start with a digit.
pub fn sanitize_variable_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    match cleaned.chars().next() {
        Some(c) if c.is_ascii_digit() => format!("_{cleaned}"),
        _ => cleaned,
    }
}

// ---------------------------------------------------------------------------
// Shuffle / balance settings
// ---------------------------------------------------------------------------

/// Which identifier seeds a permutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedStrategy {
    Experiment,
    Cohort,
    Participant,
    Custom,
}

impl From<VariableScope> for SeedStrategy {
    fn from(scope: VariableScope) -> Self {
        match scope {
            VariableScope::Experiment => SeedStrategy::Experiment,
            VariableScope::Cohort => SeedStrategy::Cohort,
            VariableScope::Participant => SeedStrategy::Participant,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShuffleConfig {
    pub shuffle: bool,
    pub seed: SeedStrategy,
    /// Only read when `seed` is [`SeedStrategy::Custom`].
    #[serde(default)]
    pub custom_seed: String,
}

impl ShuffleConfig {
    pub fn seeded_by(seed: SeedStrategy) -> Self {
        Self {
            shuffle: true,
            seed,
            custom_seed: String::new(),
        }
    }

    pub fn custom(seed: impl Into<String>) -> Self {
        Self {
            shuffle: true,
            seed: SeedStrategy::Custom,
            custom_seed: seed.into(),
        }
    }

    /// Keep the configured order.
    pub fn unshuffled() -> Self {
        Self {
            shuffle: false,
            seed: SeedStrategy::Experiment,
            custom_seed: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceStrategy {
    /// Deterministic: the candidate furthest behind its target share.
    #[default]
    #[serde(alias = "least_used")]
    RoundRobin,
    /// Weighted draw seeded by participant; idempotent, not balanced.
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceAcross {
    #[default]
    Experiment,
    Cohort,
}

// ---------------------------------------------------------------------------
// Config variants
// ---------------------------------------------------------------------------

/// One fixed value shared by every participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticVariableConfig {
    pub id: String,
    pub definition: VariableDefinition,
    /// Serialised value.
    pub value: String,
    /// Per-cohort overrides keyed by cohort id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cohort_values: BTreeMap<String, String>,
}

/// A seeded permutation (or prefix of one) of a value pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RandomPermutationVariableConfig {
    pub id: String,
    pub scope: VariableScope,
    /// Schema is `Array(item)`; each pool entry is one serialised item.
    pub definition: VariableDefinition,
    pub shuffle_config: ShuffleConfig,
    pub values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_to_select: Option<usize>,
    #[serde(
        default,
        rename = "expandListToSeparateVariables",
        alias = "expandToSeparateVariables"
    )]
    pub expand_to_separate_variables: bool,
}

/// One value per participant, balanced across an experiment or cohort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalancedAssignmentVariableConfig {
    pub id: String,
    pub definition: VariableDefinition,
    pub values: Vec<String>,
    /// Relative share per value; equal shares when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<u32>>,
    #[serde(default)]
    pub balance_strategy: BalanceStrategy,
    #[serde(default)]
    pub balance_across: BalanceAcross,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VariableConfig {
    Static(StaticVariableConfig),
    RandomPermutation(RandomPermutationVariableConfig),
    BalancedAssignment(BalancedAssignmentVariableConfig),
}

fn new_config_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl StaticVariableConfig {
    pub fn new(definition: VariableDefinition, value: impl Into<String>) -> Self {
        Self {
            id: new_config_id(),
            definition,
            value: value.into(),
            cohort_values: BTreeMap::new(),
        }
    }

    pub fn with_cohort_value(
        mut self,
        cohort_id: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.cohort_values.insert(cohort_id.into(), value.into());
        self
    }
}

impl RandomPermutationVariableConfig {
    /// A shuffled, expanded permutation seeded by its own scope.
    pub fn new(definition: VariableDefinition, scope: VariableScope, values: Vec<String>) -> Self {
        Self {
            id: new_config_id(),
            scope,
            definition,
            shuffle_config: ShuffleConfig::seeded_by(scope.into()),
            values,
            num_to_select: None,
            expand_to_separate_variables: true,
        }
    }

    pub fn with_shuffle(mut self, shuffle_config: ShuffleConfig) -> Self {
        self.shuffle_config = shuffle_config;
        self
    }

    pub fn select(mut self, n: usize) -> Self {
        self.num_to_select = Some(n);
        self
    }

    pub fn expanded(mut self, expand: bool) -> Self {
        self.expand_to_separate_variables = expand;
        self
    }
}

impl BalancedAssignmentVariableConfig {
    pub fn new(definition: VariableDefinition, values: Vec<String>) -> Self {
        Self {
            id: new_config_id(),
            definition,
            values,
            weights: None,
            balance_strategy: BalanceStrategy::RoundRobin,
            balance_across: BalanceAcross::Experiment,
        }
    }

    pub fn with_weights(mut self, weights: Vec<u32>) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn with_strategy(mut self, strategy: BalanceStrategy) -> Self {
        self.balance_strategy = strategy;
        self
    }

    pub fn across(mut self, across: BalanceAcross) -> Self {
        self.balance_across = across;
        self
    }
}

impl From<StaticVariableConfig> for VariableConfig {
    fn from(config: StaticVariableConfig) -> Self {
        VariableConfig::Static(config)
    }
}

impl From<RandomPermutationVariableConfig> for VariableConfig {
    fn from(config: RandomPermutationVariableConfig) -> Self {
        VariableConfig::RandomPermutation(config)
    }
}

impl From<BalancedAssignmentVariableConfig> for VariableConfig {
    fn from(config: BalancedAssignmentVariableConfig) -> Self {
        VariableConfig::BalancedAssignment(config)
    }
}

impl VariableConfig {
    pub fn id(&self) -> &str {
        match self {
            VariableConfig::Static(c) => &c.id,
            VariableConfig::RandomPermutation(c) => &c.id,
            VariableConfig::BalancedAssignment(c) => &c.id,
        }
    }

    pub fn definition(&self) -> &VariableDefinition {
        match self {
            VariableConfig::Static(c) => &c.definition,
            VariableConfig::RandomPermutation(c) => &c.definition,
            VariableConfig::BalancedAssignment(c) => &c.definition,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition().name
    }

    /// Granularity at which this variable is resolved.
    ///
    /// Static values are experiment-wide unless they carry cohort overrides;
    /// balanced assignments are always per participant.
    pub fn scope(&self) -> VariableScope {
        match self {
            VariableConfig::Static(c) if c.cohort_values.is_empty() => VariableScope::Experiment,
            VariableConfig::Static(_) => VariableScope::Cohort,
            VariableConfig::RandomPermutation(c) => c.scope,
            VariableConfig::BalancedAssignment(_) => VariableScope::Participant,
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            VariableConfig::Static(_) => "static",
            VariableConfig::RandomPermutation(_) => "random_permutation",
            VariableConfig::BalancedAssignment(_) => "balanced_assignment",
        }
    }
}

/// The definitions templates can reference once `configs` are resolved.
///
/// Expanded permutations contribute `name_1..name_N` with the item schema;
/// balanced assignments contribute one item-typed variable.
pub fn extract_variable_definitions(configs: &[VariableConfig]) -> Vec<VariableDefinition> {
    let mut definitions = Vec::new();
    for config in configs {
        match config {
            VariableConfig::Static(c) => definitions.push(c.definition.clone()),
            VariableConfig::RandomPermutation(c) if c.expand_to_separate_variables => {
                let count = c.num_to_select.unwrap_or(c.values.len());
                let item = c.definition.schema.item_schema();
                definitions.extend((1..=count).map(|i| VariableDefinition {
                    name: format!("{}_{i}", c.definition.name),
                    description: c.definition.description.clone(),
                    schema: item.clone(),
                }));
            }
            VariableConfig::RandomPermutation(c) => definitions.push(c.definition.clone()),
            VariableConfig::BalancedAssignment(c) => definitions.push(VariableDefinition {
                name: c.definition.name.clone(),
                description: c.definition.description.clone(),
                schema: c.definition.schema.item_schema().clone(),
            }),
        }
    }
    definitions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn colors() -> VariableConfig {
        RandomPermutationVariableConfig::new(
            VariableDefinition::new("color", Schema::array(Schema::String)),
            VariableScope::Participant,
            vec!["\"red\"".into(), "\"green\"".into(), "\"blue\"".into()],
        )
        .into()
    }

    #[test]
    fn sanitize_strips_and_prefixes() {
        assert_eq!(sanitize_variable_name("my var-name!"), "myvarname");
        assert_eq!(sanitize_variable_name("2nd_place"), "_2nd_place");
        assert_eq!(sanitize_variable_name("ok_name_1"), "ok_name_1");
        assert_eq!(sanitize_variable_name("ü"), "");
    }

    #[test]
    fn deserializes_editor_json() {
        let json = r#"{
            "id": "cfg-1",
            "type": "balanced_assignment",
            "scope": "participant",
            "definition": {
                "name": "arm",
                "description": "Treatment arm",
                "schema": {"type": "array", "items": {"type": "string"}}
            },
            "values": ["\"control\"", "\"treatment\""],
            "weights": [1, 3],
            "balanceStrategy": "round_robin",
            "balanceAcross": "cohort"
        }"#;
        let config: VariableConfig = serde_json::from_str(json).unwrap();
        let VariableConfig::BalancedAssignment(c) = &config else {
            panic!("expected balanced assignment, got {config:?}");
        };
        assert_eq!(c.id, "cfg-1");
        assert_eq!(c.weights.as_deref(), Some(&[1, 3][..]));
        assert_eq!(c.balance_across, BalanceAcross::Cohort);
        assert_eq!(config.scope(), VariableScope::Participant);
    }

    #[test]
    fn least_used_is_read_as_round_robin() {
        let strategy: BalanceStrategy = serde_json::from_str("\"least_used\"").unwrap();
        assert_eq!(strategy, BalanceStrategy::RoundRobin);
    }

    #[test]
    fn permutation_accepts_both_expand_spellings() {
        let base = r#"{"id":"perm-1","type":"random_permutation","scope":"cohort",
            "definition":{"name":"v","schema":{"type":"array","items":{"type":"number"}}},
            "shuffleConfig":{"shuffle":true,"seed":"custom","customSeed":"abc"},
            "values":["1","2"],"#;
        for key in ["expandListToSeparateVariables", "expandToSeparateVariables"] {
            let json = format!("{base}\"{key}\":true}}");
            let config: VariableConfig = serde_json::from_str(&json).unwrap();
            let VariableConfig::RandomPermutation(c) = config else {
                panic!("expected permutation");
            };
            assert!(c.expand_to_separate_variables);
            assert_eq!(c.shuffle_config.custom_seed, "abc");
            assert_eq!(c.id, "perm-1");
        }
    }

    #[test]
    fn serializes_with_type_tag() {
        let config: VariableConfig = StaticVariableConfig::new(
            VariableDefinition::new("topic", Schema::String),
            "\"climate\"",
        )
        .into();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["type"], "static");
        assert_eq!(json["definition"]["schema"]["type"], "string");
        assert!(json.get("cohortValues").is_none());
    }

    #[test]
    fn scope_rules() {
        let plain: VariableConfig =
            StaticVariableConfig::new(VariableDefinition::new("s", Schema::String), "\"x\"").into();
        assert_eq!(plain.scope(), VariableScope::Experiment);

        let per_cohort: VariableConfig =
            StaticVariableConfig::new(VariableDefinition::new("s", Schema::String), "\"x\"")
                .with_cohort_value("c1", "\"y\"")
                .into();
        assert_eq!(per_cohort.scope(), VariableScope::Cohort);
        assert_eq!(colors().scope(), VariableScope::Participant);
    }

    #[test]
    fn permutation_defaults_seed_to_scope() {
        let VariableConfig::RandomPermutation(c) = colors() else {
            unreachable!()
        };
        assert_eq!(c.shuffle_config.seed, SeedStrategy::Participant);
        assert!(c.shuffle_config.shuffle);
        assert!(c.expand_to_separate_variables);
    }

    #[test]
    fn extract_definitions_expands_permutations() {
        let VariableConfig::RandomPermutation(perm) = colors() else {
            unreachable!()
        };
        let configs = vec![
            perm.clone().select(2).into(),
            perm.clone().expanded(false).into(),
            BalancedAssignmentVariableConfig::new(
                VariableDefinition::new("arm", Schema::array(Schema::Number)),
                vec!["1".into(), "2".into()],
            )
            .into(),
        ];
        let defs = extract_variable_definitions(&configs);
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["color_1", "color_2", "color", "arm"]);
        assert_eq!(defs[0].schema, Schema::String);
        assert_eq!(defs[2].schema, Schema::array(Schema::String));
        assert_eq!(defs[3].schema, Schema::Number);
    }
}
