//! Assignment engine: turns a [`VariableConfig`] plus an
//! [`AssignmentContext`] into concrete values.
//!
//! Static and permutation resolution are pure. Balanced round-robin
//! assignment goes through an [`AssignmentStore`], which owns the shared
//! counters and memoises each participant's value.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use delib_types::{AssignmentContext, DelibError, Result, VariableScope};

use crate::codec::{deserialize, validate_value};
use crate::config::{
    BalanceAcross, BalanceStrategy, BalancedAssignmentVariableConfig,
    RandomPermutationVariableConfig, SeedStrategy, StaticVariableConfig, VariableConfig,
};
use crate::random::SeededRng;
use crate::retry::{execute_with_retry, BackoffPolicy};
use crate::schema::Schema;
use crate::store::{AssignmentStore, InMemoryAssignmentStore, PartitionKey};

/// Resolved value(s) of one variable.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Resolution {
    Single(Value),
    List(Vec<Value>),
}

impl Resolution {
    pub fn to_value(&self) -> Value {
        match self {
            Resolution::Single(v) => v.clone(),
            Resolution::List(items) => Value::Array(items.clone()),
        }
    }
}

/// How the resolver treats a failing assignment store.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverConfig {
    pub max_store_retries: usize,
    pub backoff: BackoffPolicy,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_store_retries: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

pub struct VariableResolver {
    store: Arc<dyn AssignmentStore>,
    config: ResolverConfig,
}

impl VariableResolver {
    pub fn new(store: Arc<dyn AssignmentStore>) -> Self {
        Self::with_config(store, ResolverConfig::default())
    }

    pub fn with_config(store: Arc<dyn AssignmentStore>, config: ResolverConfig) -> Self {
        Self { store, config }
    }

    /// A resolver over a fresh [`InMemoryAssignmentStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryAssignmentStore::new()))
    }

    pub fn store(&self) -> &Arc<dyn AssignmentStore> {
        &self.store
    }

    /// Resolve one variable for `ctx`.
    pub async fn resolve(
        &self,
        config: &VariableConfig,
        ctx: &AssignmentContext,
    ) -> Result<Resolution> {
        match config {
            VariableConfig::Static(c) => Ok(Resolution::Single(resolve_static(c, ctx))),
            VariableConfig::RandomPermutation(c) => {
                Ok(Resolution::List(resolve_permutation(c, ctx)))
            }
            VariableConfig::BalancedAssignment(c) => {
                self.resolve_balanced(c, ctx).await.map(Resolution::Single)
            }
        }
    }

    async fn resolve_balanced(
        &self,
        config: &BalancedAssignmentVariableConfig,
        ctx: &AssignmentContext,
    ) -> Result<Value> {
        validate_balanced(config)?;
        let name = config.definition.name.as_str();
        let participant_id = ctx
            .participant_id
            .as_deref()
            .ok_or_else(|| DelibError::MissingContext {
                variable: name.to_string(),
                field: "participant id".into(),
            })?;
        let item_schema = config.definition.schema.item_schema();
        let weights = config.weights.as_deref();

        let chosen = match config.balance_strategy {
            BalanceStrategy::Random => {
                let seed = format!("{participant_id}-{name}");
                let idx = SeededRng::from_seed_str(&seed)
                    .weighted_index(config.values.len(), weights)
                    .unwrap_or(0);
                tracing::debug!(
                    variable = %name,
                    participant = %participant_id,
                    index = idx,
                    "Random balanced draw"
                );
                config.values[idx].clone()
            }
            BalanceStrategy::RoundRobin => {
                let partition = match config.balance_across {
                    BalanceAcross::Experiment => ctx.experiment_id.clone(),
                    BalanceAcross::Cohort => {
                        ctx.cohort_id.clone().ok_or_else(|| DelibError::MissingContext {
                            variable: name.to_string(),
                            field: "cohort id".into(),
                        })?
                    }
                };
                let key = PartitionKey::new(config.id.as_str(), partition);
                let store = &self.store;
                let key_ref = &key;
                let candidates = config.values.as_slice();
                let choose = move |counts: &[u64]| round_robin_pick(counts, weights);
                let choose_ref = &choose;

                let stored = execute_with_retry(
                    move || store.assign(key_ref, participant_id, candidates, choose_ref),
                    self.config.max_store_retries,
                    &self.config.backoff,
                    name,
                )
                .await?;

                if stored.reused {
                    tracing::debug!(
                        variable = %name,
                        participant = %participant_id,
                        partition = %key,
                        "Reusing balanced assignment"
                    );
                } else {
                    tracing::info!(
                        variable = %name,
                        participant = %participant_id,
                        partition = %key,
                        counts = ?stored.counts,
                        "New balanced assignment"
                    );
                }
                stored.value
            }
        };

        Ok(deserialize(item_schema, &chosen, item_schema.default_value()))
    }

    /// Variable map (`name -> serialised value`) for one config.
    pub async fn generate_variables(
        &self,
        config: &VariableConfig,
        ctx: &AssignmentContext,
    ) -> Result<BTreeMap<String, String>> {
        let resolution = self.resolve(config, ctx).await?;
        Ok(generate_variables(config, &resolution))
    }

    /// Resolve every config whose scope matches the context's scope and merge
    /// the resulting variable maps.
    pub async fn generate_variables_for_scope(
        &self,
        configs: &[VariableConfig],
        ctx: &AssignmentContext,
    ) -> Result<BTreeMap<String, String>> {
        let scope = ctx.scope();
        let mut variables = BTreeMap::new();
        for config in configs.iter().filter(|c| c.scope() == scope) {
            variables.extend(self.generate_variables(config, ctx).await?);
        }
        tracing::debug!(scope = %scope, count = variables.len(), "Generated variables for scope");
        Ok(variables)
    }

    /// Resolve every config, each at the scope it declares, and merge the maps.
    /// `ctx` must identify the participant when any config is participant-scoped.
    pub async fn generate_all_variables(
        &self,
        configs: &[VariableConfig],
        ctx: &AssignmentContext,
    ) -> Result<BTreeMap<String, String>> {
        let mut variables = BTreeMap::new();
        let scopes = [VariableScope::Experiment, VariableScope::Cohort, VariableScope::Participant];
        for scope in scopes {
            let Some(scoped) = narrow_context(ctx, scope) else {
                continue;
            };
            variables.extend(self.generate_variables_for_scope(configs, &scoped).await?);
        }
        Ok(variables)
    }
}

fn narrow_context(ctx: &AssignmentContext, scope: VariableScope) -> Option<AssignmentContext> {
    match scope {
        VariableScope::Experiment => Some(AssignmentContext::experiment(&ctx.experiment_id)),
        VariableScope::Cohort => ctx
            .cohort_id
            .as_ref()
            .map(|c| AssignmentContext::cohort(&ctx.experiment_id, c)),
        VariableScope::Participant => match (&ctx.cohort_id, &ctx.participant_id) {
            (Some(_), Some(_)) => Some(ctx.clone()),
            (None, Some(p)) => Some(AssignmentContext {
                experiment_id: ctx.experiment_id.clone(),
                cohort_id: None,
                participant_id: Some(p.clone()),
            }),
            _ => None,
        },
    }
}

// ---------------------------------------------------------------------------
// Pure strategies
// ---------------------------------------------------------------------------

/// The static value, or the cohort override when the context names a cohort
/// that has one. Malformed values fall back to the schema default.
pub fn resolve_static(config: &StaticVariableConfig, ctx: &AssignmentContext) -> Value {
    let raw = ctx
        .cohort_id
        .as_ref()
        .and_then(|cohort| config.cohort_values.get(cohort))
        .unwrap_or(&config.value);
    let schema = &config.definition.schema;
    deserialize(schema, raw, schema.default_value())
}

/// Identifier the permutation is seeded with. Missing ids seed with `""`.
pub fn seed_source<'a>(
    config: &'a RandomPermutationVariableConfig,
    ctx: &'a AssignmentContext,
) -> &'a str {
    match config.shuffle_config.seed {
        SeedStrategy::Experiment => &ctx.experiment_id,
        SeedStrategy::Cohort => ctx.cohort_or_empty(),
        SeedStrategy::Participant => ctx.participant_or_empty(),
        SeedStrategy::Custom => &config.shuffle_config.custom_seed,
    }
}

/// Seeded permutation of the pool, cut to `numToSelect` (clamped into
/// `[1, len]`). Unshuffled configs take the leading values in order.
pub fn resolve_permutation(
    config: &RandomPermutationVariableConfig,
    ctx: &AssignmentContext,
) -> Vec<Value> {
    let name = config.definition.name.as_str();
    let available = config.values.len();
    if available == 0 {
        tracing::warn!(variable = %name, "Random permutation has no values");
        return Vec::new();
    }

    let requested = config.num_to_select.unwrap_or(available);
    let count = requested.clamp(1, available);
    if count != requested {
        tracing::warn!(
            variable = %name,
            requested,
            available,
            using = count,
            "numToSelect out of range, clamping"
        );
    }

    let selected = if config.shuffle_config.shuffle {
        let seed = seed_source(config, ctx);
        SeededRng::from_seed_str(seed).choices(&config.values, count)
    } else {
        config.values[..count].to_vec()
    };

    let item_schema = config.definition.schema.item_schema();
    selected
        .iter()
        .map(|raw| deserialize(item_schema, raw, item_schema.default_value()))
        .collect()
}

/// Index of the candidate furthest behind its target share.
///
/// With `n` assignments made so far, candidate `i` is owed
/// `(n + 1) * w_i / W` after the next one; the pick maximises
/// `(n + 1) * w_i - c_i * W`. Equal weights reduce to "fewest assignments",
/// and ties go to the earliest candidate.
pub fn round_robin_pick(counts: &[u64], weights: Option<&[u32]>) -> usize {
    let weight = |i: usize| -> i128 {
        match weights {
            Some(w) if w.len() == counts.len() => i128::from(w[i]),
            _ => 1,
        }
    };
    let total_weight: i128 = (0..counts.len()).map(weight).sum();
    let next = i128::from(counts.iter().sum::<u64>()) + 1;

    let mut best = 0;
    let mut best_score = i128::MIN;
    for (i, &count) in counts.iter().enumerate() {
        let score = next * weight(i) - i128::from(count) * total_weight;
        if score > best_score {
            best = i;
            best_score = score;
        }
    }
    best
}

/// Values listed more than once, each reported once in order of first repeat.
///
/// Counts are kept per distinct value, so a repeated entry would share its
/// counter and the split would drift from the configured shares.
pub(crate) fn duplicate_values(values: &[String]) -> Vec<&str> {
    let mut seen = HashSet::new();
    let mut duplicates: Vec<&str> = Vec::new();
    for value in values {
        if !seen.insert(value.as_str()) && !duplicates.contains(&value.as_str()) {
            duplicates.push(value.as_str());
        }
    }
    duplicates
}

/// Reject configs that would silently mis-assign.
pub fn validate_balanced(config: &BalancedAssignmentVariableConfig) -> Result<()> {
    let name = &config.definition.name;
    if config.id.trim().is_empty() {
        return Err(DelibError::invalid_config(
            name,
            "balanced assignment needs a stable config id to key its counts",
        ));
    }
    if config.values.len() < 2 {
        return Err(DelibError::invalid_config(
            name,
            format!(
                "balanced assignment needs at least 2 values, found {}",
                config.values.len()
            ),
        ));
    }
    let duplicates = duplicate_values(&config.values);
    if !duplicates.is_empty() {
        return Err(DelibError::invalid_config(
            name,
            format!("duplicate values {}", duplicates.join(", ")),
        ));
    }
    if let Some(weights) = &config.weights {
        if weights.len() != config.values.len() {
            return Err(DelibError::invalid_config(
                name,
                format!(
                    "{} weights given for {} values",
                    weights.len(),
                    config.values.len()
                ),
            ));
        }
        if weights.iter().any(|&w| w == 0) {
            return Err(DelibError::invalid_config(name, "weights must be positive integers"));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Variable maps
// ---------------------------------------------------------------------------

/// `name -> serialised value` entries for a resolved config.
///
/// Expanded permutations produce `name_1..name_N`. Values that do not match
/// their schema are still emitted, with a warning.
pub fn generate_variables(
    config: &VariableConfig,
    resolution: &Resolution,
) -> BTreeMap<String, String> {
    let definition = config.definition();
    let name = definition.name.as_str();
    let mut variables = BTreeMap::new();

    match (config, resolution) {
        (VariableConfig::RandomPermutation(c), Resolution::List(items))
            if c.expand_to_separate_variables =>
        {
            let item_schema = definition.schema.item_schema();
            for (i, item) in items.iter().enumerate() {
                let indexed = format!("{name}_{}", i + 1);
                warn_if_invalid(item_schema, item, &indexed);
                variables.insert(indexed, item.to_string());
            }
        }
        (VariableConfig::BalancedAssignment(_), _) => {
            let value = resolution.to_value();
            warn_if_invalid(definition.schema.item_schema(), &value, name);
            variables.insert(name.to_string(), value.to_string());
        }
        _ => {
            let value = resolution.to_value();
            warn_if_invalid(&definition.schema, &value, name);
            variables.insert(name.to_string(), value.to_string());
        }
    }
    variables
}

fn warn_if_invalid(schema: &Schema, value: &Value, name: &str) {
    if let Err(errors) = validate_value(schema, value) {
        tracing::warn!(
            variable = %name,
            errors = %errors.join("; "),
            "Resolved value does not match schema"
        );
    }
}
