//! Typed experiment variables and their assignment.
//!
//! This crate implements the variable half of the deliberation engine: the
//! recursive value schema, the serialised value codec, seeded permutations,
//! balanced per-participant assignment over a pluggable counter store, the
//! `{{variable}}` template helpers, usage analysis and config lint rules.

pub mod assignment;
pub mod bundle;
pub mod codec;
pub mod config;
pub mod random;
pub mod retry;
pub mod schema;
pub mod store;
pub mod template;
pub mod usage;
pub mod validation;

pub use assignment::{
    generate_variables, resolve_permutation, resolve_static, round_robin_pick, seed_source,
    validate_balanced, Resolution, ResolverConfig, VariableResolver,
};
pub use bundle::ExperimentBundle;
pub use codec::{
    conforms, deserialize, format_input, parse_input, rename_property_in_value,
    reset_value_for_schema_change, safe_parse_json, serialize, set_value_at_path, validate_value,
};
pub use config::{
    extract_variable_definitions, sanitize_variable_name, BalanceAcross, BalanceStrategy,
    BalancedAssignmentVariableConfig, RandomPermutationVariableConfig, SeedStrategy, ShuffleConfig,
    StaticVariableConfig, VariableConfig, VariableDefinition,
};
pub use random::{hash_seed, SeededRng};
pub use retry::{execute_with_retry, BackoffPolicy};
pub use schema::{Properties, Schema, SchemaKind};
pub use store::{AssignmentStore, ChooseFn, InMemoryAssignmentStore, PartitionKey, StoredAssignment};
pub use template::{extract_variable_references, missing_template_variables, render_template};
pub use usage::find_unused_variables;
pub use validation::{validate_configs, validate_configs_or_raise, LintInput, LintRule};
