//! CLI binary for checking and previewing experiment variables and conditions.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde_json::Value;

use delib_conditions::{
    condition_target_key, evaluate_condition, extract_dependencies, Condition, TargetValues,
};
use delib_types::{AssignmentContext, Severity};
use delib_variables::{validate_configs, ExperimentBundle, VariableConfig, VariableResolver};

#[derive(Parser)]
#[command(
    name = "delib",
    version,
    about = "Experiment variable and condition tooling for group deliberation studies"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the variables of an experiment bundle and print them as JSON
    Resolve {
        /// Path to the experiment bundle .json file
        bundle: PathBuf,

        #[arg(long)]
        experiment: String,

        #[arg(long)]
        cohort: Option<String>,

        /// Needed when the bundle has balanced assignments
        #[arg(long)]
        participant: Option<String>,
    },

    /// Lint variable configs and report variables the content never uses
    Check {
        /// Path to the experiment bundle .json file
        bundle: PathBuf,
    },

    /// Evaluate a condition against recorded answers
    Evaluate {
        /// Path to the condition .json file
        condition: PathBuf,

        /// Answers keyed by "stageId::questionId"
        #[arg(long)]
        answers: PathBuf,

        /// Answer lists for aggregation conditions, keyed like --answers
        #[arg(long)]
        all_answers: Option<PathBuf>,
    },

    /// Assign many participants and show how balanced variables split
    Simulate {
        /// Path to the experiment bundle .json file
        bundle: PathBuf,

        #[arg(long, default_value = "sim-experiment")]
        experiment: String,

        #[arg(long)]
        cohort: Option<String>,

        /// Number of participants to assign
        #[arg(short = 'n', long, default_value = "100")]
        participants: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Resolve {
            bundle,
            experiment,
            cohort,
            participant,
        } => {
            let ctx = AssignmentContext {
                experiment_id: experiment,
                cohort_id: cohort,
                participant_id: participant,
            };
            cmd_resolve(&bundle, &ctx).await?;
        }
        Commands::Check { bundle } => {
            cmd_check(&bundle).await?;
        }
        Commands::Evaluate {
            condition,
            answers,
            all_answers,
        } => {
            cmd_evaluate(&condition, &answers, all_answers.as_deref()).await?;
        }
        Commands::Simulate {
            bundle,
            experiment,
            cohort,
            participants,
        } => {
            cmd_simulate(&bundle, &experiment, cohort.as_deref(), participants).await?;
        }
    }

    Ok(())
}

async fn load_bundle(path: &Path) -> anyhow::Result<ExperimentBundle> {
    ExperimentBundle::load(path)
        .await
        .with_context(|| format!("failed to load bundle {}", path.display()))
}

async fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid JSON in {}", path.display()))
}

async fn cmd_resolve(path: &Path, ctx: &AssignmentContext) -> anyhow::Result<()> {
    let bundle = load_bundle(path).await?;
    let resolver = VariableResolver::in_memory();
    let variables = resolver
        .generate_all_variables(&bundle.variable_configs, ctx)
        .await?;
    println!("{}", serde_json::to_string_pretty(&variables)?);
    Ok(())
}

async fn cmd_check(path: &Path) -> anyhow::Result<()> {
    let bundle = load_bundle(path).await?;
    let content = bundle.content_text();
    let diagnostics = validate_configs(&bundle.variable_configs, Some(&content));

    if diagnostics.is_empty() {
        println!(
            "{} variable config(s) are valid",
            bundle.variable_configs.len()
        );
        return Ok(());
    }

    let mut has_error = false;
    for diag in &diagnostics {
        has_error |= diag.severity == Severity::Error;
        match &diag.subject {
            Some(subject) => println!(
                "[{}] {} ({}): {}",
                diag.severity, diag.rule, subject, diag.message
            ),
            None => println!("[{}] {}: {}", diag.severity, diag.rule, diag.message),
        }
        if let Some(fix) = &diag.fix {
            println!("    fix: {fix}");
        }
    }

    if has_error {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_evaluate(
    condition: &Path,
    answers: &Path,
    all_answers: Option<&Path>,
) -> anyhow::Result<()> {
    let condition: Condition = load_json(condition).await?;
    let values: HashMap<String, Value> = load_json(answers).await?;
    let all_values: HashMap<String, Vec<Value>> = match all_answers {
        Some(path) => load_json(path).await?,
        None => HashMap::new(),
    };
    let lookup = TargetValues { values, all_values };

    for dep in extract_dependencies(Some(&condition)) {
        let key = condition_target_key(&dep);
        if !lookup.values.contains_key(&key) && !lookup.all_values.contains_key(&key) {
            tracing::info!(target_key = %key, "No answer recorded");
        }
    }

    let passes = evaluate_condition(Some(&condition), &lookup);
    println!("{condition}");
    println!("{}", if passes { "PASS" } else { "FAIL" });
    Ok(())
}

async fn cmd_simulate(
    path: &Path,
    experiment: &str,
    cohort: Option<&str>,
    participants: usize,
) -> anyhow::Result<()> {
    let bundle = load_bundle(path).await?;
    let balanced: Vec<&str> = bundle
        .variable_configs
        .iter()
        .filter(|c| matches!(c, VariableConfig::BalancedAssignment(_)))
        .map(VariableConfig::name)
        .collect();
    if balanced.is_empty() {
        println!("Bundle has no balanced assignment variables");
        return Ok(());
    }

    let resolver = VariableResolver::in_memory();
    let mut tallies: BTreeMap<&str, BTreeMap<String, usize>> = BTreeMap::new();
    for i in 1..=participants {
        let ctx = AssignmentContext {
            experiment_id: experiment.to_string(),
            cohort_id: cohort.map(str::to_string),
            participant_id: Some(format!("participant-{i}")),
        };
        let variables = resolver
            .generate_all_variables(&bundle.variable_configs, &ctx)
            .await?;
        for name in &balanced {
            if let Some(value) = variables.get(*name) {
                *tallies.entry(*name).or_default().entry(value.clone()).or_default() += 1;
            }
        }
    }

    println!("Participants: {participants}");
    for (name, counts) in &tallies {
        println!("\n{name}:");
        for (value, count) in counts {
            let share = *count as f64 * 100.0 / participants as f64;
            println!("  {value:<30} {count:>6}  ({share:.1}%)");
        }
    }
    Ok(())
}
