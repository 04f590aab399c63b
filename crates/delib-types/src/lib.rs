//! Types shared by the delib crates: the [`DelibError`] taxonomy, the
//! [`VariableScope`] a value is shared at, the [`AssignmentContext`]
//! identifying who a value is resolved for, and the [`Diagnostic`] findings
//! produced by variable and condition lint.

use serde::{Deserialize, Serialize};

/// Unified error type for all delib subsystems.
#[derive(Debug, thiserror::Error)]
pub enum DelibError {
    // === Configuration Errors ===
    #[error("Invalid configuration for variable '{variable}': {message}")]
    InvalidConfig { variable: String, message: String },

    #[error("Variable '{variable}' requires a {field} in the assignment context")]
    MissingContext { variable: String, field: String },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Variable validation failed: {0}")]
    ValidationError(String),

    // === Assignment Store Errors ===
    #[error("Assignment store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[error("Assignment store conflict on partition '{partition}'")]
    StoreConflict { partition: String },

    #[error("Assignment store still failing after {attempts} attempts")]
    RetriesExhausted { attempts: usize },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl DelibError {
    /// Returns `true` if the error is transient and the operation may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DelibError::StoreUnavailable { .. } | DelibError::StoreConflict { .. }
        )
    }

    /// Returns `true` if the error is permanent and retrying will not help.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DelibError::InvalidConfig { .. }
                | DelibError::MissingContext { .. }
                | DelibError::Schema(_)
                | DelibError::ValidationError(_)
        )
    }

    /// Shorthand for an [`InvalidConfig`](DelibError::InvalidConfig) error.
    pub fn invalid_config(variable: impl Into<String>, message: impl Into<String>) -> Self {
        DelibError::InvalidConfig {
            variable: variable.into(),
            message: message.into(),
        }
    }
}

/// A convenience alias for `Result<T, DelibError>`.
pub type Result<T> = std::result::Result<T, DelibError>;

// ---------------------------------------------------------------------------
// VariableScope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableScope {
    Experiment,
    Cohort,
    Participant,
}

impl std::fmt::Display for VariableScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VariableScope::Experiment => "experiment",
            VariableScope::Cohort => "cohort",
            VariableScope::Participant => "participant",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// AssignmentContext
// ---------------------------------------------------------------------------

/// Identifiers for the experiment, cohort and participant a variable is
/// being resolved for.
///
/// Experiment-level resolution carries only the experiment id; cohort-level
/// adds the cohort; participant-level carries all three.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentContext {
    pub experiment_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cohort_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,
}

impl AssignmentContext {
    /// Context for experiment-wide resolution.
    pub fn experiment(experiment_id: impl Into<String>) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            cohort_id: None,
            participant_id: None,
        }
    }

    /// Context for cohort-wide resolution.
    pub fn cohort(experiment_id: impl Into<String>, cohort_id: impl Into<String>) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            cohort_id: Some(cohort_id.into()),
            participant_id: None,
        }
    }

    /// Context for a single participant.
    pub fn participant(
        experiment_id: impl Into<String>,
        cohort_id: impl Into<String>,
        participant_id: impl Into<String>,
    ) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            cohort_id: Some(cohort_id.into()),
            participant_id: Some(participant_id.into()),
        }
    }

    /// The most specific scope this context identifies.
    pub fn scope(&self) -> VariableScope {
        if self.participant_id.is_some() {
            VariableScope::Participant
        } else if self.cohort_id.is_some() {
            VariableScope::Cohort
        } else {
            VariableScope::Experiment
        }
    }

    /// Cohort id, or an empty string when resolving above cohort level.
    pub fn cohort_or_empty(&self) -> &str {
        self.cohort_id.as_deref().unwrap_or("")
    }

    /// Participant id, or an empty string when resolving above participant level.
    pub fn participant_or_empty(&self) -> &str {
        self.participant_id.as_deref().unwrap_or("")
    }
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    /// Variable name or condition target the finding is about.
    pub subject: Option<String>,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Error => "ERROR",
            Severity::Warning => "WARN",
            Severity::Info => "INFO",
        };
        f.write_str(s)
    }
}

/// Fail with a [`ValidationError`](DelibError::ValidationError) joining every
/// `Error`-severity message; otherwise hand the diagnostics back.
pub fn raise_on_errors(diagnostics: Vec<Diagnostic>) -> Result<Vec<Diagnostic>> {
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .map(|d| d.message.clone())
        .collect();
    if !errors.is_empty() {
        return Err(DelibError::ValidationError(errors.join("; ")));
    }
    Ok(diagnostics)
}
