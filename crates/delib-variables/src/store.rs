//! Assignment store: the shared counters behind balanced assignment.
//!
//! Real deployments back this with a transactional database. The engine only
//! needs one atomic operation: look up the participant's previous assignment
//! or, failing that, read the partition's counts, let the caller pick a
//! candidate, increment it and record the choice.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use delib_types::{DelibError, Result};

/// Counters are kept per config and per partition (experiment or cohort id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionKey {
    pub config_id: String,
    pub partition: String,
}

impl PartitionKey {
    pub fn new(config_id: impl Into<String>, partition: impl Into<String>) -> Self {
        Self {
            config_id: config_id.into(),
            partition: partition.into(),
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.config_id, self.partition)
    }
}

/// Outcome of [`AssignmentStore::assign`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAssignment {
    /// Serialised candidate value.
    pub value: String,
    /// Counts per candidate after the operation, aligned with the candidates.
    pub counts: Vec<u64>,
    /// `true` when the participant already had this assignment.
    pub reused: bool,
    pub assigned_at: DateTime<Utc>,
}

/// Picks a candidate index from the current per-candidate counts.
pub type ChooseFn<'a> = dyn Fn(&[u64]) -> usize + Send + Sync + 'a;

#[async_trait]
pub trait AssignmentStore: Send + Sync {
    /// Return the participant's recorded assignment for `key`, or atomically
    /// choose one with `choose`, increment its counter and record it.
    async fn assign(
        &self,
        key: &PartitionKey,
        participant_id: &str,
        candidates: &[String],
        choose: &ChooseFn<'_>,
    ) -> Result<StoredAssignment>;

    /// Current counts for `candidates` in a partition.
    async fn counts(&self, key: &PartitionKey, candidates: &[String]) -> Result<Vec<u64>>;
}

#[derive(Debug, Default)]
struct PartitionState {
    counts: HashMap<String, u64>,
    assignments: HashMap<String, (String, DateTime<Utc>)>,
}

impl PartitionState {
    fn counts_for(&self, candidates: &[String]) -> Vec<u64> {
        candidates
            .iter()
            .map(|c| self.counts.get(c).copied().unwrap_or(0))
            .collect()
    }
}

/// Process-local store; one lock serialises every read-decide-increment.
#[derive(Debug, Default)]
pub struct InMemoryAssignmentStore {
    partitions: Mutex<HashMap<PartitionKey, PartitionState>>,
}

impl InMemoryAssignmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The value recorded for a participant, if any.
    pub async fn assignment_for(&self, key: &PartitionKey, participant_id: &str) -> Option<String> {
        let partitions = self.partitions.lock().await;
        partitions
            .get(key)
            .and_then(|p| p.assignments.get(participant_id))
            .map(|(value, _)| value.clone())
    }
}

#[async_trait]
impl AssignmentStore for InMemoryAssignmentStore {
    async fn assign(
        &self,
        key: &PartitionKey,
        participant_id: &str,
        candidates: &[String],
        choose: &ChooseFn<'_>,
    ) -> Result<StoredAssignment> {
        let mut partitions = self.partitions.lock().await;
        let state = partitions.entry(key.clone()).or_default();

        if let Some((value, at)) = state.assignments.get(participant_id) {
            return Ok(StoredAssignment {
                value: value.clone(),
                counts: state.counts_for(candidates),
                reused: true,
                assigned_at: *at,
            });
        }

        let idx = choose(&state.counts_for(candidates));
        let value = candidates.get(idx).cloned().ok_or_else(|| {
            DelibError::Other(format!(
                "candidate index {idx} out of range for partition '{key}' ({} candidates)",
                candidates.len()
            ))
        })?;

        let now = Utc::now();
        *state.counts.entry(value.clone()).or_insert(0) += 1;
        state
            .assignments
            .insert(participant_id.to_string(), (value.clone(), now));

        Ok(StoredAssignment {
            value,
            counts: state.counts_for(candidates),
            reused: false,
            assigned_at: now,
        })
    }

    async fn counts(&self, key: &PartitionKey, candidates: &[String]) -> Result<Vec<u64>> {
        let partitions = self.partitions.lock().await;
        Ok(partitions
            .get(key)
            .map(|p| p.counts_for(candidates))
            .unwrap_or_else(|| vec![0; candidates.len()]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn candidates() -> Vec<String> {
        vec!["\"X\"".into(), "\"Y\"".into()]
    }

    fn fewest(counts: &[u64]) -> usize {
        counts
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| **c)
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn assigns_and_counts() {
        let store = InMemoryAssignmentStore::new();
        let key = PartitionKey::new("cfg", "exp-1");

        let first = store.assign(&key, "p1", &candidates(), &fewest).await.unwrap();
        assert_eq!(first.value, "\"X\"");
        assert_eq!(first.counts, vec![1, 0]);
        assert!(!first.reused);

        let second = store.assign(&key, "p2", &candidates(), &fewest).await.unwrap();
        assert_eq!(second.value, "\"Y\"");
        assert_eq!(store.counts(&key, &candidates()).await.unwrap(), vec![1, 1]);
    }

    #[tokio::test]
    async fn repeat_participant_reuses_without_increment() {
        let store = InMemoryAssignmentStore::new();
        let key = PartitionKey::new("cfg", "exp-1");

        let first = store.assign(&key, "p1", &candidates(), &fewest).await.unwrap();
        let again = store.assign(&key, "p1", &candidates(), &|_: &[u64]| 1).await.unwrap();
        assert_eq!(again.value, first.value);
        assert!(again.reused);
        assert_eq!(again.counts, vec![1, 0]);
        assert_eq!(again.assigned_at, first.assigned_at);
        assert_eq!(
            store.assignment_for(&key, "p1").await.as_deref(),
            Some("\"X\"")
        );
    }

    #[tokio::test]
    async fn partitions_are_independent() {
        let store = InMemoryAssignmentStore::new();
        let a = PartitionKey::new("cfg", "cohort-a");
        let b = PartitionKey::new("cfg", "cohort-b");

        store.assign(&a, "p1", &candidates(), &fewest).await.unwrap();
        let in_b = store.assign(&b, "p2", &candidates(), &fewest).await.unwrap();
        assert_eq!(in_b.value, "\"X\"");
        assert_eq!(store.counts(&b, &candidates()).await.unwrap(), vec![1, 0]);
    }

    #[tokio::test]
    async fn out_of_range_choice_is_an_error() {
        let store = InMemoryAssignmentStore::new();
        let key = PartitionKey::new("cfg", "exp-1");
        let err = store.assign(&key, "p1", &candidates(), &|_: &[u64]| 9).await.unwrap_err();
        assert!(err.to_string().contains("out of range"));
        assert_eq!(store.counts(&key, &candidates()).await.unwrap(), vec![0, 0]);
    }

    #[tokio::test]
    async fn concurrent_assignments_stay_balanced() {
        let store = Arc::new(InMemoryAssignmentStore::new());
        let key = PartitionKey::new("cfg", "exp-1");

        let mut handles = Vec::new();
        for i in 0..40 {
            let store = store.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                store
                    .assign(&key, &format!("p{i}"), &candidates(), &fewest)
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.counts(&key, &candidates()).await.unwrap(), vec![20, 20]);
    }
}
