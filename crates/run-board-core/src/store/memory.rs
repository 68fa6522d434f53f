//! # In-Memory Run Store
//!
//! Thread-safe in-memory implementation of [`RunStore`] for development and
//! testing.

use super::{
    assemble_repository_listing, collect_in_progress, excess_run_ids, newest_first,
    reduce_dashboard_stats, DashboardStats, RepositoryWithRuns, RepositoryWithWorkflows, RunStore,
    StoreError, StoreHealth, SweepReport, MAX_RUNS_PER_REPO,
};
use crate::{RepoFullName, RepoKey, Repository, RepositoryAttrs, RunId, WorkflowRun, WorkflowRunRecord};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

/// In-memory run store backed by hash maps
///
/// Uses RwLock for concurrent access with minimal contention. Cloning is
/// cheap and clones share the same underlying tables, which lets tests keep
/// a concrete handle next to the `Arc<dyn RunStore>` given to the pipeline.
///
/// Each trait method acquires the locks it needs for its own duration; the
/// insert-and-sweep sequence of one upsert runs under a single write lock,
/// so this adapter never leaves a repository over the retention cap.
#[derive(Clone, Default)]
pub struct InMemoryRunStore {
    repositories: Arc<RwLock<HashMap<RepoFullName, Repository>>>,
    runs: Arc<RwLock<HashMap<RunId, WorkflowRun>>>,
}

impl InMemoryRunStore {
    /// Create new empty store
    pub fn new() -> Self {
        Self {
            repositories: Arc::new(RwLock::new(HashMap::new())),
            runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of repository rows currently held
    pub fn repository_count(&self) -> usize {
        self.repositories.read().unwrap().len()
    }

    /// Number of run rows currently held
    pub fn run_count(&self) -> usize {
        self.runs.read().unwrap().len()
    }

    /// Fetch one run row by id
    pub fn get_run(&self, run_id: RunId) -> Option<WorkflowRun> {
        self.runs.read().unwrap().get(&run_id).cloned()
    }

    /// Fetch one repository row by full name
    pub fn get_repository(&self, full_name: &RepoFullName) -> Option<Repository> {
        self.repositories.read().unwrap().get(full_name).cloned()
    }

    /// Create or update a repository row, returning its key
    fn upsert_repository_row(&self, attrs: RepositoryAttrs) -> RepoKey {
        let mut repositories = self.repositories.write().unwrap();
        match repositories.get_mut(&attrs.full_name) {
            Some(existing) => {
                existing.apply_attrs(attrs);
                existing.key
            }
            None => {
                let key = RepoKey::new();
                let full_name = attrs.full_name.clone();
                repositories.insert(full_name, Repository::from_attrs(key, attrs));
                key
            }
        }
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn upsert_repository(&self, attrs: RepositoryAttrs) -> Result<RepoKey, StoreError> {
        Ok(self.upsert_repository_row(attrs))
    }

    async fn upsert_workflow_run(&self, record: WorkflowRunRecord) -> Result<RunId, StoreError> {
        let full_name = record.repository.full_name.clone();
        let repository_key = self.upsert_repository_row(record.repository.clone());

        // The run row carries the repository key as its owner reference;
        // a key that does not resolve would corrupt the run table.
        if !self.repositories.read().unwrap().contains_key(&full_name) {
            return Err(StoreError::Inconsistency {
                detail: format!("repository {} not resolvable after upsert", full_name),
            });
        }

        let run_id = record.run_id;
        let mut runs = self.runs.write().unwrap();
        let inserted = !runs.contains_key(&run_id);
        runs.insert(run_id, record.into_run(repository_key));

        // Retention sweep only on insert; an update cannot change the count.
        if inserted {
            let excess = excess_run_ids(
                runs.values()
                    .filter(|run| run.repository_key == repository_key)
                    .collect(),
            );
            for stale_id in excess {
                runs.remove(&stale_id);
            }
        }

        Ok(run_id)
    }

    async fn cleanup_old_runs(&self) -> Result<SweepReport, StoreError> {
        let keys: Vec<RepoKey> = self
            .repositories
            .read()
            .unwrap()
            .values()
            .map(|repository| repository.key)
            .collect();

        let mut report = SweepReport::default();
        let mut runs = self.runs.write().unwrap();
        for key in keys {
            let excess = excess_run_ids(
                runs.values()
                    .filter(|run| run.repository_key == key)
                    .collect(),
            );
            if excess.is_empty() {
                continue;
            }
            report.repositories_swept += 1;
            for stale_id in excess {
                runs.remove(&stale_id);
                report.runs_deleted += 1;
            }
        }

        Ok(report)
    }

    async fn list_repositories_with_runs(
        &self,
    ) -> Result<Vec<RepositoryWithWorkflows>, StoreError> {
        let repositories: Vec<Repository> =
            self.repositories.read().unwrap().values().cloned().collect();
        let all_runs: Vec<WorkflowRun> = self.runs.read().unwrap().values().cloned().collect();

        Ok(assemble_repository_listing(repositories, &all_runs))
    }

    async fn repository_with_runs(
        &self,
        full_name: &RepoFullName,
    ) -> Result<Option<RepositoryWithRuns>, StoreError> {
        let Some(repository) = self.repositories.read().unwrap().get(full_name).cloned() else {
            return Ok(None);
        };

        let mut runs: Vec<WorkflowRun> = self
            .runs
            .read()
            .unwrap()
            .values()
            .filter(|run| run.repository_key == repository.key)
            .cloned()
            .collect();
        runs.sort_by(newest_first);
        runs.truncate(MAX_RUNS_PER_REPO);

        Ok(Some(RepositoryWithRuns { repository, runs }))
    }

    async fn dashboard_stats(&self) -> Result<DashboardStats, StoreError> {
        let repository_count = self.repositories.read().unwrap().len();
        let all_runs: Vec<WorkflowRun> = self.runs.read().unwrap().values().cloned().collect();

        Ok(reduce_dashboard_stats(repository_count, &all_runs))
    }

    async fn in_progress_runs(&self) -> Result<Vec<WorkflowRun>, StoreError> {
        let all_runs: Vec<WorkflowRun> = self.runs.read().unwrap().values().cloned().collect();

        Ok(collect_in_progress(&all_runs))
    }

    async fn health_check(&self) -> Result<StoreHealth, StoreError> {
        Ok(StoreHealth {
            healthy: true,
            backend: "memory",
            error_message: None,
        })
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
