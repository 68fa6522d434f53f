//! # Run Storage Module
//!
//! The upsert store: idempotent repository and run writes, the bounded
//! per-repository run history, and the dashboard's read queries.
//!
//! All consistency decisions live behind [`RunStore`]; webhook handlers and
//! read handlers hold no locks of their own.

use crate::{
    RepoFullName, RepoKey, Repository, RepositoryAttrs, RunConclusion, RunId, WorkflowId,
    WorkflowRun, WorkflowRunRecord,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use thiserror::Error;

// ============================================================================
// Retention Constants
// ============================================================================

/// Maximum workflow runs retained per repository
///
/// The retention sweep deletes rows beyond this count, newest first by
/// `updatedAt`. Enforced on insert and by [`RunStore::cleanup_old_runs`];
/// between those points the count may transiently exceed the cap.
pub const MAX_RUNS_PER_REPO: usize = 10;

/// Runs fetched per repository when assembling the dashboard listing
const LISTING_FETCH_WINDOW: usize = 50;

/// Maximum runs shown per workflow group in the dashboard listing
///
/// A display window, distinct from [`MAX_RUNS_PER_REPO`]: with several
/// workflows in one repository the listing can show up to this many runs for
/// each of them.
const RUNS_PER_WORKFLOW_GROUP: usize = 10;

// ============================================================================
// Core Trait
// ============================================================================

/// Interface for run storage operations
///
/// Carries the webhook mutation surface, the dashboard read queries, and a
/// health probe. Implementations must be safe to share across concurrent
/// request handlers behind an `Arc`.
///
/// # Examples
///
/// ```no_run
/// use run_board_core::store::RunStore;
/// # async fn example(store: &dyn RunStore) -> Result<(), run_board_core::StoreError> {
/// let stats = store.dashboard_stats().await?;
/// println!("{} repositories tracked", stats.total_repositories);
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Create or update a repository row keyed by full name
    ///
    /// If no row exists for `attrs.full_name`, one is created and assigned a
    /// fresh [`RepoKey`]. If a row exists, its mutable attributes (owner,
    /// name, avatar, URL) are overwritten unconditionally with the incoming
    /// values. Last-write-wins, no conflict detection, no merge. Rows are
    /// never deleted.
    ///
    /// # Returns
    ///
    /// The key of the created or updated row.
    async fn upsert_repository(&self, attrs: RepositoryAttrs) -> Result<RepoKey, StoreError>;

    /// Create or update a workflow run row keyed by run id
    ///
    /// Resolves (or creates) the owning repository first, then looks up an
    /// existing run by `record.run_id`:
    ///
    /// - If found, every mutable field is overwritten in place. Status
    ///   progression is not validated; the newest delivery wins.
    /// - If not found, a new row is inserted and the retention sweep runs
    ///   for the owning repository, deleting rows beyond the newest
    ///   [`MAX_RUNS_PER_REPO`] by `updatedAt`.
    ///
    /// The sweep triggers only on insert. Updates cannot change the count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Inconsistency`] if the repository row cannot be
    /// resolved after its own upsert; the run write is aborted rather than
    /// proceeding with a dangling owner reference.
    async fn upsert_workflow_run(&self, record: WorkflowRunRecord) -> Result<RunId, StoreError>;

    /// Re-apply the retention invariant across every repository
    ///
    /// Idempotent maintenance sweep, safe to run on a schedule or on demand.
    /// Repairs any drift left by concurrent inserts that raced the per-insert
    /// sweep.
    async fn cleanup_old_runs(&self) -> Result<SweepReport, StoreError>;

    /// List every repository with its recent runs grouped by workflow
    ///
    /// For each repository the most recent 50 runs are grouped by workflow
    /// id, keeping the newest 10 runs per group. Groups are ordered by their
    /// own latest run's `updatedAt` descending; repositories are ordered by
    /// their latest group's latest run, repositories without runs last.
    async fn list_repositories_with_runs(
        &self,
    ) -> Result<Vec<RepositoryWithWorkflows>, StoreError>;

    /// Fetch a single repository and its most recent runs
    ///
    /// Returns `None` when no repository with that full name exists.
    async fn repository_with_runs(
        &self,
        full_name: &RepoFullName,
    ) -> Result<Option<RepositoryWithRuns>, StoreError>;

    /// Compute the dashboard summary counters
    ///
    /// Reduces all runs to one latest run per distinct repository full name
    /// (by maximum `updatedAt`), then counts those latest runs by outcome
    /// bucket. Recomputed in full on every call.
    async fn dashboard_stats(&self) -> Result<DashboardStats, StoreError>;

    /// List runs currently in the in-progress family
    ///
    /// The union of runs with status in {in_progress, queued, waiting}
    /// across all repositories, ordered by `updatedAt` descending.
    async fn in_progress_runs(&self) -> Result<Vec<WorkflowRun>, StoreError>;

    /// Check backend health
    async fn health_check(&self) -> Result<StoreHealth, StoreError>;
}

// ============================================================================
// Supporting Types
// ============================================================================

/// Runs of one workflow within a repository, newest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowGroup {
    pub workflow_id: WorkflowId,
    pub workflow_name: String,
    pub runs: Vec<WorkflowRun>,
}

/// One repository in the dashboard listing with its grouped runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryWithWorkflows {
    pub repository: Repository,
    pub workflows: Vec<WorkflowGroup>,
}

impl RepositoryWithWorkflows {
    /// `updatedAt` of the newest run in the newest workflow group
    ///
    /// Empty string when the repository has no runs, which sorts last under
    /// descending lexical order.
    fn latest_activity(&self) -> &str {
        self.workflows
            .first()
            .and_then(|group| group.runs.first())
            .map(|run| run.updated_at.as_str())
            .unwrap_or("")
    }
}

/// Single-repository view: the repository row plus its most recent runs
///
/// Serializes with the repository fields flattened at the top level, the
/// shape the dashboard's detail page consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryWithRuns {
    #[serde(flatten)]
    pub repository: Repository,
    pub runs: Vec<WorkflowRun>,
}

/// Dashboard summary counters
///
/// The outcome buckets count one latest run per repository; the totals count
/// raw rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_repositories: usize,
    pub total_runs: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub in_progress_count: usize,
    pub cancelled_count: usize,
}

/// Result of one maintenance sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    /// Repositories that held more runs than the retention cap
    pub repositories_swept: usize,
    /// Run rows deleted across all repositories
    pub runs_deleted: usize,
}

/// Point-in-time health report from a store adapter
#[derive(Debug, Clone)]
pub struct StoreHealth {
    /// Whether the backend can currently serve reads and writes
    pub healthy: bool,
    /// Adapter name for diagnostics
    pub backend: &'static str,
    /// Error detail when unhealthy
    pub error_message: Option<String>,
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store's own invariants do not hold
    ///
    /// Raised when a repository row cannot be resolved immediately after its
    /// own upsert. The affected request is aborted.
    #[error("Store consistency violation: {detail}")]
    Inconsistency { detail: String },

    /// A row could not be serialized or deserialized
    #[error("Serialization failed: {message}")]
    Serialization { message: String },

    /// An underlying I/O operation failed
    #[error("I/O failure at {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Internal store error
    #[error("Internal store error: {message}")]
    Internal { message: String },
}

impl StoreError {
    /// Check if error is transient and may succeed on redelivery
    ///
    /// I/O failures may clear up on their own; the remaining variants are
    /// deterministic for a given input and state.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io { .. })
    }

    /// Get error category for monitoring
    pub fn error_category(&self) -> crate::ErrorCategory {
        if self.is_transient() {
            crate::ErrorCategory::Transient
        } else {
            crate::ErrorCategory::Permanent
        }
    }
}

// ============================================================================
// Query Assembly
// ============================================================================
//
// Pure functions over row snapshots, shared by the adapters so that both
// back ends answer queries with identical ordering and windowing.

/// Descending `updatedAt` comparator
///
/// Timestamps are opaque ISO-8601 UTC strings whose lexical order equals
/// chronological order.
pub(crate) fn newest_first(a: &WorkflowRun, b: &WorkflowRun) -> Ordering {
    b.updated_at.cmp(&a.updated_at)
}

/// Identify run ids beyond the retention cap for one repository
///
/// Input need not be sorted. Returns the ids of every row past the newest
/// [`MAX_RUNS_PER_REPO`] by `updatedAt`.
pub(crate) fn excess_run_ids(mut repo_runs: Vec<&WorkflowRun>) -> Vec<RunId> {
    repo_runs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    repo_runs
        .into_iter()
        .skip(MAX_RUNS_PER_REPO)
        .map(|run| run.run_id)
        .collect()
}

/// Group a repository's runs by workflow id
///
/// `runs` must already be sorted newest first; each group inherits that
/// order and is capped at [`RUNS_PER_WORKFLOW_GROUP`]. The group's display
/// name comes from its newest run. Groups are returned ordered by their own
/// latest run's `updatedAt` descending.
pub(crate) fn group_runs_by_workflow(runs: Vec<WorkflowRun>) -> Vec<WorkflowGroup> {
    let mut groups: HashMap<WorkflowId, WorkflowGroup> = HashMap::new();

    for run in runs {
        match groups.get_mut(&run.workflow_id) {
            Some(group) => {
                if group.runs.len() < RUNS_PER_WORKFLOW_GROUP {
                    group.runs.push(run);
                }
            }
            None => {
                let workflow_id = run.workflow_id;
                let workflow_name = run.workflow_name.clone();
                groups.insert(
                    workflow_id,
                    WorkflowGroup {
                        workflow_id,
                        workflow_name,
                        runs: vec![run],
                    },
                );
            }
        }
    }

    let mut groups: Vec<WorkflowGroup> = groups.into_values().collect();
    groups.sort_by(|a, b| {
        let a_latest = a.runs.first().map(|r| r.updated_at.as_str()).unwrap_or("");
        let b_latest = b.runs.first().map(|r| r.updated_at.as_str()).unwrap_or("");
        b_latest.cmp(a_latest)
    });
    groups
}

/// Assemble the full dashboard listing from row snapshots
pub(crate) fn assemble_repository_listing(
    repositories: Vec<Repository>,
    all_runs: &[WorkflowRun],
) -> Vec<RepositoryWithWorkflows> {
    let mut listing: Vec<RepositoryWithWorkflows> = repositories
        .into_iter()
        .map(|repository| {
            let mut repo_runs: Vec<WorkflowRun> = all_runs
                .iter()
                .filter(|run| run.repository_key == repository.key)
                .cloned()
                .collect();
            repo_runs.sort_by(newest_first);
            repo_runs.truncate(LISTING_FETCH_WINDOW);

            RepositoryWithWorkflows {
                workflows: group_runs_by_workflow(repo_runs),
                repository,
            }
        })
        .collect();

    listing.sort_by(|a, b| b.latest_activity().cmp(a.latest_activity()));
    listing
}

/// Reduce run rows to the dashboard summary counters
///
/// One latest run per distinct repository full name, chosen by strictly
/// greater `updatedAt`, feeds the outcome buckets. A latest run counts as
/// in-progress by status and as success/failure/cancelled by conclusion.
pub(crate) fn reduce_dashboard_stats(
    repository_count: usize,
    all_runs: &[WorkflowRun],
) -> DashboardStats {
    let mut latest_by_repo: HashMap<&RepoFullName, &WorkflowRun> = HashMap::new();
    for run in all_runs {
        match latest_by_repo.get(&run.repository_full_name) {
            Some(existing) if run.updated_at <= existing.updated_at => {}
            _ => {
                latest_by_repo.insert(&run.repository_full_name, run);
            }
        }
    }

    let latest_runs: Vec<&WorkflowRun> = latest_by_repo.into_values().collect();

    DashboardStats {
        total_repositories: repository_count,
        total_runs: all_runs.len(),
        success_count: latest_runs
            .iter()
            .filter(|r| r.conclusion == Some(RunConclusion::Success))
            .count(),
        failure_count: latest_runs
            .iter()
            .filter(|r| r.conclusion == Some(RunConclusion::Failure))
            .count(),
        in_progress_count: latest_runs
            .iter()
            .filter(|r| r.status.is_in_progress_family())
            .count(),
        cancelled_count: latest_runs
            .iter()
            .filter(|r| r.conclusion == Some(RunConclusion::Cancelled))
            .count(),
    }
}

/// Collect in-progress-family runs, newest first
pub(crate) fn collect_in_progress(all_runs: &[WorkflowRun]) -> Vec<WorkflowRun> {
    let mut runs: Vec<WorkflowRun> = all_runs
        .iter()
        .filter(|run| run.status.is_in_progress_family())
        .cloned()
        .collect();
    runs.sort_by(newest_first);
    runs
}

// Storage adapters
mod filesystem;
mod memory;

pub use filesystem::FilesystemRunStore;
pub use memory::InMemoryRunStore;

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
