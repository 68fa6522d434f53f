//! Tests for the in-memory run store.

use super::*;
use crate::{RunConclusion, RunStatus, WorkflowId};

// ============================================================================
// Helpers
// ============================================================================

fn repo_attrs(full_name: &str) -> RepositoryAttrs {
    let full_name = RepoFullName::new(full_name).unwrap();
    RepositoryAttrs {
        owner: full_name.owner().to_string(),
        name: full_name.name().to_string(),
        avatar_url: Some("https://avatars.githubusercontent.com/u/1".to_string()),
        html_url: format!("https://github.com/{}", full_name),
        full_name,
    }
}

fn sample_record(run_id: u64, full_name: &str, updated_at: &str) -> WorkflowRunRecord {
    WorkflowRunRecord {
        run_id: RunId::new(run_id),
        run_number: run_id,
        run_attempt: 1,
        workflow_id: WorkflowId::new(9001),
        workflow_name: "CI".to_string(),
        display_title: format!("Run {}", run_id),
        status: RunStatus::Completed,
        conclusion: Some(RunConclusion::Success),
        head_branch: "main".to_string(),
        head_sha: "d6fde92930d4715a2b49857d24b940956b26d2d3".to_string(),
        event: "push".to_string(),
        actor_login: "octocat".to_string(),
        actor_avatar_url: None,
        created_at: "2026-08-20T09:00:00Z".to_string(),
        updated_at: updated_at.to_string(),
        run_started_at: None,
        html_url: format!("https://github.com/{}/actions/runs/{}", full_name, run_id),
        repository: repo_attrs(full_name),
    }
}

fn ts(minute: u64) -> String {
    format!("2026-08-20T10:{:02}:00Z", minute)
}

// ============================================================================
// Repository upsert tests
// ============================================================================

#[tokio::test]
async fn test_upsert_repository_creates_row() {
    let store = InMemoryRunStore::new();

    let key = store
        .upsert_repository(repo_attrs("octocat/alpha"))
        .await
        .unwrap();

    assert_eq!(store.repository_count(), 1);
    let row = store
        .get_repository(&RepoFullName::new("octocat/alpha").unwrap())
        .unwrap();
    assert_eq!(row.key, key);
    assert_eq!(row.owner, "octocat");
    assert_eq!(row.name, "alpha");
}

/// A second upsert for the same full name reuses the existing key.
#[tokio::test]
async fn test_upsert_repository_key_is_stable() {
    let store = InMemoryRunStore::new();

    let first = store
        .upsert_repository(repo_attrs("octocat/alpha"))
        .await
        .unwrap();
    let second = store
        .upsert_repository(repo_attrs("octocat/alpha"))
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(store.repository_count(), 1);
}

/// Mutable attributes are overwritten last-write-wins.
#[tokio::test]
async fn test_upsert_repository_overwrites_attrs() {
    let store = InMemoryRunStore::new();
    let full_name = RepoFullName::new("octocat/alpha").unwrap();

    let key = store
        .upsert_repository(repo_attrs("octocat/alpha"))
        .await
        .unwrap();

    let mut updated = repo_attrs("octocat/alpha");
    updated.avatar_url = Some("https://example.com/new-avatar.png".to_string());
    updated.html_url = "https://example.com/octocat/alpha".to_string();
    store.upsert_repository(updated).await.unwrap();

    let row = store.get_repository(&full_name).unwrap();
    assert_eq!(row.key, key);
    assert_eq!(
        row.avatar_url.as_deref(),
        Some("https://example.com/new-avatar.png")
    );
    assert_eq!(row.html_url, "https://example.com/octocat/alpha");
}

// ============================================================================
// Run upsert tests
// ============================================================================

#[tokio::test]
async fn test_upsert_run_creates_repository_and_run() {
    let store = InMemoryRunStore::new();

    let run_id = store
        .upsert_workflow_run(sample_record(1, "octocat/alpha", &ts(1)))
        .await
        .unwrap();

    assert_eq!(run_id, RunId::new(1));
    assert_eq!(store.repository_count(), 1);
    assert_eq!(store.run_count(), 1);

    let repository = store
        .get_repository(&RepoFullName::new("octocat/alpha").unwrap())
        .unwrap();
    let run = store.get_run(RunId::new(1)).unwrap();
    assert_eq!(run.repository_key, repository.key);
    assert_eq!(run.repository_full_name.as_str(), "octocat/alpha");
}

/// Redelivery with the same run id overwrites the row in place.
#[tokio::test]
async fn test_upsert_same_run_updates_in_place() {
    let store = InMemoryRunStore::new();

    let mut queued = sample_record(1, "octocat/alpha", &ts(1));
    queued.status = RunStatus::Queued;
    queued.conclusion = None;
    store.upsert_workflow_run(queued).await.unwrap();

    store
        .upsert_workflow_run(sample_record(1, "octocat/alpha", &ts(2)))
        .await
        .unwrap();

    assert_eq!(store.run_count(), 1);
    let run = store.get_run(RunId::new(1)).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.conclusion, Some(RunConclusion::Success));
    assert_eq!(run.updated_at, ts(2));
}

// ============================================================================
// Retention tests
// ============================================================================

/// Inserting past the cap deletes the oldest rows by `updatedAt`.
#[tokio::test]
async fn test_retention_cap_enforced_on_insert() {
    let store = InMemoryRunStore::new();

    for i in 1..=12 {
        store
            .upsert_workflow_run(sample_record(i, "octocat/alpha", &ts(i)))
            .await
            .unwrap();
    }

    assert_eq!(store.run_count(), MAX_RUNS_PER_REPO);
    assert!(store.get_run(RunId::new(1)).is_none());
    assert!(store.get_run(RunId::new(2)).is_none());
    assert!(store.get_run(RunId::new(3)).is_some());
    assert!(store.get_run(RunId::new(12)).is_some());
}

/// Updates never delete rows, even with the repository at the cap.
#[tokio::test]
async fn test_update_at_cap_deletes_nothing() {
    let store = InMemoryRunStore::new();

    for i in 1..=10 {
        store
            .upsert_workflow_run(sample_record(i, "octocat/alpha", &ts(i)))
            .await
            .unwrap();
    }

    store
        .upsert_workflow_run(sample_record(5, "octocat/alpha", &ts(20)))
        .await
        .unwrap();

    assert_eq!(store.run_count(), 10);
    assert!(store.get_run(RunId::new(1)).is_some());
}

/// The cap applies per repository, not store-wide.
#[tokio::test]
async fn test_retention_is_per_repository() {
    let store = InMemoryRunStore::new();

    for i in 1..=12 {
        store
            .upsert_workflow_run(sample_record(i, "octocat/alpha", &ts(i)))
            .await
            .unwrap();
    }
    for i in 100..=102 {
        store
            .upsert_workflow_run(sample_record(i, "octocat/beta", &ts(i - 100 + 30)))
            .await
            .unwrap();
    }

    let alpha = store
        .repository_with_runs(&RepoFullName::new("octocat/alpha").unwrap())
        .await
        .unwrap()
        .unwrap();
    let beta = store
        .repository_with_runs(&RepoFullName::new("octocat/beta").unwrap())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(alpha.runs.len(), 10);
    assert_eq!(beta.runs.len(), 3);
    assert_eq!(store.run_count(), 13);
}

// ============================================================================
// Maintenance sweep tests
// ============================================================================

#[tokio::test]
async fn test_cleanup_noop_on_conformant_store() {
    let store = InMemoryRunStore::new();

    for i in 1..=5 {
        store
            .upsert_workflow_run(sample_record(i, "octocat/alpha", &ts(i)))
            .await
            .unwrap();
    }

    let report = store.cleanup_old_runs().await.unwrap();

    assert_eq!(report.repositories_swept, 0);
    assert_eq!(report.runs_deleted, 0);
    assert_eq!(store.run_count(), 5);
}

/// The sweep repairs a store that drifted past the cap.
#[tokio::test]
async fn test_cleanup_repairs_drift() {
    let store = InMemoryRunStore::new();
    let key = store
        .upsert_repository(repo_attrs("octocat/alpha"))
        .await
        .unwrap();

    // Plant excess rows directly, simulating racing inserts that skipped
    // each other's sweep.
    {
        let mut runs = store.runs.write().unwrap();
        for i in 1..=13 {
            let run = sample_record(i, "octocat/alpha", &ts(i)).into_run(key);
            runs.insert(run.run_id, run);
        }
    }

    let report = store.cleanup_old_runs().await.unwrap();

    assert_eq!(report.repositories_swept, 1);
    assert_eq!(report.runs_deleted, 3);
    assert_eq!(store.run_count(), MAX_RUNS_PER_REPO);
    assert!(store.get_run(RunId::new(3)).is_none());
    assert!(store.get_run(RunId::new(4)).is_some());
}

// ============================================================================
// Read query tests
// ============================================================================

#[tokio::test]
async fn test_repository_with_runs_unknown_returns_none() {
    let store = InMemoryRunStore::new();

    let result = store
        .repository_with_runs(&RepoFullName::new("octocat/missing").unwrap())
        .await
        .unwrap();

    assert!(result.is_none());
}

#[tokio::test]
async fn test_repository_with_runs_sorted_newest_first() {
    let store = InMemoryRunStore::new();

    for i in [3, 1, 2] {
        store
            .upsert_workflow_run(sample_record(i, "octocat/alpha", &ts(i)))
            .await
            .unwrap();
    }

    let view = store
        .repository_with_runs(&RepoFullName::new("octocat/alpha").unwrap())
        .await
        .unwrap()
        .unwrap();

    let ids: Vec<u64> = view.runs.iter().map(|run| run.run_id.as_u64()).collect();
    assert_eq!(ids, vec![3, 2, 1]);
}

#[tokio::test]
async fn test_list_repositories_ordered_by_activity() {
    let store = InMemoryRunStore::new();

    store
        .upsert_workflow_run(sample_record(1, "octocat/alpha", &ts(5)))
        .await
        .unwrap();
    store
        .upsert_workflow_run(sample_record(2, "octocat/beta", &ts(10)))
        .await
        .unwrap();

    let listing = store.list_repositories_with_runs().await.unwrap();

    assert_eq!(listing.len(), 2);
    assert_eq!(listing[0].repository.full_name.as_str(), "octocat/beta");
    assert_eq!(listing[1].repository.full_name.as_str(), "octocat/alpha");
    assert_eq!(listing[0].workflows[0].workflow_id, WorkflowId::new(9001));
    assert_eq!(listing[0].workflows[0].runs.len(), 1);
}

#[tokio::test]
async fn test_dashboard_stats_over_store() {
    let store = InMemoryRunStore::new();

    let mut old_failure = sample_record(1, "octocat/alpha", &ts(1));
    old_failure.conclusion = Some(RunConclusion::Failure);
    store.upsert_workflow_run(old_failure).await.unwrap();

    store
        .upsert_workflow_run(sample_record(2, "octocat/alpha", &ts(2)))
        .await
        .unwrap();

    let mut running = sample_record(3, "octocat/beta", &ts(3));
    running.status = RunStatus::InProgress;
    running.conclusion = None;
    store.upsert_workflow_run(running).await.unwrap();

    let stats = store.dashboard_stats().await.unwrap();

    assert_eq!(stats.total_repositories, 2);
    assert_eq!(stats.total_runs, 3);
    assert_eq!(stats.success_count, 1);
    assert_eq!(stats.failure_count, 0);
    assert_eq!(stats.in_progress_count, 1);
    assert_eq!(stats.cancelled_count, 0);
}

#[tokio::test]
async fn test_in_progress_runs_across_repositories() {
    let store = InMemoryRunStore::new();

    store
        .upsert_workflow_run(sample_record(1, "octocat/alpha", &ts(1)))
        .await
        .unwrap();

    let mut queued = sample_record(2, "octocat/alpha", &ts(2));
    queued.status = RunStatus::Queued;
    queued.conclusion = None;
    store.upsert_workflow_run(queued).await.unwrap();

    let mut running = sample_record(3, "octocat/beta", &ts(3));
    running.status = RunStatus::InProgress;
    running.conclusion = None;
    store.upsert_workflow_run(running).await.unwrap();

    let runs = store.in_progress_runs().await.unwrap();

    let ids: Vec<u64> = runs.iter().map(|run| run.run_id.as_u64()).collect();
    assert_eq!(ids, vec![3, 2]);
}

// ============================================================================
// Health and handle semantics tests
// ============================================================================

#[tokio::test]
async fn test_health_check_reports_memory_backend() {
    let store = InMemoryRunStore::new();

    let health = store.health_check().await.unwrap();

    assert!(health.healthy);
    assert_eq!(health.backend, "memory");
    assert!(health.error_message.is_none());
}

/// Clones share the underlying tables.
#[tokio::test]
async fn test_clones_share_state() {
    let store = InMemoryRunStore::new();
    let handle = store.clone();

    store
        .upsert_workflow_run(sample_record(1, "octocat/alpha", &ts(1)))
        .await
        .unwrap();

    assert_eq!(handle.run_count(), 1);
    assert_eq!(handle.repository_count(), 1);
}
