//! # Filesystem Run Store
//!
//! Local filesystem implementation of [`RunStore`] for single-node
//! deployments.
//!
//! Rows are JSON files: repositories under
//! `<root>/repositories/<owner>/<name>.json`, runs under
//! `<root>/runs/<run_id>.json`. Writes land in a `.tmp` sibling first and
//! are renamed into place, which is atomic on POSIX filesystems.

use super::{
    assemble_repository_listing, collect_in_progress, excess_run_ids, newest_first,
    reduce_dashboard_stats, DashboardStats, RepositoryWithRuns, RepositoryWithWorkflows, RunStore,
    StoreError, StoreHealth, SweepReport, MAX_RUNS_PER_REPO,
};
use crate::{RepoFullName, RepoKey, Repository, RepositoryAttrs, RunId, WorkflowRun, WorkflowRunRecord};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Filesystem-based run store
///
/// # Examples
///
/// ```no_run
/// use run_board_core::store::FilesystemRunStore;
/// use std::path::PathBuf;
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = FilesystemRunStore::new(PathBuf::from("./data/run-board")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FilesystemRunStore {
    root: PathBuf,
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

impl FilesystemRunStore {
    /// Create new filesystem run store rooted at `root`
    ///
    /// # Errors
    ///
    /// Returns error if the root directory cannot be created or accessed.
    pub async fn new(root: PathBuf) -> Result<Self, StoreError> {
        fs::create_dir_all(root.join("repositories"))
            .await
            .map_err(|e| io_error(&root, e))?;
        fs::create_dir_all(root.join("runs"))
            .await
            .map_err(|e| io_error(&root, e))?;

        Ok(Self { root })
    }

    fn repository_path(&self, full_name: &RepoFullName) -> PathBuf {
        self.root
            .join("repositories")
            .join(full_name.owner())
            .join(format!("{}.json", full_name.name()))
    }

    fn run_path(&self, run_id: RunId) -> PathBuf {
        self.root.join("runs").join(format!("{}.json", run_id))
    }

    /// Read one JSON row, treating a missing file as absent
    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, StoreError> {
        match fs::read_to_string(path).await {
            Ok(json) => {
                let value =
                    serde_json::from_str(&json).map_err(|e| StoreError::Serialization {
                        message: format!("Failed to deserialize {}: {}", path.display(), e),
                    })?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(path, e)),
        }
    }

    /// Write one JSON row via a temporary sibling and rename
    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }

        let json =
            serde_json::to_string_pretty(value).map_err(|e| StoreError::Serialization {
                message: format!("Failed to serialize {}: {}", path.display(), e),
            })?;

        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| io_error(&temp_path, e))?;
        file.write_all(json.as_bytes())
            .await
            .map_err(|e| io_error(&temp_path, e))?;
        file.flush()
            .await
            .map_err(|e| io_error(&temp_path, e))?;

        fs::rename(&temp_path, path)
            .await
            .map_err(|e| io_error(path, e))?;

        Ok(())
    }

    /// Delete one run row, treating a missing file as already deleted
    async fn delete_run_file(&self, run_id: RunId) -> Result<bool, StoreError> {
        let path = self.run_path(run_id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    /// Load every repository row
    async fn load_repositories(&self) -> Result<Vec<Repository>, StoreError> {
        let base = self.root.join("repositories");
        let mut repositories = Vec::new();

        let mut owners = match fs::read_dir(&base).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(repositories),
            Err(e) => return Err(io_error(&base, e)),
        };

        while let Some(owner_entry) = owners.next_entry().await.map_err(|e| io_error(&base, e))? {
            let owner_path = owner_entry.path();
            if !owner_path.is_dir() {
                continue;
            }

            let mut files = fs::read_dir(&owner_path)
                .await
                .map_err(|e| io_error(&owner_path, e))?;
            while let Some(entry) = files
                .next_entry()
                .await
                .map_err(|e| io_error(&owner_path, e))?
            {
                let path = entry.path();
                if path.extension().and_then(|s| s.to_str()) == Some("json") {
                    if let Some(repository) = self.read_json::<Repository>(&path).await? {
                        repositories.push(repository);
                    }
                }
            }
        }

        Ok(repositories)
    }

    /// Load every run row
    async fn load_runs(&self) -> Result<Vec<WorkflowRun>, StoreError> {
        let base = self.root.join("runs");
        let mut runs = Vec::new();

        let mut entries = match fs::read_dir(&base).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(runs),
            Err(e) => return Err(io_error(&base, e)),
        };

        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&base, e))? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                if let Some(run) = self.read_json::<WorkflowRun>(&path).await? {
                    runs.push(run);
                }
            }
        }

        Ok(runs)
    }

    /// Delete run rows beyond the retention cap for one repository
    async fn sweep_repository(&self, repository_key: RepoKey) -> Result<usize, StoreError> {
        let runs = self.load_runs().await?;
        let excess = excess_run_ids(
            runs.iter()
                .filter(|run| run.repository_key == repository_key)
                .collect(),
        );

        let mut deleted = 0;
        for stale_id in excess {
            if self.delete_run_file(stale_id).await? {
                deleted += 1;
            }
        }

        Ok(deleted)
    }
}

#[async_trait]
impl RunStore for FilesystemRunStore {
    async fn upsert_repository(&self, attrs: RepositoryAttrs) -> Result<RepoKey, StoreError> {
        let path = self.repository_path(&attrs.full_name);

        let repository = match self.read_json::<Repository>(&path).await? {
            Some(mut existing) => {
                existing.apply_attrs(attrs);
                existing
            }
            None => Repository::from_attrs(RepoKey::new(), attrs),
        };

        let key = repository.key;
        self.write_json(&path, &repository).await?;
        Ok(key)
    }

    async fn upsert_workflow_run(&self, record: WorkflowRunRecord) -> Result<RunId, StoreError> {
        let full_name = record.repository.full_name.clone();
        let repository_key = self.upsert_repository(record.repository.clone()).await?;

        // The run row carries the repository key as its owner reference;
        // a key that does not resolve would corrupt the run table.
        let repository_path = self.repository_path(&full_name);
        if self
            .read_json::<Repository>(&repository_path)
            .await?
            .is_none()
        {
            return Err(StoreError::Inconsistency {
                detail: format!("repository {} not resolvable after upsert", full_name),
            });
        }

        let run_id = record.run_id;
        let run_path = self.run_path(run_id);
        let inserted = self.read_json::<WorkflowRun>(&run_path).await?.is_none();
        self.write_json(&run_path, &record.into_run(repository_key))
            .await?;

        // Retention sweep only on insert; an update cannot change the count.
        if inserted {
            self.sweep_repository(repository_key).await?;
        }

        Ok(run_id)
    }

    async fn cleanup_old_runs(&self) -> Result<SweepReport, StoreError> {
        let repositories = self.load_repositories().await?;
        let runs = self.load_runs().await?;

        let mut report = SweepReport::default();
        for repository in repositories {
            let excess = excess_run_ids(
                runs.iter()
                    .filter(|run| run.repository_key == repository.key)
                    .collect(),
            );
            if excess.is_empty() {
                continue;
            }
            report.repositories_swept += 1;
            for stale_id in excess {
                if self.delete_run_file(stale_id).await? {
                    report.runs_deleted += 1;
                }
            }
        }

        Ok(report)
    }

    async fn list_repositories_with_runs(
        &self,
    ) -> Result<Vec<RepositoryWithWorkflows>, StoreError> {
        let repositories = self.load_repositories().await?;
        let all_runs = self.load_runs().await?;

        Ok(assemble_repository_listing(repositories, &all_runs))
    }

    async fn repository_with_runs(
        &self,
        full_name: &RepoFullName,
    ) -> Result<Option<RepositoryWithRuns>, StoreError> {
        let path = self.repository_path(full_name);
        let Some(repository) = self.read_json::<Repository>(&path).await? else {
            return Ok(None);
        };

        let mut runs: Vec<WorkflowRun> = self
            .load_runs()
            .await?
            .into_iter()
            .filter(|run| run.repository_key == repository.key)
            .collect();
        runs.sort_by(newest_first);
        runs.truncate(MAX_RUNS_PER_REPO);

        Ok(Some(RepositoryWithRuns { repository, runs }))
    }

    async fn dashboard_stats(&self) -> Result<DashboardStats, StoreError> {
        let repository_count = self.load_repositories().await?.len();
        let all_runs = self.load_runs().await?;

        Ok(reduce_dashboard_stats(repository_count, &all_runs))
    }

    async fn in_progress_runs(&self) -> Result<Vec<WorkflowRun>, StoreError> {
        let all_runs = self.load_runs().await?;

        Ok(collect_in_progress(&all_runs))
    }

    async fn health_check(&self) -> Result<StoreHealth, StoreError> {
        let accessible = self.root.exists() && self.root.is_dir();

        if accessible {
            Ok(StoreHealth {
                healthy: true,
                backend: "filesystem",
                error_message: None,
            })
        } else {
            Ok(StoreHealth {
                healthy: false,
                backend: "filesystem",
                error_message: Some(format!("Store root {} not accessible", self.root.display())),
            })
        }
    }
}

#[cfg(test)]
#[path = "filesystem_tests.rs"]
mod tests;
