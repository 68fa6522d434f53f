//! # Run-Board Core
//!
//! Core business logic for the run-board CI dashboard backend.
//!
//! This crate contains the domain logic for ingesting GitHub Actions
//! `workflow_run` webhooks: validating signatures, normalizing event payloads
//! into a stable schema, upserting repository and run records with a bounded
//! per-repository history, and answering the dashboard's read queries.
//!
//! ## Architecture
//!
//! The core follows clean architecture principles:
//! - Business logic depends only on trait abstractions
//! - Infrastructure implementations are injected at runtime
//! - The store is the sole arbiter of consistency; handlers hold no locks
//!
//! ## Usage
//!
//! ```rust
//! use run_board_core::{RepoFullName, RunStatus};
//!
//! let full_name = RepoFullName::new("octocat/hello-world").unwrap();
//! assert_eq!(full_name.owner(), "octocat");
//! assert_eq!(RunStatus::from_github("in_progress"), RunStatus::InProgress);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// Re-export commonly used types
pub use ulid::Ulid;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// GitHub-assigned workflow run identifier
///
/// Unique across all repositories. Later deliveries carrying the same id
/// describe status progression of the same run, never a new run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(u64);

impl RunId {
    /// Create new run ID from GitHub's numeric identifier
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// GitHub-assigned workflow definition identifier
///
/// One repository may define many workflows; each run belongs to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(u64);

impl WorkflowId {
    /// Create new workflow ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Store-internal repository reference
///
/// Assigned by the store when a repository row is first created. Runs carry
/// this key as their back-reference to the owning repository. Uses ULID for
/// lexicographic sorting and global uniqueness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoKey(Ulid);

impl RepoKey {
    /// Generate a new unique repository key
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Get string representation of the key
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for RepoKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RepoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RepoKey {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid = s.parse::<Ulid>().map_err(|_| ParseError::InvalidFormat {
            expected: "ULID format".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(ulid))
    }
}

/// Repository natural key in `owner/name` form
///
/// Globally unique; the store keeps exactly one repository row per distinct
/// full name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepoFullName(String);

impl RepoFullName {
    /// Create a full name with validation
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();

        if value.is_empty() {
            return Err(ValidationError::Required {
                field: "full_name".to_string(),
            });
        }

        if value.len() > 256 {
            return Err(ValidationError::TooLong {
                field: "full_name".to_string(),
                max_length: 256,
            });
        }

        // Owner and name are used as single path components by the
        // filesystem store.
        let valid_component = |part: &str| !part.is_empty() && part != "." && part != "..";
        let valid_shape = match value.split_once('/') {
            Some((owner, name)) => {
                valid_component(owner) && valid_component(name) && !name.contains('/')
            }
            None => false,
        };

        if !valid_shape {
            return Err(ValidationError::InvalidFormat {
                field: "full_name".to_string(),
                message: "expected exactly one '/' separating owner and name".to_string(),
            });
        }

        Ok(Self(value))
    }

    /// Compose a full name from its owner and name parts
    pub fn from_parts(owner: &str, name: &str) -> Result<Self, ValidationError> {
        Self::new(format!("{}/{}", owner, name))
    }

    /// Get the owner half of the full name
    pub fn owner(&self) -> &str {
        self.0.split_once('/').map(|(owner, _)| owner).unwrap_or("")
    }

    /// Get the repository-name half of the full name
    pub fn name(&self) -> &str {
        self.0.split_once('/').map(|(_, name)| name).unwrap_or("")
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepoFullName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RepoFullName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ============================================================================
// Run Lifecycle Enums
// ============================================================================

/// Lifecycle status of a workflow run
///
/// Not a strict linear state machine: GitHub may skip or revisit states.
/// Unrecognized values map to [`RunStatus::Pending`] so that new GitHub
/// statuses never fail ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Requested,
    Queued,
    Waiting,
    InProgress,
    Completed,
    /// Catch-all for unrecognized GitHub statuses
    Pending,
}

impl RunStatus {
    /// Map a GitHub status string onto the enum
    ///
    /// Exact matches map directly; anything else maps to `Pending` for
    /// forward compatibility.
    pub fn from_github(value: &str) -> Self {
        match value {
            "requested" => Self::Requested,
            "queued" => Self::Queued,
            "waiting" => Self::Waiting,
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            "pending" => Self::Pending,
            _ => Self::Pending,
        }
    }

    /// Whether this status counts as "in progress" for dashboard purposes
    ///
    /// The in-progress family is {in_progress, queued, waiting}.
    pub fn is_in_progress_family(&self) -> bool {
        matches!(self, Self::InProgress | Self::Queued | Self::Waiting)
    }

    /// Get the snake_case wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Queued => "queued",
            Self::Waiting => "waiting",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Pending => "pending",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal outcome of a completed workflow run
///
/// Only set once the run reaches `completed` status. Unrecognized GitHub
/// values map to [`RunConclusion::Failure`]: an unknown outcome is treated as
/// unsuccessful rather than silently dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunConclusion {
    Success,
    Failure,
    Neutral,
    Cancelled,
    TimedOut,
    ActionRequired,
    Stale,
    Skipped,
    StartupFailure,
}

impl RunConclusion {
    /// Map a GitHub conclusion string onto the enum
    ///
    /// Exact matches map directly; anything else maps to `Failure`, a
    /// deliberately pessimistic default.
    pub fn from_github(value: &str) -> Self {
        match value {
            "success" => Self::Success,
            "failure" => Self::Failure,
            "neutral" => Self::Neutral,
            "cancelled" => Self::Cancelled,
            "timed_out" => Self::TimedOut,
            "action_required" => Self::ActionRequired,
            "stale" => Self::Stale,
            "skipped" => Self::Skipped,
            "startup_failure" => Self::StartupFailure,
            _ => Self::Failure,
        }
    }

    /// Get the snake_case wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Neutral => "neutral",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
            Self::ActionRequired => "action_required",
            Self::Stale => "stale",
            Self::Skipped => "skipped",
            Self::StartupFailure => "startup_failure",
        }
    }
}

impl fmt::Display for RunConclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Repository and Run Types
// ============================================================================

/// Repository attributes carried by a `workflow_run` event
///
/// These are the mutable attributes the upsert overwrites last-write-wins;
/// identity is the full name alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryAttrs {
    pub owner: String,
    pub name: String,
    pub full_name: RepoFullName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub html_url: String,
}

/// Repository row as persisted by the store
///
/// Created on the first observed event referencing the repository, updated
/// (never deleted) whenever a later event carries fresher attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    /// Store-assigned internal reference
    pub key: RepoKey,
    pub owner: String,
    pub name: String,
    pub full_name: RepoFullName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub html_url: String,
}

impl Repository {
    /// Build a fresh repository row from event attributes
    pub fn from_attrs(key: RepoKey, attrs: RepositoryAttrs) -> Self {
        Self {
            key,
            owner: attrs.owner,
            name: attrs.name,
            full_name: attrs.full_name,
            avatar_url: attrs.avatar_url,
            html_url: attrs.html_url,
        }
    }

    /// Overwrite the mutable attributes with incoming values
    ///
    /// Last-write-wins: no conflict detection, no merge. The key and the
    /// full-name identity are never touched.
    pub fn apply_attrs(&mut self, attrs: RepositoryAttrs) {
        self.owner = attrs.owner;
        self.name = attrs.name;
        self.avatar_url = attrs.avatar_url;
        self.html_url = attrs.html_url;
    }
}

/// Workflow run row as persisted by the store
///
/// At most one row exists per [`RunId`]; later events with the same id
/// overwrite every mutable field in place. Timestamps are opaque ISO-8601
/// strings whose lexical order equals chronological order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    pub run_id: RunId,
    pub run_number: u64,
    pub run_attempt: u64,
    /// Back-reference to the owning repository row
    pub repository_key: RepoKey,
    /// Denormalized copy of the owning repository's full name
    ///
    /// A read-path cache only; never used for identity decisions.
    pub repository_full_name: RepoFullName,
    pub workflow_id: WorkflowId,
    pub workflow_name: String,
    pub display_title: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<RunConclusion>,
    pub head_branch: String,
    pub head_sha: String,
    /// Event kind that triggered the run (push, pull_request, ...)
    pub event: String,
    pub actor_login: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_avatar_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_started_at: Option<String>,
    pub html_url: String,
}

/// Normalized form of a `workflow_run` event payload
///
/// Output of the payload normalizer and input to the upsert store: all run
/// fields plus the owning repository's attributes, with no store-internal
/// references yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRunRecord {
    pub run_id: RunId,
    pub run_number: u64,
    pub run_attempt: u64,
    pub workflow_id: WorkflowId,
    pub workflow_name: String,
    pub display_title: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<RunConclusion>,
    pub head_branch: String,
    pub head_sha: String,
    pub event: String,
    pub actor_login: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_avatar_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_started_at: Option<String>,
    pub html_url: String,
    pub repository: RepositoryAttrs,
}

impl WorkflowRunRecord {
    /// Convert into a storable run row once the owning repository is resolved
    pub fn into_run(self, repository_key: RepoKey) -> WorkflowRun {
        WorkflowRun {
            run_id: self.run_id,
            run_number: self.run_number,
            run_attempt: self.run_attempt,
            repository_key,
            repository_full_name: self.repository.full_name,
            workflow_id: self.workflow_id,
            workflow_name: self.workflow_name,
            display_title: self.display_title,
            status: self.status,
            conclusion: self.conclusion,
            head_branch: self.head_branch,
            head_sha: self.head_sha,
            event: self.event,
            actor_login: self.actor_login,
            actor_avatar_url: self.actor_avatar_url,
            created_at: self.created_at,
            updated_at: self.updated_at,
            run_started_at: self.run_started_at,
            html_url: self.html_url,
        }
    }
}

// ============================================================================
// Time and Environment Types
// ============================================================================

/// UTC timestamp for ingestion metadata
///
/// Run records carry their GitHub timestamps as opaque ISO-8601 strings;
/// this wrapper is only used where the service itself marks time (request
/// receipt, health reporting).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current moment
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Parse timestamp from RFC3339 string
    pub fn from_rfc3339(s: &str) -> Result<Self, ParseError> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|_| ParseError::InvalidFormat {
                expected: "RFC3339 datetime".to_string(),
                actual: s.to_string(),
            })?
            .with_timezone(&Utc);
        Ok(Self(dt))
    }

    /// Convert to RFC3339 string
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

/// Deployment environment, used for configuration safety gates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Whether this is a production deployment
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::Development
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Environment {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "staging" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            _ => Err(ParseError::InvalidFormat {
                expected: "development, staging, or production".to_string(),
                actual: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// High-level error categorization for alerting decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Temporary failures that may succeed on redelivery
    Transient,
    /// Permanent failures that won't succeed on redelivery
    Permanent,
    /// Security-related failures requiring attention
    Security,
    /// Configuration errors preventing startup
    Configuration,
}

/// Error type for input validation failures
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' has invalid format: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    TooLong { field: String, max_length: usize },
}

/// Error type for string parsing failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid format: expected {expected}, got '{actual}'")]
    InvalidFormat { expected: String, actual: String },
}

// ============================================================================
// Module declarations
// ============================================================================

/// Webhook intake: headers, relay unwrap, signature verification, normalization
pub mod webhook;

/// Run storage: upsert store trait, retention policy, read queries, adapters
pub mod store;

// Re-export key types for convenience
pub use store::{
    DashboardStats, FilesystemRunStore, InMemoryRunStore, RepositoryWithRuns,
    RepositoryWithWorkflows, RunStore, StoreError, StoreHealth, SweepReport, WorkflowGroup,
    MAX_RUNS_PER_REPO,
};
pub use webhook::{
    IngestOutcome, NormalizationError, RelayPolicy, RunIngestor, SharedSecretVerifier,
    SignatureError, SignatureVerifier, WebhookError, WebhookHeaders, WebhookProcessor,
    WebhookRequest,
};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
