//! # Webhook Intake Module
//!
//! Handles GitHub `workflow_run` webhook intake: header extraction, relay
//! envelope unwrapping, signature gating, payload normalization, and the
//! handoff to the upsert store.

use crate::store::{RunStore, StoreError};
use crate::{
    ErrorCategory, RepoFullName, RepositoryAttrs, RunConclusion, RunId, RunStatus, Timestamp,
    WorkflowId, WorkflowRunRecord,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

// ============================================================================
// Core Types
// ============================================================================

/// Raw HTTP request data from GitHub webhooks
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub headers: WebhookHeaders,
    pub body: Bytes,
    pub received_at: Timestamp,
}

impl WebhookRequest {
    /// Create new webhook request
    pub fn new(headers: WebhookHeaders, body: Bytes) -> Self {
        Self {
            headers,
            body,
            received_at: Timestamp::now(),
        }
    }

    /// Get event type from headers
    pub fn event_type(&self) -> &str {
        &self.headers.event_type
    }

    /// Get delivery ID from headers
    pub fn delivery_id(&self) -> &str {
        &self.headers.delivery_id
    }

    /// Get signature from headers if present
    pub fn signature(&self) -> Option<&str> {
        self.headers.signature.as_deref()
    }
}

/// GitHub-specific HTTP headers consumed during intake
#[derive(Debug, Clone)]
pub struct WebhookHeaders {
    pub event_type: String,         // X-GitHub-Event
    pub delivery_id: String,        // X-GitHub-Delivery
    pub signature: Option<String>,  // X-Hub-Signature-256
    pub user_agent: Option<String>, // User-Agent
    pub content_type: String,       // Content-Type
}

impl WebhookHeaders {
    /// Parse headers from an HTTP header map
    ///
    /// Absent headers become empty values rather than request errors: the
    /// intake endpoint answers only 200/401/500, so a missing event header
    /// leads to the ignored-event path and a missing signature simply fails
    /// verification.
    pub fn from_http_headers(headers: &HashMap<String, String>) -> Self {
        let event_type = headers
            .get("x-github-event")
            .or_else(|| headers.get("X-GitHub-Event"))
            .cloned()
            .unwrap_or_default();

        let delivery_id = headers
            .get("x-github-delivery")
            .or_else(|| headers.get("X-GitHub-Delivery"))
            .cloned()
            .unwrap_or_default();

        let signature = headers
            .get("x-hub-signature-256")
            .or_else(|| headers.get("X-Hub-Signature-256"))
            .cloned();

        let user_agent = headers
            .get("user-agent")
            .or_else(|| headers.get("User-Agent"))
            .cloned();

        let content_type = headers
            .get("content-type")
            .or_else(|| headers.get("Content-Type"))
            .cloned()
            .unwrap_or_else(|| "application/json".to_string());

        Self {
            event_type,
            delivery_id,
            signature,
            user_agent,
            content_type,
        }
    }
}

/// Outcome of processing one webhook delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The delivery carried a `workflow_run` event and its record was upserted
    Stored {
        run_id: RunId,
        repository: RepoFullName,
    },
    /// The event kind is not handled; acknowledged without mutation
    Ignored { event_type: String },
}

// ============================================================================
// Relay Envelope Unwrapping
// ============================================================================

/// Envelope field names that may carry the original payload, in priority order
const RELAY_PAYLOAD_FIELDS: [&str; 2] = ["body", "payload"];

/// Unwrap at most one layer of relay/proxy wrapping
///
/// Tunnel services deliver the original webhook body as a string field
/// inside their own JSON envelope. When the body parses as JSON carrying one
/// of the known envelope fields with a string value, that inner string
/// becomes the effective body; otherwise the body is used as-is. The inner
/// string is never inspected for further wrapping.
///
/// Returns the effective body and whether an envelope was detected.
pub fn unwrap_relay_envelope(body: &Bytes) -> (Bytes, bool) {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) else {
        return (body.clone(), false);
    };

    for field in RELAY_PAYLOAD_FIELDS {
        if let Some(inner) = value.get(field).and_then(|v| v.as_str()) {
            return (Bytes::copy_from_slice(inner.as_bytes()), true);
        }
    }

    (body.clone(), false)
}

// ============================================================================
// Payload Normalization
// ============================================================================

/// The single event kind the normalizer handles
pub const HANDLED_EVENT_KIND: &str = "workflow_run";

/// Normalize a GitHub event payload into a [`WorkflowRunRecord`]
///
/// Returns `Ok(None)` for every event kind other than `workflow_run`
/// (ignored, not an error). Fields the dashboard can live without fall back
/// to displayable defaults; structurally required fields produce a
/// [`NormalizationError`]. Timestamps pass through as opaque ISO-8601
/// strings.
pub fn normalize(
    event_kind: &str,
    payload: &serde_json::Value,
) -> Result<Option<WorkflowRunRecord>, NormalizationError> {
    if event_kind != HANDLED_EVENT_KIND {
        return Ok(None);
    }

    let run_data =
        payload
            .get("workflow_run")
            .ok_or_else(|| NormalizationError::MissingRequiredField {
                field: "workflow_run".to_string(),
            })?;

    let run_id = run_data
        .get("id")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| NormalizationError::MissingRequiredField {
            field: "workflow_run.id".to_string(),
        })?;

    let run_number = run_data
        .get("run_number")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| NormalizationError::MissingRequiredField {
            field: "workflow_run.run_number".to_string(),
        })?;

    let run_attempt = run_data
        .get("run_attempt")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| NormalizationError::MissingRequiredField {
            field: "workflow_run.run_attempt".to_string(),
        })?;

    let workflow_id = run_data
        .get("workflow_id")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| NormalizationError::MissingRequiredField {
            field: "workflow_run.workflow_id".to_string(),
        })?;

    let workflow_name = run_data
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or("Unknown Workflow")
        .to_string();

    let display_title = run_data
        .get("display_title")
        .and_then(|v| v.as_str())
        .ok_or_else(|| NormalizationError::MissingRequiredField {
            field: "workflow_run.display_title".to_string(),
        })?
        .to_string();

    // Absent status is treated like an unrecognized one.
    let status = RunStatus::from_github(
        run_data
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or_default(),
    );

    let conclusion = run_data
        .get("conclusion")
        .and_then(|v| v.as_str())
        .map(RunConclusion::from_github);

    let head_branch = run_data
        .get("head_branch")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let head_sha = run_data
        .get("head_sha")
        .and_then(|v| v.as_str())
        .ok_or_else(|| NormalizationError::MissingRequiredField {
            field: "workflow_run.head_sha".to_string(),
        })?
        .to_string();

    let event = run_data
        .get("event")
        .and_then(|v| v.as_str())
        .ok_or_else(|| NormalizationError::MissingRequiredField {
            field: "workflow_run.event".to_string(),
        })?
        .to_string();

    let actor_login = run_data
        .get("actor")
        .and_then(|a| a.get("login"))
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let actor_avatar_url = run_data
        .get("actor")
        .and_then(|a| a.get("avatar_url"))
        .and_then(|v| v.as_str())
        .map(String::from);

    let created_at = run_data
        .get("created_at")
        .and_then(|v| v.as_str())
        .ok_or_else(|| NormalizationError::MissingRequiredField {
            field: "workflow_run.created_at".to_string(),
        })?
        .to_string();

    let updated_at = run_data
        .get("updated_at")
        .and_then(|v| v.as_str())
        .ok_or_else(|| NormalizationError::MissingRequiredField {
            field: "workflow_run.updated_at".to_string(),
        })?
        .to_string();

    let run_started_at = run_data
        .get("run_started_at")
        .and_then(|v| v.as_str())
        .map(String::from);

    let html_url = run_data
        .get("html_url")
        .and_then(|v| v.as_str())
        .ok_or_else(|| NormalizationError::MissingRequiredField {
            field: "workflow_run.html_url".to_string(),
        })?
        .to_string();

    let repository = extract_repository_attrs(payload)?;

    Ok(Some(WorkflowRunRecord {
        run_id: RunId::new(run_id),
        run_number,
        run_attempt,
        workflow_id: WorkflowId::new(workflow_id),
        workflow_name,
        display_title,
        status,
        conclusion,
        head_branch,
        head_sha,
        event,
        actor_login,
        actor_avatar_url,
        created_at,
        updated_at,
        run_started_at,
        html_url,
        repository,
    }))
}

/// Extract the owning repository's attributes from the event payload
fn extract_repository_attrs(
    payload: &serde_json::Value,
) -> Result<RepositoryAttrs, NormalizationError> {
    let repo_data =
        payload
            .get("repository")
            .ok_or_else(|| NormalizationError::MissingRequiredField {
                field: "repository".to_string(),
            })?;

    let owner = repo_data
        .get("owner")
        .and_then(|o| o.get("login"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| NormalizationError::MissingRequiredField {
            field: "repository.owner.login".to_string(),
        })?
        .to_string();

    let name = repo_data
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| NormalizationError::MissingRequiredField {
            field: "repository.name".to_string(),
        })?
        .to_string();

    let full_name_raw = repo_data
        .get("full_name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| NormalizationError::MissingRequiredField {
            field: "repository.full_name".to_string(),
        })?;

    let full_name = RepoFullName::new(full_name_raw).map_err(|e| {
        NormalizationError::InvalidFieldFormat {
            field: "repository.full_name".to_string(),
            message: e.to_string(),
        }
    })?;

    let avatar_url = repo_data
        .get("owner")
        .and_then(|o| o.get("avatar_url"))
        .and_then(|v| v.as_str())
        .map(String::from);

    let html_url = repo_data
        .get("html_url")
        .and_then(|v| v.as_str())
        .ok_or_else(|| NormalizationError::MissingRequiredField {
            field: "repository.html_url".to_string(),
        })?
        .to_string();

    Ok(RepositoryAttrs {
        owner,
        name,
        full_name,
        avatar_url,
        html_url,
    })
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors during payload normalization
#[derive(Debug, thiserror::Error)]
pub enum NormalizationError {
    #[error("Missing required field: {field}")]
    MissingRequiredField { field: String },

    #[error("Invalid field format: {field} - {message}")]
    InvalidFieldFormat { field: String, message: String },
}

/// Errors from the webhook intake pipeline
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Signature validation failed: {0}")]
    InvalidSignature(#[from] SignatureError),

    #[error("Event normalization failed: {0}")]
    Normalization(#[from] NormalizationError),

    #[error("JSON parsing failed: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Store operation failed: {0}")]
    Store(#[from] StoreError),
}

impl WebhookError {
    /// Check if error is transient and may succeed on redelivery
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(store_error) => store_error.is_transient(),
            Self::InvalidSignature(_) => false,
            Self::Normalization(_) => false,
            Self::JsonParsing(_) => false,
        }
    }

    /// Whether the failure is an authentication rejection
    ///
    /// The HTTP layer maps authentication rejections to 401; every other
    /// pipeline failure becomes 500.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::InvalidSignature(_))
    }

    /// Get error category for monitoring
    pub fn error_category(&self) -> ErrorCategory {
        match self {
            Self::InvalidSignature(_) => ErrorCategory::Security,
            Self::Normalization(_) => ErrorCategory::Permanent,
            Self::JsonParsing(_) => ErrorCategory::Permanent,
            Self::Store(store_error) => store_error.error_category(),
        }
    }
}

// ============================================================================
// Trait Definitions
// ============================================================================

/// Interface for the webhook processing pipeline
#[async_trait]
pub trait WebhookProcessor: Send + Sync {
    /// Process a complete webhook delivery end to end
    async fn process_webhook(
        &self,
        request: WebhookRequest,
    ) -> Result<IngestOutcome, WebhookError>;
}

// ============================================================================
// Ingestion Pipeline
// ============================================================================

/// Webhook intake pipeline with dependency-injected verifier and store
///
/// Processing order is fixed: relay unwrap, signature gate, payload parse,
/// normalization, upsert. The signature gate runs before any parsing of the
/// effective body and before any store mutation.
///
/// Verification is computed over the effective body, i.e. after relay
/// unwrapping, to stay compatible with relays that deliver the sender-signed
/// payload as an envelope field. A relay that mutates or re-signs the payload
/// invalidates the sender's signature; the development-only relay bypass in
/// [`RelayPolicy`] exists for exactly that traffic and is unreachable in
/// production configurations.
pub struct RunIngestor {
    verifier: Option<Arc<dyn SignatureVerifier>>,
    store: Arc<dyn RunStore>,
    relay_policy: RelayPolicy,
}

impl RunIngestor {
    /// Create a new ingestor
    ///
    /// `verifier` is optional to support test setups; the service binary
    /// always installs one since a missing webhook secret is a startup-time
    /// fatal condition.
    pub fn new(
        verifier: Option<Arc<dyn SignatureVerifier>>,
        store: Arc<dyn RunStore>,
        relay_policy: RelayPolicy,
    ) -> Self {
        Self {
            verifier,
            store,
            relay_policy,
        }
    }
}

#[async_trait]
impl WebhookProcessor for RunIngestor {
    async fn process_webhook(
        &self,
        request: WebhookRequest,
    ) -> Result<IngestOutcome, WebhookError> {
        info!(
            event_type = %request.event_type(),
            delivery_id = %request.delivery_id(),
            body_bytes = request.body.len(),
            "Processing webhook delivery"
        );

        // 1. Unwrap at most one layer of relay wrapping
        let (effective_body, relay_wrapped) = unwrap_relay_envelope(&request.body);

        // 2. Signature gate over the effective body
        let bypass = relay_wrapped && self.relay_policy.bypass_allowed();
        if bypass {
            warn!(
                delivery_id = %request.delivery_id(),
                "Relay envelope detected; skipping signature verification (development bypass)"
            );
        } else if let Some(verifier) = &self.verifier {
            verifier.check(&effective_body, request.signature().unwrap_or(""))?;
        } else {
            warn!(
                delivery_id = %request.delivery_id(),
                "Signature verification skipped - no verifier configured"
            );
        }

        // 3. Parse the effective body
        let payload: serde_json::Value = serde_json::from_slice(&effective_body)?;

        // 4. Normalize; unhandled event kinds are acknowledged without mutation
        let Some(record) = normalize(request.event_type(), &payload)? else {
            info!(
                event_type = %request.event_type(),
                delivery_id = %request.delivery_id(),
                "Ignoring unhandled event kind"
            );
            return Ok(IngestOutcome::Ignored {
                event_type: request.event_type().to_string(),
            });
        };

        // 5. Upsert
        let run_id = record.run_id;
        let repository = record.repository.full_name.clone();
        self.store.upsert_workflow_run(record).await?;

        info!(
            run_id = %run_id,
            repository = %repository,
            delivery_id = %request.delivery_id(),
            "Workflow run upserted"
        );

        Ok(IngestOutcome::Stored { run_id, repository })
    }
}

// Signature verification
mod signature;
pub use signature::{RelayPolicy, SharedSecretVerifier, SignatureError, SignatureVerifier};

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
