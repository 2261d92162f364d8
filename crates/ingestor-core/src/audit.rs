//! Audit hooks
//!
//! The pipeline never stores audit records itself. Callers plug in an
//! `AuditSink`; the default implementations either log through `tracing`
//! or do nothing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::BatchContext;
use crate::models::ExtractionResult;

/// One audit record per batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchAuditEvent {
    pub batch_id: Uuid,
    pub tenant_id: Uuid,
    pub initiated_by: Option<Uuid>,
    pub extracted_count: usize,
    pub skipped_count: usize,
    pub failed_count: usize,
    pub bytes_extracted: u64,
    /// Stable code of the fatal error, when the batch aborted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_code: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl BatchAuditEvent {
    pub fn completed(ctx: &BatchContext, result: &ExtractionResult) -> Self {
        Self {
            batch_id: ctx.batch_id,
            tenant_id: ctx.tenant_id,
            initiated_by: ctx.initiated_by,
            extracted_count: result.extracted_count,
            skipped_count: result.skipped_count,
            failed_count: result.failed_count,
            bytes_extracted: result.bytes_extracted,
            abort_code: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn aborted(ctx: &BatchContext, error_code: &str) -> Self {
        Self {
            batch_id: ctx.batch_id,
            tenant_id: ctx.tenant_id,
            initiated_by: ctx.initiated_by,
            extracted_count: 0,
            skipped_count: 0,
            failed_count: 0,
            bytes_extracted: 0,
            abort_code: Some(error_code.to_string()),
            occurred_at: Utc::now(),
        }
    }
}

/// Receiver for batch and per-entry audit events
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record the outcome of a whole batch
    async fn record_batch(&self, event: &BatchAuditEvent) -> Result<(), String>;

    /// Record a rejected or skipped entry for security monitoring
    async fn record_entry(
        &self,
        batch_id: Uuid,
        entry_name: &str,
        code: &str,
    ) -> Result<(), String>;
}

/// Audit sink that emits structured `tracing` events
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record_batch(&self, event: &BatchAuditEvent) -> Result<(), String> {
        tracing::info!(
            target: "ingestor::audit",
            batch_id = %event.batch_id,
            tenant_id = %event.tenant_id,
            initiated_by = ?event.initiated_by,
            extracted = event.extracted_count,
            skipped = event.skipped_count,
            failed = event.failed_count,
            bytes = event.bytes_extracted,
            abort_code = ?event.abort_code,
            occurred_at = %event.occurred_at.to_rfc3339(),
            "Archive ingestion batch finished"
        );
        Ok(())
    }

    async fn record_entry(
        &self,
        batch_id: Uuid,
        entry_name: &str,
        code: &str,
    ) -> Result<(), String> {
        tracing::info!(
            target: "ingestor::audit",
            batch_id = %batch_id,
            entry = %entry_name,
            code = %code,
            "Archive entry not ingested"
        );
        Ok(())
    }
}

/// No-op implementation for when auditing is disabled
pub struct NoOpAuditSink;

#[async_trait]
impl AuditSink for NoOpAuditSink {
    async fn record_batch(&self, _event: &BatchAuditEvent) -> Result<(), String> {
        Ok(())
    }

    async fn record_entry(
        &self,
        _batch_id: Uuid,
        _entry_name: &str,
        _code: &str,
    ) -> Result<(), String> {
        Ok(())
    }
}
