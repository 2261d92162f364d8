//! Batch context
//!
//! Everything one ingestion batch needs to know about who it runs for and
//! under which limits. Passed explicitly into the orchestrator.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::constants::DEFAULT_KEY_ROOT;

#[derive(Debug, Clone)]
pub struct BatchContext {
    pub batch_id: Uuid,
    /// Already-authorized tenant scope
    pub tenant_id: Uuid,
    /// Identity that started the batch, for the audit event
    pub initiated_by: Option<Uuid>,
    /// Tenant-scoped root under which every object key is placed
    pub key_prefix: String,
    pub config: Arc<IngestConfig>,
    /// Caller-initiated abort. Fatal errors stop the batch through a child
    /// token, so cancelling never flows back to the caller.
    pub cancel: CancellationToken,
}

impl BatchContext {
    pub fn new(tenant_id: Uuid, config: Arc<IngestConfig>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            tenant_id,
            initiated_by: None,
            key_prefix: format!("{}/{}", DEFAULT_KEY_ROOT, tenant_id),
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into().trim_matches('/').to_string();
        self
    }

    pub fn with_initiator(mut self, user_id: Uuid) -> Self {
        self.initiated_by = Some(user_id);
        self
    }

    pub fn with_batch_id(mut self, batch_id: Uuid) -> Self {
        self.batch_id = batch_id;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
