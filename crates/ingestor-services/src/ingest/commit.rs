use async_trait::async_trait;
use ingestor_core::{BatchContext, ExtractionResult, UploadedObject};
use ingestor_storage::Storage;

use super::BatchState;

/// Records created objects in the caller's metadata store.
///
/// The pipeline has no metadata store of its own; whoever owns one
/// implements this and lets [`commit_or_rollback`] clean up on failure.
#[async_trait]
pub trait MetadataCommitter: Send + Sync {
    async fn commit(&self, ctx: &BatchContext, objects: &[UploadedObject]) -> Result<(), String>;
}

#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    /// The commit failed. Objects that could not be deleted are listed in
    /// `leaked_keys`.
    #[error("Metadata commit failed: {message} ({deleted} objects rolled back, {} left behind)", .leaked_keys.len())]
    Rejected {
        message: String,
        deleted: usize,
        leaked_keys: Vec<String>,
    },
}

/// Commit a batch's objects, deleting them all if the commit fails.
///
/// Either every created object ends up referenced by metadata or the
/// pipeline tries to remove every one of them.
pub async fn commit_or_rollback(
    storage: &dyn Storage,
    committer: &dyn MetadataCommitter,
    ctx: &BatchContext,
    result: &ExtractionResult,
) -> Result<(), CommitError> {
    let message = match committer.commit(ctx, &result.created_objects).await {
        Ok(()) => {
            tracing::info!(
                batch_id = %ctx.batch_id,
                state = BatchState::Committed.as_str(),
                objects = result.created_objects.len(),
                "Batch committed"
            );
            return Ok(());
        }
        Err(message) => message,
    };

    tracing::warn!(
        batch_id = %ctx.batch_id,
        error = %message,
        objects = result.created_objects.len(),
        "Metadata commit failed, rolling back objects"
    );

    let mut deleted = 0;
    let mut leaked_keys = Vec::new();
    for object in &result.created_objects {
        match storage.delete(&object.object_key).await {
            Ok(()) => deleted += 1,
            Err(e) => {
                tracing::error!(key = %object.object_key, error = %e, "Failed to roll back object");
                leaked_keys.push(object.object_key.clone());
            }
        }
    }

    Err(CommitError::Rejected {
        message,
        deleted,
        leaked_keys,
    })
}
