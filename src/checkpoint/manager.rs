use std::sync::Arc;

use tracing::{debug, error};
use uuid::Uuid;

use super::Checkpoint;
use crate::errors::StorageError;
use crate::storage::CheckpointRepository;

pub const DEFAULT_RETENTION: usize = 10;

/// Writes checkpoints and keeps per-session retention bounded.
pub struct CheckpointManager {
    repo: Arc<dyn CheckpointRepository>,
    retention: usize,
}

impl CheckpointManager {
    pub fn new(repo: Arc<dyn CheckpointRepository>) -> Self {
        Self {
            repo,
            retention: DEFAULT_RETENTION,
        }
    }

    /// Retention below one would delete the checkpoint just written.
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention.max(1);
        self
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Persist a checkpoint, then prune. A failed prune is logged only; the
    /// checkpoint itself is what recovery depends on.
    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StorageError> {
        self.repo.save_checkpoint(checkpoint).await?;
        debug!(
            session = %checkpoint.session_id,
            state = %checkpoint.state,
            batch = checkpoint.batch_index,
            completed = checkpoint.completed_agents.len(),
            pending = checkpoint.pending_agents.len(),
            "Checkpoint saved"
        );
        match self
            .repo
            .prune_checkpoints(checkpoint.session_id, self.retention)
            .await
        {
            Ok(0) => {}
            Ok(n) => debug!(session = %checkpoint.session_id, pruned = n, "Pruned old checkpoints"),
            Err(e) => error!(session = %checkpoint.session_id, error = %e, "Failed to prune checkpoints"),
        }
        Ok(())
    }

    pub async fn latest(&self, session_id: Uuid) -> Result<Option<Checkpoint>, StorageError> {
        self.repo.latest_checkpoint(session_id).await
    }

    pub async fn list(&self, session_id: Uuid) -> Result<Vec<Checkpoint>, StorageError> {
        self.repo.list_checkpoints(session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::PhaseState;
    use crate::storage::MemoryStore;
    use chrono::Utc;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_retention_is_enforced_on_save() {
        let manager = CheckpointManager::new(Arc::new(MemoryStore::new())).with_retention(3);
        let session = Uuid::new_v4();
        for i in 0..6 {
            let cp = Checkpoint::new(
                session,
                PhaseState::Extraction,
                i,
                &BTreeMap::new(),
                vec![],
                0.0,
                Utc::now(),
            );
            manager.save(&cp).await.unwrap();
        }
        let kept = manager.list(session).await.unwrap();
        assert_eq!(kept.len(), 3);
        assert_eq!(manager.latest(session).await.unwrap().unwrap().batch_index, 5);
    }

    #[test]
    fn test_zero_retention_is_clamped() {
        let manager = CheckpointManager::new(Arc::new(MemoryStore::new())).with_retention(0);
        assert_eq!(manager.retention(), 1);
    }
}
