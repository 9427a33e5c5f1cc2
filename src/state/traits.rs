//! OpenRaft trait implementations for the state machine.

use openraft::storage::RaftStateMachine;
use openraft::{
    EntryPayload, RaftSnapshotBuilder, RaftTypeConfig, StorageIOError, StoredMembership,
};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::command::Applied;
use crate::types::{
    StoreLogId, StoreSnapshot, StoreSnapshotMeta, StoreStorageError, StoreStoredMembership,
    TypeConfig,
};

use super::{apply_command, StoreStateMachine};

/// Snapshot builder: clones the map under the lock, serializes and persists
/// it outside the lock so snapshot I/O never stalls writes.
impl RaftSnapshotBuilder<TypeConfig> for Arc<StoreStateMachine> {
    async fn build_snapshot(&mut self) -> Result<StoreSnapshot, StoreStorageError> {
        let (data_map, last_applied_log, last_membership) = {
            let state = self.state.read().await;
            (
                state.data.clone(),
                state.last_applied_log,
                state.last_membership.clone(),
            )
        };

        let data = serde_json::to_vec(&data_map)
            .map_err(|e| StorageIOError::read_state_machine(&e))?;

        let snapshot_idx = self.snapshot_idx.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot_id = if let Some(last) = last_applied_log {
            format!("{}-{}-{}", last.leader_id, last.index, snapshot_idx)
        } else {
            format!("--{}", snapshot_idx)
        };

        let meta = StoreSnapshotMeta {
            last_log_id: last_applied_log,
            last_membership,
            snapshot_id,
        };

        self.snapshots
            .save(&meta, &data)
            .map_err(|e| StorageIOError::write_snapshot(Some(meta.signature()), &e))?;

        tracing::debug!(snapshot_id = %meta.snapshot_id, keys = data_map.len(), "built snapshot");

        Ok(StoreSnapshot {
            meta,
            snapshot: Box::new(Cursor::new(data)),
        })
    }
}

/// State machine interface: applies committed entries deterministically, in
/// index order, exactly once per entry on every member.
impl RaftStateMachine<TypeConfig> for Arc<StoreStateMachine> {
    type SnapshotBuilder = Self;

    async fn applied_state(
        &mut self,
    ) -> Result<(Option<StoreLogId>, StoreStoredMembership), StoreStorageError> {
        let state = self.state.read().await;
        Ok((state.last_applied_log, state.last_membership.clone()))
    }

    async fn apply<I>(&mut self, entries: I) -> Result<Vec<Applied>, StoreStorageError>
    where
        I: IntoIterator<Item = openraft::Entry<TypeConfig>> + Send,
    {
        let mut responses = Vec::new();
        let mut state = self.state.write().await;

        for entry in entries {
            tracing::debug!(%entry.log_id, "applying to state machine");

            state.last_applied_log = Some(entry.log_id);

            match entry.payload {
                EntryPayload::Blank => {
                    responses.push(Applied);
                }
                EntryPayload::Normal(cmd) => {
                    responses.push(apply_command(&mut state, cmd));
                }
                EntryPayload::Membership(membership) => {
                    state.last_membership = StoredMembership::new(Some(entry.log_id), membership);
                    self.sync_peer_list(&state.last_membership)
                        .map_err(|e| StorageIOError::write_state_machine(&e))?;
                    responses.push(Applied);
                }
            }
        }

        Ok(responses)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        Arc::clone(self)
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<Box<<TypeConfig as RaftTypeConfig>::SnapshotData>, StoreStorageError> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &StoreSnapshotMeta,
        snapshot: Box<<TypeConfig as RaftTypeConfig>::SnapshotData>,
    ) -> Result<(), StoreStorageError> {
        tracing::info!(
            snapshot_size = snapshot.get_ref().len(),
            snapshot_id = %meta.snapshot_id,
            "installing snapshot"
        );

        let data = snapshot.into_inner();
        let new_map: BTreeMap<String, String> = serde_json::from_slice(&data)
            .map_err(|e| StorageIOError::read_snapshot(Some(meta.signature()), &e))?;

        {
            let mut state = self.state.write().await;
            state.data = new_map;
            state.last_applied_log = meta.last_log_id;
            state.last_membership = meta.last_membership.clone();
            self.sync_peer_list(&state.last_membership)
                .map_err(|e| StorageIOError::write_state_machine(&e))?;
        }

        self.snapshots
            .save(meta, &data)
            .map_err(|e| StorageIOError::write_snapshot(Some(meta.signature()), &e))?;

        Ok(())
    }

    async fn get_current_snapshot(&mut self) -> Result<Option<StoreSnapshot>, StoreStorageError> {
        let stored = self
            .snapshots
            .load_latest()
            .map_err(|e| StorageIOError::read_snapshot(None, &e))?;

        Ok(stored.map(|snap| StoreSnapshot {
            meta: snap.meta,
            snapshot: Box::new(Cursor::new(snap.data)),
        }))
    }
}
