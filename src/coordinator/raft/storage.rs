use crate::coordinator::lease_table::{LeaseTable, LockCommand, LockResponse, SharedLeases};
use anyhow::Result;
use openraft::storage::{Adaptor, LogState, RaftStorage};
use openraft::{
    Entry, EntryPayload, ErrorSubject, ErrorVerb, LogId, OptionalSend, RaftLogReader,
    RaftSnapshotBuilder, Snapshot, SnapshotMeta, StorageError, StoredMembership, Vote,
};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::io::Cursor;
use std::ops::RangeBounds;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

pub type NodeIdType = u64;

openraft::declare_raft_types!(
    pub TypeConfig:
        D = LockCommand,
        R = LockResponse,
        Node = LockNode,
);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LockNode {
    pub addr: String,
}

impl std::fmt::Display for LockNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.addr)
    }
}

const KEY_VOTE: &[u8] = b"vote";
const KEY_LAST_PURGED: &[u8] = b"last_purged";
const KEY_LAST_APPLIED: &[u8] = b"last_applied";
const KEY_MEMBERSHIP: &[u8] = b"membership";
const KEY_SNAPSHOT_IDX: &[u8] = b"snapshot_idx";
const KEY_LEASE_SNAPSHOT: &[u8] = b"lease_snapshot";
const KEY_CURRENT_SNAPSHOT: &[u8] = b"current_snapshot";

/// Last built or installed snapshot, kept so lagging followers can be sent
/// it after the log they need has been purged.
#[derive(Serialize, Deserialize)]
struct StoredSnapshot {
    meta: SnapshotMeta<NodeIdType, LockNode>,
    data: Vec<u8>,
}

fn storage_err<E>(subject: ErrorSubject<NodeIdType>, verb: ErrorVerb, e: E) -> StorageError<NodeIdType>
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    StorageError::from_io_error(subject, verb, std::io::Error::new(std::io::ErrorKind::Other, e))
}

/// Raft log, vote, membership and lease table persisted in sled.
pub struct SledStorage {
    db: sled::Db,
    log_tree: sled::Tree,
    meta_tree: sled::Tree,
    leases: SharedLeases,
    snapshot_idx: Mutex<u64>,
}

impl SledStorage {
    pub fn new<P: AsRef<Path>>(path: P, leases: SharedLeases) -> Result<Self> {
        let db = sled::open(path)?;
        let log_tree = db.open_tree("raft_log")?;
        let meta_tree = db.open_tree("raft_meta")?;

        let snapshot_idx = meta_tree
            .get(KEY_SNAPSHOT_IDX)?
            .and_then(|v| bincode::deserialize(&v).ok())
            .unwrap_or(0);

        if let Some(data) = meta_tree.get(KEY_LEASE_SNAPSHOT)? {
            if let Ok(table) = serde_json::from_slice::<LeaseTable>(&data) {
                leases.restore(table);
                tracing::info!("Restored lease table from snapshot");
            }
        }

        Ok(Self {
            db,
            log_tree,
            meta_tree,
            leases,
            snapshot_idx: Mutex::new(snapshot_idx),
        })
    }

    fn log_key(index: u64) -> [u8; 8] {
        index.to_be_bytes()
    }

    fn get_meta<T: serde::de::DeserializeOwned>(&self, key: &[u8]) -> Option<T> {
        self.meta_tree
            .get(key)
            .ok()
            .flatten()
            .and_then(|v| bincode::deserialize(&v).ok())
    }

    fn put_meta<T: Serialize>(&self, key: &[u8], value: &T) -> Result<()> {
        let data = bincode::serialize(value)?;
        self.meta_tree.insert(key, data)?;
        Ok(())
    }

    fn get_membership(&self) -> StoredMembership<NodeIdType, LockNode> {
        self.meta_tree
            .get(KEY_MEMBERSHIP)
            .ok()
            .flatten()
            .and_then(|v| serde_json::from_slice(&v).ok())
            .unwrap_or_default()
    }

    fn set_membership(&self, membership: &StoredMembership<NodeIdType, LockNode>) -> Result<()> {
        let data = serde_json::to_vec(membership)?;
        self.meta_tree.insert(KEY_MEMBERSHIP, data)?;
        Ok(())
    }

    fn save_lease_snapshot(&self) -> Result<()> {
        let data = serde_json::to_vec(&self.leases.snapshot())?;
        self.meta_tree.insert(KEY_LEASE_SNAPSHOT, data)?;
        self.meta_tree.flush()?;
        Ok(())
    }

    fn save_current_snapshot(&self, meta: &SnapshotMeta<NodeIdType, LockNode>, data: &[u8]) -> Result<()> {
        let stored = StoredSnapshot {
            meta: meta.clone(),
            data: data.to_vec(),
        };
        self.meta_tree.insert(KEY_CURRENT_SNAPSHOT, serde_json::to_vec(&stored)?)?;
        self.meta_tree.flush()?;
        Ok(())
    }

    fn load_current_snapshot(&self) -> Result<Option<StoredSnapshot>> {
        match self.meta_tree.get(KEY_CURRENT_SNAPSHOT)? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    fn handle(&self) -> Self {
        SledStorage {
            db: self.db.clone(),
            log_tree: self.log_tree.clone(),
            meta_tree: self.meta_tree.clone(),
            leases: self.leases.clone(),
            snapshot_idx: Mutex::new(*self.snapshot_idx.lock().unwrap_or_else(PoisonError::into_inner)),
        }
    }

    fn remove_logs(&self, keys: Vec<sled::IVec>) -> Result<(), StorageError<NodeIdType>> {
        for key in keys {
            self.log_tree
                .remove(key)
                .map_err(|e| storage_err(ErrorSubject::Logs, ErrorVerb::Write, e))?;
        }
        Ok(())
    }
}

impl RaftLogReader<TypeConfig> for SledStorage {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug + OptionalSend>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry<TypeConfig>>, StorageError<NodeIdType>> {
        let start = match range.start_bound() {
            std::ops::Bound::Included(&s) => s,
            std::ops::Bound::Excluded(&s) => s + 1,
            std::ops::Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            std::ops::Bound::Included(&e) => Some(e + 1),
            std::ops::Bound::Excluded(&e) => Some(e),
            std::ops::Bound::Unbounded => None,
        };

        let mut entries = Vec::new();
        for item in self.log_tree.range(Self::log_key(start)..) {
            let (key, value) = item.map_err(|e| storage_err(ErrorSubject::Logs, ErrorVerb::Read, e))?;

            let raw: [u8; 8] = key
                .as_ref()
                .try_into()
                .map_err(|_| storage_err(ErrorSubject::Logs, ErrorVerb::Read, "malformed log key"))?;
            let index = u64::from_be_bytes(raw);
            if let Some(e) = end {
                if index >= e {
                    break;
                }
            }

            let entry: Entry<TypeConfig> = serde_json::from_slice(&value)
                .map_err(|e| storage_err(ErrorSubject::Logs, ErrorVerb::Read, e))?;
            entries.push(entry);
        }

        Ok(entries)
    }
}

impl RaftSnapshotBuilder<TypeConfig> for SledStorage {
    async fn build_snapshot(&mut self) -> Result<Snapshot<TypeConfig>, StorageError<NodeIdType>> {
        let data = serde_json::to_vec(&self.leases.snapshot())
            .map_err(|e| storage_err(ErrorSubject::StateMachine, ErrorVerb::Read, e))?;

        let last_applied: Option<LogId<NodeIdType>> = self.get_meta(KEY_LAST_APPLIED);
        let last_membership = self.get_membership();

        let snapshot_idx = {
            let mut idx = self.snapshot_idx.lock().unwrap_or_else(PoisonError::into_inner);
            *idx += 1;
            *idx
        };
        self.put_meta(KEY_SNAPSHOT_IDX, &snapshot_idx)
            .map_err(|e| storage_err(ErrorSubject::StateMachine, ErrorVerb::Write, e))?;

        let snapshot_id = format!(
            "{}-{}-{}",
            last_applied
                .map(|l| l.leader_id.to_string())
                .unwrap_or_default(),
            last_applied.map(|l| l.index).unwrap_or(0),
            snapshot_idx
        );

        let meta = SnapshotMeta {
            last_log_id: last_applied,
            last_membership,
            snapshot_id,
        };
        self.save_current_snapshot(&meta, &data)
            .map_err(|e| storage_err(ErrorSubject::Snapshot(Some(meta.signature())), ErrorVerb::Write, e))?;
        tracing::debug!("Built snapshot {}", meta.snapshot_id);

        Ok(Snapshot {
            meta,
            snapshot: Box::new(Cursor::new(data)),
        })
    }
}

impl RaftStorage<TypeConfig> for SledStorage {
    type LogReader = Self;
    type SnapshotBuilder = Self;

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, StorageError<NodeIdType>> {
        let last_purged = self.get_meta(KEY_LAST_PURGED);

        let last_log_id = self
            .log_tree
            .last()
            .map_err(|e| storage_err(ErrorSubject::Logs, ErrorVerb::Read, e))?
            .and_then(|(_, v)| serde_json::from_slice::<Entry<TypeConfig>>(&v).ok())
            .map(|e| e.log_id);

        Ok(LogState {
            last_purged_log_id: last_purged,
            last_log_id: last_log_id.or(last_purged),
        })
    }

    async fn save_vote(&mut self, vote: &Vote<NodeIdType>) -> Result<(), StorageError<NodeIdType>> {
        self.put_meta(KEY_VOTE, vote)
            .and_then(|_| self.meta_tree.flush().map(|_| ()).map_err(Into::into))
            .map_err(|e| storage_err(ErrorSubject::Vote, ErrorVerb::Write, e))
    }

    async fn read_vote(&mut self) -> Result<Option<Vote<NodeIdType>>, StorageError<NodeIdType>> {
        Ok(self.get_meta(KEY_VOTE))
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        self.handle()
    }

    async fn append_to_log<I>(&mut self, entries: I) -> Result<(), StorageError<NodeIdType>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + OptionalSend,
    {
        for entry in entries {
            let key = Self::log_key(entry.log_id.index);
            let value = serde_json::to_vec(&entry)
                .map_err(|e| storage_err(ErrorSubject::Logs, ErrorVerb::Write, e))?;
            self.log_tree
                .insert(key, value)
                .map_err(|e| storage_err(ErrorSubject::Logs, ErrorVerb::Write, e))?;
        }
        self.log_tree
            .flush()
            .map_err(|e| storage_err(ErrorSubject::Logs, ErrorVerb::Write, e))?;
        Ok(())
    }

    async fn delete_conflict_logs_since(
        &mut self,
        log_id: LogId<NodeIdType>,
    ) -> Result<(), StorageError<NodeIdType>> {
        let keys: Vec<_> = self
            .log_tree
            .range(Self::log_key(log_id.index)..)
            .filter_map(|r| r.ok().map(|(k, _)| k))
            .collect();
        self.remove_logs(keys)
    }

    async fn purge_logs_upto(
        &mut self,
        log_id: LogId<NodeIdType>,
    ) -> Result<(), StorageError<NodeIdType>> {
        self.put_meta(KEY_LAST_PURGED, &log_id)
            .map_err(|e| storage_err(ErrorSubject::Logs, ErrorVerb::Write, e))?;

        let keys: Vec<_> = self
            .log_tree
            .range(..=Self::log_key(log_id.index))
            .filter_map(|r| r.ok().map(|(k, _)| k))
            .collect();
        self.remove_logs(keys)
    }

    async fn last_applied_state(
        &mut self,
    ) -> Result<
        (
            Option<LogId<NodeIdType>>,
            StoredMembership<NodeIdType, LockNode>,
        ),
        StorageError<NodeIdType>,
    > {
        Ok((self.get_meta(KEY_LAST_APPLIED), self.get_membership()))
    }

    async fn apply_to_state_machine(
        &mut self,
        entries: &[Entry<TypeConfig>],
    ) -> Result<Vec<LockResponse>, StorageError<NodeIdType>> {
        let mut responses = Vec::with_capacity(entries.len());

        for entry in entries {
            self.put_meta(KEY_LAST_APPLIED, &entry.log_id)
                .map_err(|e| storage_err(ErrorSubject::StateMachine, ErrorVerb::Write, e))?;
            self.leases.set_last_applied(entry.log_id.index);

            let response = match &entry.payload {
                EntryPayload::Blank => LockResponse::Ack,
                EntryPayload::Normal(cmd) => self.leases.apply(cmd),
                EntryPayload::Membership(mem) => {
                    let membership = StoredMembership::new(Some(entry.log_id), mem.clone());
                    self.set_membership(&membership)
                        .map_err(|e| storage_err(ErrorSubject::StateMachine, ErrorVerb::Write, e))?;
                    LockResponse::Ack
                }
            };
            responses.push(response);
        }

        self.save_lease_snapshot()
            .map_err(|e| storage_err(ErrorSubject::StateMachine, ErrorVerb::Write, e))?;

        Ok(responses)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        self.handle()
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<Box<Cursor<Vec<u8>>>, StorageError<NodeIdType>> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta<NodeIdType, LockNode>,
        snapshot: Box<Cursor<Vec<u8>>>,
    ) -> Result<(), StorageError<NodeIdType>> {
        let data = snapshot.into_inner();
        let table: LeaseTable = serde_json::from_slice(&data).map_err(|e| {
            storage_err(ErrorSubject::Snapshot(Some(meta.signature())), ErrorVerb::Read, e)
        })?;

        self.leases.restore(table);

        if let Some(log_id) = meta.last_log_id {
            self.put_meta(KEY_LAST_APPLIED, &log_id)
                .map_err(|e| storage_err(ErrorSubject::StateMachine, ErrorVerb::Write, e))?;
        }

        self.set_membership(&meta.last_membership)
            .map_err(|e| storage_err(ErrorSubject::StateMachine, ErrorVerb::Write, e))?;

        self.save_lease_snapshot()
            .map_err(|e| storage_err(ErrorSubject::StateMachine, ErrorVerb::Write, e))?;
        self.save_current_snapshot(meta, &data)
            .map_err(|e| storage_err(ErrorSubject::Snapshot(Some(meta.signature())), ErrorVerb::Write, e))?;

        Ok(())
    }

    async fn get_current_snapshot(
        &mut self,
    ) -> Result<Option<Snapshot<TypeConfig>>, StorageError<NodeIdType>> {
        let stored = self
            .load_current_snapshot()
            .map_err(|e| storage_err(ErrorSubject::Snapshot(None), ErrorVerb::Read, e))?;

        Ok(stored.map(|stored| Snapshot {
            meta: stored.meta,
            snapshot: Box::new(Cursor::new(stored.data)),
        }))
    }
}

pub type SledLogStore = Adaptor<TypeConfig, SledStorage>;
pub type SledStateMachine = Adaptor<TypeConfig, SledStorage>;

pub fn create_storage<P: AsRef<Path>>(
    path: P,
    leases: SharedLeases,
) -> Result<(SledLogStore, SledStateMachine)> {
    let storage = SledStorage::new(path, leases)?;
    Ok(Adaptor::new(storage))
}
