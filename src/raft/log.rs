//! Durable Raft log and stable store.
//!
//! The log store uses segmented NDJSON files for cheap append and purge:
//!
//! - **Append**: O(1), buffered write to the active segment plus fsync.
//! - **Purge**: O(1), deletion of fully covered segment files.
//! - **Truncate**: O(segment size), rewrite of the boundary segment only.
//!
//! ## Storage layout
//!
//! ```text
//! <data_dir>/
//! ├── vote.json                 # stable store: current term and vote
//! └── log/
//!     ├── meta.json             # last_purged_log_id, committed
//!     ├── seg_000000000000.log  # entries 0-999 (closed)
//!     └── seg_000000001000.log  # entries 1000+ (active)
//! ```
//!
//! One JSON object per line keeps replicated records human-debuggable. A
//! record that fails to parse during load fails the open: an undecodable
//! entry must never be skipped silently, or replicas could diverge.

use openraft::storage::{LogFlushed, RaftLogStorage};
use openraft::{LogState, RaftLogReader, StorageIOError, Vote};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write as IoWrite};
use std::ops::RangeBounds;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::types::{NodeId, StoreEntry, StoreLogId, StoreStorageError, TypeConfig};

/// Maximum entries per segment before rotating to a new segment file.
const SEGMENT_MAX_ENTRIES: usize = 1000;

/// Name of the stable-store file under the data dir.
const VOTE_FILE: &str = "vote.json";

/// Name of the log metadata file under the log dir.
const META_FILE: &str = "meta.json";

/// Persisted vote state.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedVote {
    term: u64,
    node_id: NodeId,
    committed: bool,
}

/// Persisted log metadata.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PersistedLogMeta {
    last_purged_log_id: Option<StoreLogId>,
    committed: Option<StoreLogId>,
}

/// Durable storage for Raft log entries and vote state.
#[derive(Clone)]
pub struct LogStore {
    inner: Arc<RwLock<LogStoreInner>>,
}

impl LogStore {
    /// Create or open the log store under `data_dir`, loading any existing
    /// segments, vote, and metadata.
    pub fn open(data_dir: &Path) -> Result<Self, std::io::Error> {
        let log_dir = data_dir.join("log");
        fs::create_dir_all(&log_dir)?;

        let mut inner = LogStoreInner::new(data_dir.join(VOTE_FILE), log_dir);
        inner.load_segments()?;
        inner.load_vote()?;
        inner.load_meta()?;

        Ok(Self {
            inner: Arc::new(RwLock::new(inner)),
        })
    }
}

struct LogStoreInner {
    /// Stable-store file path.
    vote_path: PathBuf,
    /// Directory holding segment files and log metadata.
    log_dir: PathBuf,
    /// In-memory log entries for fast indexed reads.
    logs: BTreeMap<u64, StoreEntry>,
    /// Last purged log ID.
    last_purged_log_id: Option<StoreLogId>,
    /// Committed log ID.
    committed: Option<StoreLogId>,
    /// Current vote state.
    vote: Option<Vote<NodeId>>,
    /// Currently writable segment.
    active: Option<ActiveSegment>,
}

struct ActiveSegment {
    /// First log index covered by this segment.
    first_index: u64,
    /// Number of entries written to it.
    entry_count: usize,
    /// File handle for appending.
    writer: BufWriter<File>,
}

impl LogStoreInner {
    fn new(vote_path: PathBuf, log_dir: PathBuf) -> Self {
        Self {
            vote_path,
            log_dir,
            logs: BTreeMap::new(),
            last_purged_log_id: None,
            committed: None,
            vote: None,
            active: None,
        }
    }

    // ---- segments ----

    fn segment_filename(first_index: u64) -> String {
        format!("seg_{:012}.log", first_index)
    }

    fn parse_segment_filename(filename: &str) -> Option<u64> {
        let index = filename.strip_prefix("seg_")?.strip_suffix(".log")?;
        index.parse().ok()
    }

    /// All segment files sorted by first index.
    fn list_segments(&self) -> Result<Vec<(u64, PathBuf)>, std::io::Error> {
        let paths = fs::read_dir(&self.log_dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut segments: Vec<(u64, PathBuf)> = paths
            .into_iter()
            .filter_map(|path| {
                let first_index = Self::parse_segment_filename(path.file_name()?.to_str()?)?;
                Some((first_index, path))
            })
            .collect();

        segments.sort_by_key(|(first_index, _)| *first_index);
        Ok(segments)
    }

    fn load_segments(&mut self) -> Result<(), std::io::Error> {
        let segments = self.list_segments()?;

        for (_, path) in &segments {
            self.logs.extend(read_segment(path)?);
        }

        // Reopen the last segment as active if it still has room.
        if let Some((first_index, path)) = segments.last() {
            let entry_count = self.logs.range(*first_index..).count();

            if entry_count < SEGMENT_MAX_ENTRIES {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                self.active = Some(ActiveSegment {
                    first_index: *first_index,
                    entry_count,
                    writer: BufWriter::new(file),
                });
            }
        }

        Ok(())
    }

    /// Rewrite one segment file in place.
    fn write_segment_file(
        &self,
        first_index: u64,
        entries: &[StoreEntry],
    ) -> Result<(), std::io::Error> {
        let path = self.log_dir.join(Self::segment_filename(first_index));
        write_atomic(&path, |writer| {
            entries.iter().try_for_each(|entry| {
                let json = serde_json::to_string(entry).map_err(invalid_data)?;
                writeln!(writer, "{}", json)
            })
        })
    }

    fn start_new_segment(&mut self, first_index: u64) -> Result<(), std::io::Error> {
        // Align to segment boundary so reopened stores find the same files.
        let aligned_first = (first_index / SEGMENT_MAX_ENTRIES as u64) * SEGMENT_MAX_ENTRIES as u64;

        let path = self.log_dir.join(Self::segment_filename(aligned_first));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        self.active = Some(ActiveSegment {
            first_index: aligned_first,
            entry_count: 0,
            writer: BufWriter::new(file),
        });

        Ok(())
    }

    fn is_active_segment(&self, first_index: u64) -> bool {
        self.active
            .as_ref()
            .map(|s| s.first_index == first_index)
            .unwrap_or(false)
    }

    // ---- entries ----

    fn append_entries(&mut self, entries: Vec<StoreEntry>) -> Result<(), std::io::Error> {
        if entries.is_empty() {
            return Ok(());
        }

        for entry in entries {
            if self.active.is_none() {
                self.start_new_segment(entry.log_id.index)?;
            }

            let active = self
                .active
                .as_mut()
                .expect("active segment must exist after start_new_segment");

            if active.entry_count >= SEGMENT_MAX_ENTRIES {
                active.writer.flush()?;
                active.writer.get_ref().sync_all()?;
                self.start_new_segment(entry.log_id.index)?;
            }

            let active = self
                .active
                .as_mut()
                .expect("active segment must exist after rotation check");
            let json = serde_json::to_string(&entry).map_err(invalid_data)?;
            writeln!(active.writer, "{}", json)?;
            active.entry_count += 1;

            self.logs.insert(entry.log_id.index, entry);
        }

        if let Some(active) = &mut self.active {
            active.writer.flush()?;
            active.writer.get_ref().sync_all()?;
        }

        Ok(())
    }

    /// Drop entries at or below `log_id`, deleting fully covered segments.
    fn purge_entries(&mut self, log_id: StoreLogId) -> Result<(), std::io::Error> {
        let purge_index = log_id.index;

        self.last_purged_log_id = Some(log_id);

        let keys: Vec<u64> = self.logs.range(..=purge_index).map(|(k, _)| *k).collect();
        for key in keys {
            self.logs.remove(&key);
        }

        for (first_index, path) in self.list_segments()? {
            let last_index_in_segment = first_index + SEGMENT_MAX_ENTRIES as u64 - 1;

            if last_index_in_segment <= purge_index {
                if self.is_active_segment(first_index) {
                    self.active = None;
                }
                fs::remove_file(&path)?;
            }
        }

        self.save_meta()?;
        Ok(())
    }

    /// Drop entries at or above `log_id`, rewriting the boundary segment.
    fn truncate_entries(&mut self, log_id: StoreLogId) -> Result<(), std::io::Error> {
        let truncate_index = log_id.index;

        let keys: Vec<u64> = self.logs.range(truncate_index..).map(|(k, _)| *k).collect();
        for key in keys {
            self.logs.remove(&key);
        }

        for (first_index, path) in self.list_segments()? {
            if first_index >= truncate_index {
                if self.is_active_segment(first_index) {
                    self.active = None;
                }
                fs::remove_file(&path)?;
            } else if first_index + SEGMENT_MAX_ENTRIES as u64 > truncate_index {
                // The truncate point falls inside this segment.
                let entries: Vec<StoreEntry> = self
                    .logs
                    .range(first_index..truncate_index)
                    .map(|(_, e)| e.clone())
                    .collect();

                if self.is_active_segment(first_index) {
                    self.active = None;
                }

                if entries.is_empty() {
                    fs::remove_file(&path)?;
                } else {
                    self.write_segment_file(first_index, &entries)?;

                    let file = OpenOptions::new().create(true).append(true).open(&path)?;
                    self.active = Some(ActiveSegment {
                        first_index,
                        entry_count: entries.len(),
                        writer: BufWriter::new(file),
                    });
                }
            }
        }

        Ok(())
    }

    // ---- vote and metadata ----

    fn load_vote(&mut self) -> Result<(), std::io::Error> {
        if !self.vote_path.exists() {
            return Ok(());
        }

        let file = File::open(&self.vote_path)?;
        let persisted: PersistedVote =
            serde_json::from_reader(BufReader::new(file)).map_err(invalid_data)?;

        let mut vote = Vote::new(persisted.term, persisted.node_id);
        if persisted.committed {
            vote.commit();
        }

        self.vote = Some(vote);
        Ok(())
    }

    fn save_vote_to_disk(&self, vote: &Vote<NodeId>) -> Result<(), std::io::Error> {
        let persisted = PersistedVote {
            term: vote.leader_id().term,
            node_id: vote.leader_id().node_id,
            committed: vote.is_committed(),
        };

        write_json_atomic(&self.vote_path, &persisted)
    }

    fn load_meta(&mut self) -> Result<(), std::io::Error> {
        let meta_path = self.log_dir.join(META_FILE);
        if !meta_path.exists() {
            return Ok(());
        }

        let file = File::open(&meta_path)?;
        let meta: PersistedLogMeta =
            serde_json::from_reader(BufReader::new(file)).map_err(invalid_data)?;

        self.last_purged_log_id = meta.last_purged_log_id;
        self.committed = meta.committed;
        Ok(())
    }

    fn save_meta(&self) -> Result<(), std::io::Error> {
        let meta = PersistedLogMeta {
            last_purged_log_id: self.last_purged_log_id,
            committed: self.committed,
        };

        write_json_atomic(&self.log_dir.join(META_FILE), &meta)
    }
}

fn invalid_data(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, err)
}

/// Parse one segment file into `(index, entry)` pairs. An undecodable line
/// is an error, never skipped.
fn read_segment(path: &Path) -> Result<Vec<(u64, StoreEntry)>, std::io::Error> {
    BufReader::new(File::open(path)?)
        .lines()
        .filter(|line| !matches!(line.as_deref(), Ok("")))
        .map(|line| {
            let entry: StoreEntry = serde_json::from_str(&line?).map_err(invalid_data)?;
            Ok((entry.log_id.index, entry))
        })
        .collect()
}

/// Write a file through a temp sibling, fsync, and rename into place, so a
/// crash mid-write never publishes a partial file.
fn write_atomic(
    path: &Path,
    write: impl FnOnce(&mut BufWriter<File>) -> Result<(), std::io::Error>,
) -> Result<(), std::io::Error> {
    let temp_path = path.with_extension("tmp");

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&temp_path)?;
    let mut writer = BufWriter::new(file);
    write(&mut writer)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;

    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Atomically replace `path` with the JSON serialization of `value`.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), std::io::Error> {
    write_atomic(path, |writer| {
        serde_json::to_writer(writer, value).map_err(invalid_data)
    })
}

/// Implementation of OpenRaft's log reader interface.
impl RaftLogReader<TypeConfig> for LogStore {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug>(
        &mut self,
        range: RB,
    ) -> Result<Vec<StoreEntry>, StoreStorageError> {
        let inner = self.inner.read().await;
        let entries: Vec<StoreEntry> = inner.logs.range(range).map(|(_, e)| e.clone()).collect();
        Ok(entries)
    }
}

/// Implementation of OpenRaft's log storage interface.
impl RaftLogStorage<TypeConfig> for LogStore {
    type LogReader = Self;

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, StoreStorageError> {
        let inner = self.inner.read().await;

        let last_log_id = inner.logs.values().last().map(|e| e.log_id);
        let last_purged_log_id = inner.last_purged_log_id;

        // An empty log after a purge still ends at the purge point.
        let last_log_id = last_log_id.or(last_purged_log_id);

        Ok(LogState {
            last_purged_log_id,
            last_log_id,
        })
    }

    async fn save_committed(
        &mut self,
        committed: Option<StoreLogId>,
    ) -> Result<(), StoreStorageError> {
        let mut inner = self.inner.write().await;
        inner.committed = committed;
        inner
            .save_meta()
            .map_err(|e| StorageIOError::write_logs(&e))?;
        Ok(())
    }

    async fn read_committed(&mut self) -> Result<Option<StoreLogId>, StoreStorageError> {
        let inner = self.inner.read().await;
        Ok(inner.committed)
    }

    async fn save_vote(&mut self, vote: &Vote<NodeId>) -> Result<(), StoreStorageError> {
        let mut inner = self.inner.write().await;
        inner
            .save_vote_to_disk(vote)
            .map_err(|e| StorageIOError::write_vote(&e))?;
        inner.vote = Some(*vote);
        Ok(())
    }

    async fn read_vote(&mut self) -> Result<Option<Vote<NodeId>>, StoreStorageError> {
        let inner = self.inner.read().await;
        Ok(inner.vote)
    }

    async fn append<I>(
        &mut self,
        entries: I,
        callback: LogFlushed<TypeConfig>,
    ) -> Result<(), StoreStorageError>
    where
        I: IntoIterator<Item = StoreEntry>,
    {
        let mut inner = self.inner.write().await;

        let entries: Vec<StoreEntry> = entries.into_iter().collect();
        inner
            .append_entries(entries)
            .map_err(|e| StorageIOError::write_logs(&e))?;

        callback.log_io_completed(Ok(()));
        Ok(())
    }

    async fn truncate(&mut self, log_id: StoreLogId) -> Result<(), StoreStorageError> {
        let mut inner = self.inner.write().await;
        inner
            .truncate_entries(log_id)
            .map_err(|e| StorageIOError::write_logs(&e))?;
        Ok(())
    }

    async fn purge(&mut self, log_id: StoreLogId) -> Result<(), StoreStorageError> {
        let mut inner = self.inner.write().await;
        inner
            .purge_entries(log_id)
            .map_err(|e| StorageIOError::write_logs(&e))?;
        Ok(())
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        self.clone()
    }
}
