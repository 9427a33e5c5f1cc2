//! Durable snapshot files.
//!
//! Each snapshot is a directory under the store's `snapshots/` root:
//!
//! ```text
//! snapshots/
//! ├── 1-42-1/
//! │   ├── meta.json    # log position, membership, snapshot id
//! │   └── data.json    # the key-value map: {"k1":"v1",...}
//! └── 1-87-2/
//!     ├── meta.json
//!     └── data.json
//! ```
//!
//! A snapshot is written into a hidden temp directory and renamed into
//! place, so a crash mid-persist never publishes a half-written snapshot.
//! The newest [`RETAIN_SNAPSHOT_COUNT`] snapshots are kept; older ones are
//! deleted only after a newer one is durably on disk.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write as IoWrite};
use std::path::{Path, PathBuf};

use crate::types::{StoreLogId, StoreSnapshotMeta};

/// How many snapshots to retain on disk.
pub const RETAIN_SNAPSHOT_COUNT: usize = 2;

/// A snapshot loaded from disk.
#[derive(Debug, Clone)]
pub struct StoredSnapshot {
    /// Snapshot metadata.
    pub meta: StoreSnapshotMeta,
    /// Serialized key-value map.
    pub data: Vec<u8>,
}

/// File-backed snapshot storage with bounded retention.
#[derive(Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Create or open the snapshot store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, std::io::Error> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Durably persist a snapshot, then prune snapshots beyond the
    /// retention count. A failed write removes the partial directory so the
    /// store never publishes it.
    pub fn save(&self, meta: &StoreSnapshotMeta, data: &[u8]) -> Result<(), std::io::Error> {
        let final_dir = self.dir.join(&meta.snapshot_id);
        let temp_dir = self.dir.join(format!(".tmp-{}", meta.snapshot_id));

        if let Err(e) = self.write_snapshot_dir(&temp_dir, meta, data) {
            let _ = fs::remove_dir_all(&temp_dir);
            return Err(e);
        }

        if final_dir.exists() {
            fs::remove_dir_all(&final_dir)?;
        }
        fs::rename(&temp_dir, &final_dir)?;

        self.prune()?;
        Ok(())
    }

    /// Load the newest snapshot, if any.
    pub fn load_latest(&self) -> Result<Option<StoredSnapshot>, std::io::Error> {
        let entries = self.sorted_entries()?;
        let Some((_, path)) = entries.last() else {
            return Ok(None);
        };
        self.load_from(path).map(Some)
    }

    fn write_snapshot_dir(
        &self,
        dir: &Path,
        meta: &StoreSnapshotMeta,
        data: &[u8],
    ) -> Result<(), std::io::Error> {
        fs::create_dir_all(dir)?;

        let meta_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(dir.join("meta.json"))?;
        let mut writer = BufWriter::new(meta_file);
        serde_json::to_writer(&mut writer, meta)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        let data_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(dir.join("data.json"))?;
        let mut writer = BufWriter::new(data_file);
        writer.write_all(data)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        Ok(())
    }

    fn load_from(&self, dir: &Path) -> Result<StoredSnapshot, std::io::Error> {
        let meta_file = File::open(dir.join("meta.json"))?;
        let meta: StoreSnapshotMeta = serde_json::from_reader(BufReader::new(meta_file))
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let data = fs::read(dir.join("data.json"))?;
        Ok(StoredSnapshot { meta, data })
    }

    /// All published snapshots, sorted oldest-first by the log position
    /// they cover. Temp directories and unreadable entries are skipped.
    fn sorted_entries(&self) -> Result<Vec<(Option<StoreLogId>, PathBuf)>, std::io::Error> {
        let mut entries = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if name.starts_with(".tmp-") {
                    continue;
                }
            }

            let meta_path = path.join("meta.json");
            let Ok(meta_file) = File::open(&meta_path) else {
                continue;
            };
            let Ok(meta) = serde_json::from_reader::<_, StoreSnapshotMeta>(BufReader::new(
                meta_file,
            )) else {
                continue;
            };

            entries.push((meta.last_log_id, path));
        }

        entries.sort();
        Ok(entries)
    }

    fn prune(&self) -> Result<(), std::io::Error> {
        let entries = self.sorted_entries()?;
        if entries.len() <= RETAIN_SNAPSHOT_COUNT {
            return Ok(());
        }

        let excess = entries.len() - RETAIN_SNAPSHOT_COUNT;
        for (_, path) in entries.into_iter().take(excess) {
            fs::remove_dir_all(&path)?;
        }
        Ok(())
    }
}
