//! The persisted peer directory.
//!
//! `peers.json` under the data directory records the addresses of all known
//! cluster members. It is rewritten whenever a membership change commits
//! and read once at open, where it gates single-node bootstrap: a node that
//! has ever been part of a multi-member cluster must never elect itself
//! into a fresh one-member cluster on restart.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write as IoWrite};
use std::path::Path;

use crate::error::{StoreError, StoreResult};

/// Name of the peer directory file under the data dir.
pub const PEERS_FILE: &str = "peers.json";

/// Read the persisted peer address list. A missing or empty file means the
/// node has never recorded cluster membership.
pub fn read_peers(dir: &Path) -> StoreResult<Vec<String>> {
    let path = dir.join(PEERS_FILE);
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(&path)?;
    let metadata = file.metadata()?;
    if metadata.len() == 0 {
        return Ok(Vec::new());
    }

    let reader = BufReader::new(file);
    serde_json::from_reader(reader).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Atomically rewrite the peer address list (temp file, fsync, rename).
pub fn write_peers(dir: &Path, peers: &[String]) -> std::io::Result<()> {
    let path = dir.join(PEERS_FILE);
    let temp_path = dir.join(format!("{}.tmp", PEERS_FILE));

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&temp_path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, peers)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    writer.flush()?;
    writer.get_ref().sync_all()?;

    fs::rename(&temp_path, &path)?;
    Ok(())
}
