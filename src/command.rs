//! Replicated commands and their wire form.
//!
//! Every state mutation goes through [`Command`]. Commands are serialized
//! into the Raft log and applied deterministically on all nodes, so the
//! serialized form is a cross-node wire format: a self-describing JSON
//! object tagged by `op`. JSON keeps replicated records human-debuggable
//! and version-tolerant, and shares one parser with the snapshot payload.

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// A single mutation that is replicated through the log.
///
/// Wire form: `{"op":"set","key":"k","value":"v"}` or
/// `{"op":"delete","key":"k"}`. Deletes carry no value. Unknown fields are
/// ignored on decode so minor schema additions stay compatible between
/// heterogeneous-version members; an unknown `op` fails decode outright,
/// which keeps an undecodable record from ever reaching the apply path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Command {
    /// Unconditionally set `key` to `value`.
    Set { key: String, value: String },
    /// Remove `key`; applying to an absent key is a no-op.
    Delete { key: String },
}

/// The success sentinel returned from applying a committed command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Applied;

impl Command {
    /// Human-readable operation name.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Set { .. } => "set",
            Command::Delete { .. } => "delete",
        }
    }

    /// The key this command mutates.
    pub fn key(&self) -> &str {
        match self {
            Command::Set { key, .. } | Command::Delete { key } => key,
        }
    }

    /// Encode the command into its wire form. Fails only on programming
    /// errors (a command that cannot be represented as JSON).
    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Decode a wire record into a command.
    pub fn decode(bytes: &[u8]) -> StoreResult<Self> {
        serde_json::from_slice(bytes).map_err(StoreError::MalformedCommand)
    }
}
