//! Network layer for Raft RPC between cluster members.
//!
//! Raft frames travel over gRPC (tonic); each frame is an opaque serialized
//! payload so the envelope stays stable across protocol versions.

mod client;
mod server;

pub use client::NetworkClient;
pub use server::RaftServer;
