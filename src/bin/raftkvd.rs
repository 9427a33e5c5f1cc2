//! raftkvd — the replicated key-value store daemon.
//!
//! Starts one cluster member: opens the store, serves the HTTP surface,
//! and optionally joins an existing cluster through a member's HTTP
//! address.

use clap::Parser;
use raftkv::{HttpService, Store, StoreConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

/// raftkvd server
#[derive(Parser, Debug)]
#[command(name = "raftkvd")]
#[command(about = "Distributed key-value store replicated with Raft")]
#[command(version)]
struct Args {
    /// Unique node ID within the cluster
    #[arg(long)]
    id: u64,

    /// HTTP bind address
    #[arg(long, default_value = "127.0.0.1:11000")]
    haddr: String,

    /// Raft transport bind address
    #[arg(long, default_value = "127.0.0.1:11001")]
    raddr: String,

    /// Raft address advertised to other nodes (defaults to the bind address)
    #[arg(long)]
    advertise: Option<String>,

    /// Storage directory for Raft state
    #[arg(long)]
    rdir: PathBuf,

    /// HTTP address of a cluster member to join through, if any
    #[arg(long)]
    join: Option<String>,

    /// Allow this node to bootstrap a new single-node cluster
    #[arg(long)]
    bootstrap: bool,
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,raftkv=debug"));
    fmt().with_env_filter(filter).with_target(true).init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    };

    let mut builder = StoreConfig::builder()
        .node_id(args.id)
        .raft_bind(args.raddr.as_str())
        .data_dir(&args.rdir);
    if let Some(advertise) = &args.advertise {
        builder = builder.advertise_addr(advertise.as_str());
    }

    let config = match builder.build() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let advertised = config.advertise_addr().to_string();

    let store = match Store::open(config, args.bootstrap).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!("failed to open store: {}", e);
            std::process::exit(1);
        }
    };

    let http = HttpService::new(args.haddr.clone(), Arc::clone(&store));
    if let Err(e) = http.start().await {
        tracing::error!("failed to start http service: {}", e);
        std::process::exit(1);
    }

    if let Some(join_addr) = &args.join {
        if let Err(e) = request_join(join_addr, args.id, &advertised).await {
            tracing::error!(%join_addr, "join request failed: {}", e);
            std::process::exit(1);
        }
        tracing::info!(%join_addr, "joined cluster");
    }

    tracing::info!(node_id = args.id, haddr = %args.haddr, raddr = %args.raddr, "raftkvd started");

    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutting down");
}

/// Ask a cluster member to add this node. The receiving member must be the
/// leader; a follower answers with its not-leader error.
async fn request_join(join_addr: &str, id: u64, raft_addr: &str) -> Result<(), String> {
    let url = format!("http://{}/join", join_addr);
    let client = reqwest::Client::new();

    let response = client
        .post(&url)
        .json(&serde_json::json!({ "id": id, "addr": raft_addr }))
        .send()
        .await
        .map_err(|e| e.to_string())?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(format!("{}: {}", status, body));
    }

    Ok(())
}
