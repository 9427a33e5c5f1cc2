//! Thin HTTP adapter over the store.
//!
//! Translates the key-value surface to HTTP:
//!
//! - `GET /key/{key}` — local read; returns `{"<key>":"<value>"}` with an
//!   empty value for an absent key. May be stale on a follower. An empty
//!   key is a 400.
//! - `POST /key` — body `{"k":"v",...}`; each pair is set through
//!   consensus. The first failure aborts the remainder.
//! - `DELETE /key/{key}` — delete through consensus. An empty key is a 400.
//! - `POST /join` — body `{"id":<node-id>,"addr":"host:port"}`; adds the
//!   node to the cluster. Leader only.
//! - `GET /status` — node id, role, leader, term.
//!
//! Write and join failures (`NotLeader`, timeouts, storage errors) are
//! returned as 500 with the error text; a client that sees the not-leader
//! text is expected to locate the leader itself. Malformed bodies are 400.

use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::error::{StoreError, StoreResult};
use crate::raft::Store;
use crate::types::NodeId;

/// The HTTP front end for one store node.
pub struct HttpService {
    bind_addr: String,
    store: Arc<Store>,
}

impl HttpService {
    /// Create a new service serving `store` on `bind_addr`.
    pub fn new(bind_addr: impl Into<String>, store: Arc<Store>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            store,
        }
    }

    /// Bind the listener and spawn the accept loop. Returns the bound
    /// address so callers may bind port 0.
    pub async fn start(&self) -> StoreResult<SocketAddr> {
        let app = router(Arc::clone(&self.store));

        let listener = TcpListener::bind(&self.bind_addr)
            .await
            .map_err(|e| StoreError::TransportBind(e.to_string()))?;
        let addr = listener.local_addr()?;

        tracing::info!(%addr, "http service listening");

        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(addr)
    }
}

fn router(store: Arc<Store>) -> Router {
    Router::new()
        .route("/key/:key", get(get_key).delete(delete_key))
        .route("/key", post(set_keys).get(missing_key).delete(missing_key))
        .route("/join", post(join))
        .route("/status", get(status))
        .with_state(store)
}

async fn get_key(
    State(store): State<Arc<Store>>,
    UrlPath(key): UrlPath<String>,
) -> Result<Json<HashMap<String, String>>, (StatusCode, String)> {
    if key.is_empty() {
        return Err(empty_key());
    }

    let value = store.get(&key).await;
    let mut body = HashMap::new();
    body.insert(key, value);
    Ok(Json(body))
}

async fn set_keys(
    State(store): State<Arc<Store>>,
    Json(pairs): Json<HashMap<String, String>>,
) -> Result<StatusCode, (StatusCode, String)> {
    for (key, value) in pairs {
        store.set(key, value).await.map_err(internal)?;
    }
    Ok(StatusCode::OK)
}

async fn delete_key(
    State(store): State<Arc<Store>>,
    UrlPath(key): UrlPath<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    if key.is_empty() {
        return Err(empty_key());
    }

    store.delete(key).await.map_err(internal)?;
    Ok(StatusCode::OK)
}

/// A key-less `/key` read or delete is a client error, not a lookup of the
/// empty key.
async fn missing_key() -> (StatusCode, String) {
    empty_key()
}

/// Join request body.
#[derive(Debug, Deserialize)]
struct JoinRequest {
    /// The joining node's ID.
    id: NodeId,
    /// The joining node's Raft address.
    addr: String,
}

async fn join(
    State(store): State<Arc<Store>>,
    Json(req): Json<JoinRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    store.join(req.id, req.addr).await.map_err(internal)?;
    Ok(StatusCode::OK)
}

/// Status response body.
#[derive(Debug, Serialize)]
struct StatusResponse {
    node_id: NodeId,
    role: String,
    leader: Option<NodeId>,
    term: u64,
}

async fn status(State(store): State<Arc<Store>>) -> Json<StatusResponse> {
    let metrics = store.metrics();
    Json(StatusResponse {
        node_id: store.node_id(),
        role: store.role().to_string(),
        leader: metrics.current_leader,
        term: metrics.current_term,
    })
}

fn internal(err: StoreError) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

fn empty_key() -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, "empty key".to_string())
}
