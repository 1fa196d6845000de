// ABOUTME: HTTP handlers mapping JSON requests onto the shard router
// ABOUTME: Write, read, stats and health plus shard membership endpoints

use crate::error::ApiResult;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use shard_ring::{Entry, ShardHealth, ShardRouter, ShardStatus, StoredEntry};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub type AppState = Arc<ShardRouter>;

#[derive(Debug, Deserialize)]
pub struct WriteRequest {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct ReadParams {
    #[serde(default)]
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct AddShardRequest {
    pub name: String,
}

/// Envelope for successful reads and writes.
#[derive(Debug, Serialize)]
pub struct EntryResponse<T> {
    pub message: &'static str,
    pub shard: String,
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub shards: BTreeMap<String, ShardHealth>,
    pub status: BTreeMap<String, ShardStatus>,
    pub total_shards: usize,
    pub algorithm: &'static str,
}

#[derive(Debug, Serialize)]
pub struct MembershipResponse {
    pub shard: String,
    pub changed: bool,
    pub total_shards: usize,
}

pub async fn write_entry(
    State(router): State<AppState>,
    payload: Result<Json<WriteRequest>, JsonRejection>,
) -> ApiResult<Json<EntryResponse<Entry>>> {
    let Json(request) = payload?;
    let receipt = router.write(&request.key, &request.value).await?;

    Ok(Json(EntryResponse {
        message: "Write successful",
        shard: receipt.shard,
        data: receipt.entry,
    }))
}

pub async fn read_entry(
    State(router): State<AppState>,
    params: Result<Query<ReadParams>, QueryRejection>,
) -> ApiResult<Json<EntryResponse<StoredEntry>>> {
    let Query(params) = params?;
    let receipt = router.read(&params.key).await?;

    Ok(Json(EntryResponse {
        message: "Read successful",
        shard: receipt.shard,
        data: receipt.entry,
    }))
}

pub async fn stats(State(router): State<AppState>) -> Json<StatsResponse> {
    let stats = router.stats().await;

    let mut shards = BTreeMap::new();
    let mut status = BTreeMap::new();
    for (name, report) in stats.shards {
        shards.insert(name.clone(), report.health);
        status.insert(name, report.status);
    }

    Json(StatsResponse {
        shards,
        status,
        total_shards: stats.total_shards,
        algorithm: stats.algorithm,
    })
}

pub async fn health(State(router): State<AppState>) -> impl IntoResponse {
    if router.is_live() {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Shutting down")
    }
}

pub async fn list_shards(State(router): State<AppState>) -> Json<BTreeSet<String>> {
    Json(router.shards().await)
}

pub async fn add_shard(
    State(router): State<AppState>,
    payload: Result<Json<AddShardRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<MembershipResponse>)> {
    let Json(request) = payload?;
    let added = router.add_shard(&request.name).await?;
    let status = if added {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(MembershipResponse {
            shard: request.name,
            changed: added,
            total_shards: router.shard_count().await,
        }),
    ))
}

pub async fn remove_shard(
    State(router): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<MembershipResponse>> {
    let removed = router.remove_shard(&name).await?;

    Ok(Json(MembershipResponse {
        shard: name,
        changed: removed,
        total_shards: router.shard_count().await,
    }))
}
