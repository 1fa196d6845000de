//! HTTP front end for [`shard_ring::ShardRouter`].
//!
//! | Method | Path | Body / query |
//! |---|---|---|
//! | `POST` | `/write` | `{"key": "...", "value": "..."}` |
//! | `GET` | `/read` | `?key=...` |
//! | `GET` | `/stats` | |
//! | `GET` | `/health` | |
//! | `GET` | `/shards` | |
//! | `POST` | `/shards` | `{"name": "..."}` |
//! | `DELETE` | `/shards/:name` | |

pub mod cli;
pub mod error;
pub mod handlers;

pub use error::{ApiError, ApiResult};

use axum::{
    routing::{delete, get, post},
    Router,
};
use handlers::AppState;

pub fn routes(router: AppState) -> Router {
    Router::new()
        .route("/write", post(handlers::write_entry))
        .route("/read", get(handlers::read_entry))
        .route("/stats", get(handlers::stats))
        .route("/health", get(handlers::health))
        .route(
            "/shards",
            get(handlers::list_shards).post(handlers::add_shard),
        )
        .route("/shards/:name", delete(handlers::remove_shard))
        .with_state(router)
}
