use anyhow::Result;
use axum::{extract::{Query, State}, http::StatusCode, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use shardseek_core::persist::IndexPaths;
use shardseek_core::query::QueryEngine;
use shardseek_core::IndexError;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default = "default_k")]
    pub k: usize,
}
fn default_k() -> usize { 10 }

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub took_ms: u128,
    pub took_s: f64,
    pub results: Vec<SearchHit>,
    pub missing_terms: Vec<String>,
}

#[derive(Serialize)]
pub struct SearchHit {
    pub doc_id: u32,
    pub url: String,
    pub score: f64,
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<QueryEngine>,
}

pub fn build_app(index_dir: String) -> Result<Router> {
    // Offset directory and document table are loaded once at startup
    let engine = QueryEngine::open(IndexPaths::new(&index_dir))?;
    tracing::info!(index = %index_dir, docs = engine.num_docs(), "index loaded");
    let app_state = AppState { engine: Arc::new(engine) };

    let cors = cors_from_env(std::env::var("CORS_ALLOW_ORIGIN").ok().as_deref());
    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler))
        .with_state(app_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());
    Ok(app)
}

/// Comma-separated origins restrict CORS; unset or unparsable values allow any origin.
fn cors_from_env(allowed: Option<&str>) -> CorsLayer {
    let origins: Vec<_> = allowed
        .unwrap_or_default()
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

pub async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, (StatusCode, String)> {
    let start = std::time::Instant::now();
    let k = params.k.clamp(1, 100);
    // Seeks are cheap but blocking; keep them off the async workers
    let engine = Arc::clone(&state.engine);
    let q = params.q.clone();
    let outcome = tokio::task::spawn_blocking(move || engine.search_with_limit(&q, k))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let results = match outcome {
        Ok(r) => r,
        Err(e @ IndexError::MissingDocument(_)) => {
            tracing::error!(error = %e, "document table and shards are out of sync");
            return Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
        }
        Err(e) => return Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    };

    let elapsed = start.elapsed();
    Ok(Json(SearchResponse {
        query: params.q,
        took_ms: elapsed.as_millis(),
        took_s: elapsed.as_secs_f64(),
        results: results
            .hits
            .into_iter()
            .map(|h| SearchHit { doc_id: h.doc_id, url: h.url, score: h.score })
            .collect(),
        missing_terms: results.missing_terms,
    }))
}
