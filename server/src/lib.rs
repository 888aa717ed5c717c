use anyhow::{Context, Result};
use axum::{extract::{Path, Query, State}, http::StatusCode, routing::get, Json, Router};
use gapidx_core::persist::{load_index, IndexPaths, LoadedIndex};
use gapidx_core::query::top_k;
use gapidx_core::tokenizer::normalize;
use gapidx_core::{BooleanMode, Bm25Params, DocId, QueryEngine, RankingMode};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default = "default_k")]
    pub k: usize,
    pub ranking: Option<String>,
    pub mode: Option<String>,
}
fn default_k() -> usize { 10 }

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    /// Normalized terms the query was evaluated with.
    pub terms: Vec<String>,
    pub ranking: RankingMode,
    pub mode: BooleanMode,
    pub took_s: f64,
    pub total_hits: usize,
    pub results: Vec<SearchHit>,
}

#[derive(Serialize)]
pub struct SearchHit {
    pub doc_id: DocId,
    pub score: f64,
    pub length: Option<u32>,
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub num_docs: usize,
    pub num_terms: usize,
    pub avgdl: f64,
    pub created_at: String,
    pub version: u32,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub index_dir: PathBuf,
    pub bm25: Bm25Params,
    pub default_ranking: RankingMode,
    pub default_mode: BooleanMode,
    /// Upper bound on `k` per request.
    pub max_k: usize,
}

impl ServerConfig {
    pub fn new(index_dir: impl Into<PathBuf>) -> Self {
        Self {
            index_dir: index_dir.into(),
            bm25: Bm25Params::default(),
            default_ranking: RankingMode::Bm25,
            default_mode: BooleanMode::Or,
            max_k: 100,
        }
    }
}

/// Shared by every handler. The index is never written after load, so it is
/// read concurrently without locking.
#[derive(Clone)]
pub struct AppState {
    pub index: Arc<LoadedIndex>,
    pub bm25: Bm25Params,
    pub default_ranking: RankingMode,
    pub default_mode: BooleanMode,
    pub max_k: usize,
}

impl AppState {
    pub fn engine(&self) -> QueryEngine<'_> {
        QueryEngine::from_loaded(&self.index).with_bm25_params(self.bm25)
    }
}

pub fn build_app(config: &ServerConfig) -> Result<Router> {
    // Load the whole index once at startup
    let loaded = load_index(&IndexPaths::new(&config.index_dir))
        .with_context(|| format!("loading index from {}", config.index_dir.display()))?;
    let state = AppState {
        index: Arc::new(loaded),
        bm25: config.bm25,
        default_ranking: config.default_ranking,
        default_mode: config.default_mode,
        max_k: config.max_k.max(1),
    };
    Ok(router(state))
}

pub fn router(state: AppState) -> Router {
    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler))
        .route("/doc/:doc_id", get(doc_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn bad_request(err: gapidx_core::Error) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, err.to_string())
}

pub async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, (StatusCode, String)> {
    let ranking = match params.ranking.as_deref() {
        Some(s) => s.parse::<RankingMode>().map_err(bad_request)?,
        None => state.default_ranking,
    };
    let mode = match params.mode.as_deref() {
        Some(s) => s.parse::<BooleanMode>().map_err(bad_request)?,
        None => state.default_mode,
    };

    let start = std::time::Instant::now();
    let terms = normalize(&params.q);
    let engine = state.engine();
    let results = engine.process_query(&terms, ranking, mode);
    let total_hits = results.len();
    let k = params.k.clamp(1, state.max_k);
    let hits = top_k(results, k)
        .into_iter()
        .map(|r| SearchHit { doc_id: r.doc_id, score: r.score, length: state.index.doc_lengths.get(r.doc_id) })
        .collect();

    let elapsed = start.elapsed();
    tracing::info!(query = %params.q, %ranking, %mode, total_hits, took_s = elapsed.as_secs_f64(), "search");
    Ok(Json(SearchResponse {
        query: params.q,
        terms,
        ranking,
        mode,
        took_s: elapsed.as_secs_f64(),
        total_hits,
        results: hits,
    }))
}

pub async fn doc_handler(
    State(state): State<AppState>,
    Path(doc_id): Path<DocId>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    match state.index.doc_lengths.get(doc_id) {
        Some(length) => Ok(Json(serde_json::json!({ "doc_id": doc_id, "length": length }))),
        None => Err((StatusCode::NOT_FOUND, format!("document {doc_id} not found"))),
    }
}

pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let index = &state.index;
    Json(StatsResponse {
        num_docs: index.num_docs(),
        num_terms: index.lexicon.len(),
        avgdl: index.doc_lengths.avgdl(),
        created_at: index.meta.created_at.clone(),
        version: index.meta.version,
    })
}
