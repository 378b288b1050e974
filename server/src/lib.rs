use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use lazy_static::lazy_static;
use ocrsearch_core::{DocumentId, Error, SearchService};
use regex::Regex;
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
}
fn default_k() -> usize { 10 }

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub took_s: f64,
    pub total_hits: usize,
    pub results: Vec<SearchHit>,
}

#[derive(Serialize)]
pub struct SearchHit {
    pub doc_id: String,
    pub score: f64,
    pub lexical: f64,
    pub semantic: Option<f64>,
    /// Relative link to the original PDF.
    pub url: String,
}

#[derive(Clone)]
pub struct AppState {
    pub search: Arc<SearchService>,
    pub documents_dir: Option<PathBuf>,
}

/// Query failures as HTTP responses. A broken embedding model is the
/// upstream's fault; everything else is ours.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self { Self(err) }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            Error::UpstreamProcess { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::error!(error = %self.0, %status, "search failed");
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub fn build_app(search: Arc<SearchService>, documents_dir: Option<PathBuf>) -> Router {
    let app_state = AppState { search, documents_dir };

    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val.split(',').filter_map(|s| s.trim().parse().ok()).collect();
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
        .with_state(app_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let start = std::time::Instant::now();
    let k = params.k.clamp(1, 100);

    // Ranking may spawn the embedding model, keep it off the async workers.
    let search = Arc::clone(&state.search);
    let query = params.q.clone();
    let ranked = tokio::task::spawn_blocking(move || search.search(&query))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))??;

    let total_hits = ranked.len();
    let results = ranked
        .into_iter()
        .take(k)
        .map(|r| SearchHit {
            url: format!("/doc/{}", r.doc_id),
            doc_id: r.doc_id.as_str().to_string(),
            score: r.score,
            lexical: r.lexical,
            semantic: r.semantic,
        })
        .collect();

    Ok(Json(SearchResponse { query: params.q, took_s: start.elapsed().as_secs_f64(), total_hits, results }))
}

lazy_static! {
    static ref DOC_ID: Regex = Regex::new(r"^[\w][\w .\-]*$").expect("valid regex");
}

fn valid_doc_id(raw: &str) -> bool { DOC_ID.is_match(raw) && !raw.contains("..") }

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "not found" }))).into_response()
}

/// Serves the original scan as a download.
pub async fn doc_handler(State(state): State<AppState>, Path(doc_id): Path<String>) -> Response {
    let Some(dir) = &state.documents_dir else { return not_found() };
    if !valid_doc_id(&doc_id) {
        return not_found();
    }
    let doc_id = DocumentId::new(doc_id);
    for ext in ["pdf", "PDF"] {
        let path = dir.join(format!("{doc_id}.{ext}"));
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let disposition = format!("attachment; filename=\"{doc_id}.pdf\"");
                return (
                    [(header::CONTENT_TYPE, "application/pdf".to_string()), (header::CONTENT_DISPOSITION, disposition)],
                    bytes,
                )
                    .into_response();
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => return ApiError(Error::Io(err)).into_response(),
        }
    }
    not_found()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_ids_cannot_leave_the_documents_folder() {
        assert!(valid_doc_id("decreto_0451"));
        assert!(valid_doc_id("acta 12.2023"));
        assert!(!valid_doc_id("../secret"));
        assert!(!valid_doc_id("a/b"));
        assert!(!valid_doc_id(".hidden"));
        assert!(!valid_doc_id("x..y"));
    }
}
