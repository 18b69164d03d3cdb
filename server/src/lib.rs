use anyhow::Result;
use axum::extract::{Query as QueryParams, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sift_core::tokenizer::{normalize_phrase, query_terms};
use sift_core::{Attribute, Collection, DocId, Error, Query, SearchParameter};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Raw query text as typed by a user; normalized like the documents before
/// it reaches the collection.
#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub phrases: Vec<String>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub parameter: SearchParameter,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: Query,
    pub took_s: f64,
    pub total_hits: usize,
    pub results: Vec<SearchHit>,
}

#[derive(Serialize)]
pub struct SearchHit {
    pub doc_id: DocId,
    pub score: f32,
    pub name: String,
    pub category: Option<String>,
}

#[derive(Deserialize)]
pub struct CompleteParams {
    pub prefix: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Deserialize)]
pub struct SuggestParams {
    pub word: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

#[derive(Serialize)]
pub struct Completion {
    pub word: String,
    pub document_frequency: u32,
}

#[derive(Serialize)]
pub struct Suggestion {
    pub word: String,
    pub similarity: f32,
}

#[derive(Clone)]
pub struct AppState {
    pub index_dir: PathBuf,
    pub collection: Arc<RwLock<Collection>>,
    pub admin_token: Option<String>,
}

/// Error body returned by every handler.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match err {
            Error::InvalidRetrievalType(_) | Error::InvalidFocusType(_) | Error::InvalidParameter(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

pub fn build_app(index_dir: impl Into<PathBuf>) -> Result<Router> {
    let index_dir = index_dir.into();
    let collection = Collection::load(&index_dir)?;
    tracing::info!(
        index = %index_dir.display(),
        num_docs = collection.num_documents(),
        terms = collection.token_dictionary().len(),
        "collection loaded"
    );
    let state = AppState {
        index_dir,
        collection: Arc::new(RwLock::new(collection)),
        admin_token: std::env::var("ADMIN_TOKEN").ok(),
    };
    Ok(router(state))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", post(search_handler))
        .route("/autocomplete", get(autocomplete_handler))
        .route("/suggest", get(suggest_handler))
        .route("/reload", post(reload_handler))
        .with_state(state)
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
}

// CORS_ALLOW_ORIGIN is a comma-separated origin list; unset or unparsable allows any.
fn cors_layer() -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    let origins: Vec<_> = std::env::var("CORS_ALLOW_ORIGIN")
        .map(|val| val.split(',').filter_map(|s| s.trim().parse().ok()).collect())
        .unwrap_or_default();
    if origins.is_empty() {
        base.allow_origin(Any)
    } else {
        base.allow_origin(AllowOrigin::list(origins))
    }
}

pub async fn search_handler(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let start = std::time::Instant::now();
    let query = Query {
        terms: query_terms(&request.q),
        phrases: request
            .phrases
            .iter()
            .map(|p| normalize_phrase(p))
            .filter(|p| !p.is_empty())
            .collect(),
        attributes: request
            .attributes
            .iter()
            .map(|a| Attribute::new(a.key.trim(), normalize_phrase(&a.value)))
            .collect(),
    };

    let collection = state.collection.read();
    let result = collection.search_collection(&query, &request.parameter)?;
    let results = result
        .iter()
        .map(|item| {
            let meta = collection.documents().get(item.doc_id);
            SearchHit {
                doc_id: item.doc_id,
                score: item.score,
                name: meta.map(|m| m.name.clone()).unwrap_or_default(),
                category: meta
                    .and_then(|m| m.category)
                    .map(|c| collection.categories().name(c).to_string()),
            }
        })
        .collect();
    drop(collection);

    let took_s = start.elapsed().as_secs_f64();
    tracing::debug!(hits = result.len(), took_s, "search");
    Ok(Json(SearchResponse {
        query,
        took_s,
        total_hits: result.len(),
        results,
    }))
}

pub async fn autocomplete_handler(
    State(state): State<AppState>,
    QueryParams(params): QueryParams<CompleteParams>,
) -> Json<Vec<Completion>> {
    // The last query term is the one being typed.
    let Some(prefix) = query_terms(&params.prefix).pop() else {
        return Json(Vec::new());
    };
    let completions = state
        .collection
        .read()
        .autocomplete(&prefix, params.limit.min(100))
        .into_iter()
        .map(|(word, document_frequency)| Completion {
            word,
            document_frequency,
        })
        .collect();
    Json(completions)
}

pub async fn suggest_handler(
    State(state): State<AppState>,
    QueryParams(params): QueryParams<SuggestParams>,
) -> Json<Vec<Suggestion>> {
    let suggestions = state
        .collection
        .read()
        .suggest(&params.word.trim().to_lowercase(), params.limit.min(100))
        .into_iter()
        .map(|(word, similarity)| Suggestion { word, similarity })
        .collect();
    Json(suggestions)
}

/// Reloads the collection from the index directory, e.g. after an offline
/// rebuild. The old collection keeps serving until the new one is loaded.
async fn reload_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    authorize(&state, &headers)?;
    let dir = state.index_dir.clone();
    let loaded = tokio::task::spawn_blocking(move || Collection::load(&dir))
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))??;
    let num_docs = loaded.num_documents();
    *state.collection.write() = loaded;
    tracing::info!(num_docs, "collection reloaded");
    Ok(Json(serde_json::json!({ "num_docs": num_docs })))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(required) = &state.admin_token else {
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "ADMIN_TOKEN not set"));
    };
    let provided = headers
        .get("X-ADMIN-TOKEN")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        Err(ApiError::new(StatusCode::UNAUTHORIZED, "invalid admin token"))
    }
}
