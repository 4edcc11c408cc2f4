//! Content API: plain-text `GET`/`POST` of the full document.
//!
//! Writers bootstrap from `GET /api/doc` and persist every local edit with
//! `POST /api/doc`. Any origin may call it.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Router};
use textsync_core::DocumentStore;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Path the document is served under.
pub const DOC_PATH: &str = "/api/doc";

/// Shared API state
pub struct ApiState {
    pub store: Arc<dyn DocumentStore>,
    /// Returned by `GET` while nothing is stored
    pub default_content: String,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route(DOC_PATH, get(get_doc).post(post_doc))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Store the default content if the store is empty.
pub async fn seed(state: &ApiState) -> anyhow::Result<()> {
    match state.store.read().await? {
        Some(content) if !content.is_empty() => {
            tracing::info!("Serving existing document ({} bytes)", content.len());
        }
        _ => {
            state.store.write(&state.default_content).await?;
            tracing::info!("Seeded empty store with default content");
        }
    }
    Ok(())
}

async fn get_doc(State(state): State<Arc<ApiState>>) -> Result<String, (StatusCode, String)> {
    match state.store.read().await {
        Ok(Some(content)) if !content.is_empty() => Ok(content),
        Ok(_) => Ok(state.default_content.clone()),
        Err(e) => {
            tracing::error!("Failed to read document: {}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

async fn post_doc(
    State(state): State<Arc<ApiState>>,
    body: String,
) -> Result<StatusCode, (StatusCode, String)> {
    match state.store.write(&body).await {
        Ok(()) => {
            tracing::debug!("Stored document ({} bytes)", body.len());
            Ok(StatusCode::OK)
        }
        Err(e) => {
            tracing::error!("Failed to write document: {}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}
