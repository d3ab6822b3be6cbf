/// HTTP surface of the marketplace backend.
///
/// Routes:
/// - `GET /health`
/// - `POST /api/auth/{register,login,logout}`
/// - `POST /api/search/projects`: fuzzy search over `project_data`
/// - `POST /api/ai/{suggestions,websites,domain-ideas,improve,chat}`
/// - `POST /api/files/upload`, `GET /api/files/submissions`, `GET /api/files/download/{file_key}`
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use marketplace_common::model::ProjectRecord;
use marketplace_common::search::rank;
use marketplace_common::supabase::SupabaseClient;

use crate::assist::{AssistKind, AssistService};
use crate::auth::{self, CurrentUser};
use crate::error::AppError;
use crate::files;
use crate::rate_limit::RateLimiter;

pub const PROJECTS_TABLE: &str = "project_data";

#[derive(Clone)]
pub struct AppState {
    pub supabase: Arc<SupabaseClient>,
    pub assist: AssistService,
    pub limiter: Option<RateLimiter>,
    pub search_threshold: u8,
    /// Body limit for multipart uploads, in bytes.
    pub upload_limit: usize,
}

impl AppState {
    async fn gate(&self) -> Result<(), AppError> {
        if let Some(limiter) = &self.limiter {
            limiter.check().await?;
        }
        Ok(())
    }
}

pub fn router(state: AppState) -> Router {
    let upload = post(files::upload).layer(DefaultBodyLimit::max(state.upload_limit));
    Router::new()
        .route("/health", get(health))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/search/projects", post(search_projects))
        .route("/api/ai/suggestions", post(suggestions))
        .route("/api/ai/websites", post(websites))
        .route("/api/ai/domain-ideas", post(domain_ideas))
        .route("/api/ai/improve", post(improve))
        .route("/api/ai/chat", post(chat))
        .route("/api/files/upload", upload)
        .route("/api/files/submissions", get(files::submissions))
        .route("/api/files/download/{file_key}", get(files::download))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct QueryBody {
    query: String,
}

#[derive(Debug, Deserialize)]
struct DomainBody {
    domain: String,
}

#[derive(Debug, Deserialize)]
struct IdeaBody {
    idea: String,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    message: String,
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn search_projects(
    State(state): State<AppState>,
    _user: CurrentUser,
    Json(body): Json<QueryBody>,
) -> Result<Json<Value>, AppError> {
    let rows = state.supabase.select_all(PROJECTS_TABLE).await?;
    let records: Vec<ProjectRecord> = rows
        .into_iter()
        .filter_map(|row| match row {
            Value::Object(map) => Some(ProjectRecord::from(map)),
            _ => None,
        })
        .collect();

    let results = rank(&body.query, &records, state.search_threshold);
    info!(
        query = %body.query,
        candidates = records.len(),
        results = results.len(),
        "project search"
    );
    Ok(Json(json!({ "results": results })))
}

async fn suggestions(
    State(state): State<AppState>,
    _user: CurrentUser,
    Json(body): Json<QueryBody>,
) -> Result<Json<Value>, AppError> {
    state.gate().await?;
    let suggestions = state.assist.run(AssistKind::Suggestions, &body.query).await?;
    Ok(Json(json!({ "suggestions": suggestions })))
}

async fn websites(
    State(state): State<AppState>,
    _user: CurrentUser,
    Json(body): Json<QueryBody>,
) -> Result<Json<Value>, AppError> {
    state.gate().await?;
    let websites = state.assist.run(AssistKind::Websites, &body.query).await?;
    Ok(Json(websites))
}

async fn domain_ideas(
    State(state): State<AppState>,
    _user: CurrentUser,
    Json(body): Json<DomainBody>,
) -> Result<Json<Value>, AppError> {
    state.gate().await?;
    let ideas = state.assist.run(AssistKind::DomainIdeas, &body.domain).await?;
    Ok(Json(json!({ "ideas": ideas })))
}

async fn improve(
    State(state): State<AppState>,
    _user: CurrentUser,
    Json(body): Json<IdeaBody>,
) -> Result<Json<Value>, AppError> {
    state.gate().await?;
    let improvement = state.assist.run(AssistKind::Improvement, &body.idea).await?;
    Ok(Json(json!({ "improvement": improvement })))
}

async fn chat(
    State(state): State<AppState>,
    _user: CurrentUser,
    Json(body): Json<MessageBody>,
) -> Result<Json<Value>, AppError> {
    state.gate().await?;
    let response = state.assist.chat(&body.message).await?;
    Ok(Json(json!({ "response": response })))
}
