use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rocket::figment::Figment;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{delete, get, post, routes, Build, Rocket, State};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use common::Config;

use crate::chat::{ChatExchange, ChatTurn};
use crate::cycle::CycleSnapshot;
use crate::dashboard::Dashboard;
use crate::error::DashboardError;
use crate::synthesis::{DetailedSummary, SocialTopic, SynthesizedArticle, Translation};

/// Application state stored inside Rocket managed state.
#[derive(Clone)]
pub struct AppState {
    pub started_at: DateTime<Utc>,
    pub config: Arc<Config>,
    pub dashboard: Arc<Dashboard>,
}

impl AppState {
    pub fn new(config: Arc<Config>, dashboard: Arc<Dashboard>) -> Self {
        Self {
            started_at: Utc::now(),
            config,
            dashboard,
        }
    }
}

/// Body of every error response: a stable code plus the text shown to the user.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

type ApiError = (Status, Json<ErrorBody>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn api_error(err: DashboardError) -> ApiError {
    let status = match &err {
        DashboardError::Transport(_) | DashboardError::MalformedResponse(_) => Status::BadGateway,
        DashboardError::Superseded { .. } => Status::Conflict,
        DashboardError::InvalidInput(_) => Status::BadRequest,
    };
    tracing::debug!(status = status.code, code = err.code(), "request ended with error: {}", err);
    (
        status,
        Json(ErrorBody {
            error: err.code().to_string(),
            message: err.user_message().to_string(),
        }),
    )
}

/// Response structure for `/api/v1/status`.
#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    uptime_seconds: i64,
    model: String,
    cache_backend: &'static str,
    cache_ttl_seconds: i64,
    translation_language: Option<String>,
}

#[derive(Deserialize)]
struct ChatRequest {
    query: String,
    #[serde(default)]
    history: Vec<ChatTurn>,
}

#[derive(Deserialize)]
struct TranslateRequest {
    text: String,
}

#[get("/health")]
async fn health() -> &'static str {
    "OK"
}

/// Status endpoint returning uptime and the active model/cache settings.
#[get("/api/v1/status")]
async fn status(state: &State<AppState>) -> Json<StatusResponse> {
    let uptime = (Utc::now() - state.started_at).num_seconds();
    let cache = state.dashboard.cache();

    Json(StatusResponse {
        status: "ok",
        uptime_seconds: uptime,
        model: state.dashboard.model().to_string(),
        cache_backend: cache.backend_name(),
        cache_ttl_seconds: cache.ttl().num_seconds(),
        translation_language: state.config.dashboard.translation_language.clone(),
    })
}

#[get("/api/v1/news")]
async fn news(state: &State<AppState>) -> ApiResult<Vec<SynthesizedArticle>> {
    state
        .dashboard
        .refresh_news_digest()
        .await
        .map(Json)
        .map_err(api_error)
}

#[get("/api/v1/social")]
async fn social(state: &State<AppState>) -> ApiResult<Vec<SocialTopic>> {
    state
        .dashboard
        .refresh_social_digest()
        .await
        .map(Json)
        .map_err(api_error)
}

/// Accepts any article or topic record previously returned by the digests.
#[post("/api/v1/article-detail", format = "json", data = "<item>")]
async fn open_detail(state: &State<AppState>, item: Json<Value>) -> ApiResult<DetailedSummary> {
    state
        .dashboard
        .get_article_detail(&item)
        .await
        .map(Json)
        .map_err(api_error)
}

#[get("/api/v1/article-detail")]
async fn current_detail(state: &State<AppState>) -> Result<Json<DetailedSummary>, Status> {
    state
        .dashboard
        .current_article_detail()
        .await
        .map(Json)
        .ok_or(Status::NotFound)
}

#[delete("/api/v1/article-detail")]
async fn close_detail(state: &State<AppState>) -> Status {
    state.dashboard.close_article_detail().await;
    Status::NoContent
}

#[post("/api/v1/chat", format = "json", data = "<req>")]
async fn chat(state: &State<AppState>, req: Json<ChatRequest>) -> ApiResult<ChatExchange> {
    state
        .dashboard
        .submit_chat_query(&req.query, &req.history)
        .await
        .map(Json)
        .map_err(api_error)
}

#[post("/api/v1/translate", format = "json", data = "<req>")]
async fn translate(state: &State<AppState>, req: Json<TranslateRequest>) -> ApiResult<Translation> {
    state
        .dashboard
        .translate(&req.text)
        .await
        .map(Json)
        .map_err(api_error)
}

/// Latest cycle of every operation kind, for progress indicators.
#[get("/api/v1/cycles")]
async fn cycles(state: &State<AppState>) -> Json<Vec<CycleSnapshot>> {
    Json(state.dashboard.cycles().snapshots())
}

/// Rocket figment with `[server] bind/port` from the configuration merged in.
pub fn server_figment(config: &Config) -> Figment {
    let mut fig = rocket::Config::figment();
    if let Some(bind) = &config.server.bind {
        fig = fig.merge(("address", bind.clone()));
    }
    if let Some(port) = config.server.port {
        fig = fig.merge(("port", port));
    }
    fig
}

pub fn build_rocket(state: AppState, figment: Figment) -> Rocket<Build> {
    rocket::custom(figment).manage(state).mount(
        "/",
        routes![
            health,
            status,
            news,
            social,
            open_detail,
            current_detail,
            close_detail,
            chat,
            translate,
            cycles,
        ],
    )
}

/// Build and launch the Rocket server.
///
/// Blocks until Rocket shuts down and returns an error if it fails to start.
pub async fn launch_rocket(dashboard: Arc<Dashboard>, config: Arc<Config>) -> Result<()> {
    let figment = server_figment(&config);
    let state = AppState::new(config, dashboard);

    tracing::info!("Starting Rocket HTTP server");
    build_rocket(state, figment)
        .launch()
        .await
        .map_err(|e| anyhow!("Rocket failed: {}", e))?;

    tracing::info!("Rocket HTTP server has shut down");
    Ok(())
}
