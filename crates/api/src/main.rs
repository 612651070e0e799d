use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use finadvisor_core::domain::news::NewsFeed;
use finadvisor_core::domain::profile::UserProfile;
use finadvisor_core::domain::response::{ChatResponse, WealthManagementResponse};
use finadvisor_core::llm::anthropic::AnthropicClient;
use finadvisor_core::news::source::{load_sources, SourceConfig};
use finadvisor_core::news::NewsAggregator;
use finadvisor_core::pipeline::error::PipelineError;
use finadvisor_core::pipeline::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = finadvisor_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let news = NewsAggregator::from_env()?;
    let sources = load_sources(&settings)?;

    let orchestrator = match AnthropicClient::from_settings(&settings) {
        Ok(client) => Some(
            Orchestrator::builder(Arc::new(client))
                .news(news.clone())
                .sources(sources.clone())
                .stage_timeout(settings.stage_timeout())
                .feed_limit(settings.news_feed_limit)
                .build()?,
        ),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "reasoning client unavailable; starting API in degraded mode");
            None
        }
    };

    let state = AppState {
        orchestrator,
        news,
        sources: Arc::new(sources),
        feed_limit: settings.news_feed_limit,
    };

    let app = app(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/wealth/advice", post(wealth_advice))
        .route("/financial/chat", post(financial_chat))
        .route("/news/feed", get(news_feed))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[derive(Clone)]
struct AppState {
    orchestrator: Option<Orchestrator>,
    news: NewsAggregator,
    sources: Arc<Vec<SourceConfig>>,
    feed_limit: usize,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, detail: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            detail: detail.into(),
        }),
    )
}

fn pipeline_error(context: &str, err: PipelineError) -> ApiError {
    if err.is_client_error() {
        return api_error(StatusCode::BAD_REQUEST, err.to_string());
    }

    let err = anyhow::Error::new(err);
    sentry_anyhow::capture_anyhow(&err);
    tracing::error!(error = %err, "{context}");
    api_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("{context}: {err:#}"),
    )
}

/// Body rejections keep axum's status (400/415/422) but use the `{"detail"}` shape.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| api_error(rejection.status(), rejection.body_text()))
}

fn require_orchestrator(state: &AppState) -> Result<&Orchestrator, ApiError> {
    state.orchestrator.as_ref().ok_or_else(|| {
        api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "reasoning backend is not configured",
        )
    })
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({"message": "Welcome to the Wealth Management API"}))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn wealth_advice(
    State(state): State<AppState>,
    payload: Result<Json<UserProfile>, JsonRejection>,
) -> Result<Json<WealthManagementResponse>, ApiError> {
    let profile = json_body(payload)?;
    let orchestrator = require_orchestrator(&state)?;
    orchestrator
        .run_wealth(profile)
        .await
        .map(Json)
        .map_err(|e| pipeline_error("Error processing wealth management advice", e))
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    query: String,
}

async fn financial_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let req = json_body(payload)?;
    let orchestrator = require_orchestrator(&state)?;
    orchestrator
        .run_chat(&req.query)
        .await
        .map(Json)
        .map_err(|e| pipeline_error("Error processing your query", e))
}

#[derive(Debug, Deserialize)]
struct FeedParams {
    limit: Option<usize>,
}

async fn news_feed(
    State(state): State<AppState>,
    Query(params): Query<FeedParams>,
) -> Result<Json<NewsFeed>, ApiError> {
    let limit = params.limit.unwrap_or(state.feed_limit);
    if limit == 0 {
        return Err(api_error(StatusCode::BAD_REQUEST, "limit must be >= 1"));
    }

    Ok(Json(state.news.fetch_feed(&state.sources, limit).await))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &finadvisor_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
