//! HTTP surface of the AI proxy gateway.

use crate::credentials::CredentialProvider;
use crate::error::ProxyError;
use crate::providers::{self, Engine, ProviderEndpoints, ProxyResponse};
use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub struct AppState {
    pub client: reqwest::Client,
    pub endpoints: ProviderEndpoints,
    pub credentials: Arc<dyn CredentialProvider>,
}

impl AppState {
    pub fn new(endpoints: ProviderEndpoints, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints,
            credentials,
        }
    }
}

/// Body accepted by every proxy route. Extra fields such as `messages` are
/// accepted and ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRequest {
    pub context_info: Option<String>,
    pub user_message: String,
    pub engine: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/qwen-proxy", post(qwen_proxy))
        .route("/api/openai-proxy", post(openai_proxy))
        .route("/api/ai-proxy", post(ai_proxy))
        .route("/functions/v1/ai-proxy", post(ai_proxy))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK",
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

fn parse_body(payload: Result<Json<ProxyRequest>, JsonRejection>) -> Result<ProxyRequest, ProxyError> {
    payload
        .map(|Json(request)| request)
        .map_err(|rejection| ProxyError::Internal {
            details: rejection.body_text(),
        })
}

async fn qwen_proxy(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ProxyRequest>, JsonRejection>,
) -> Result<Json<ProxyResponse>, ProxyError> {
    let request = parse_body(payload)?;
    dispatch(&state, Engine::Qwen, request).await.map(Json)
}

async fn openai_proxy(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ProxyRequest>, JsonRejection>,
) -> Result<Json<ProxyResponse>, ProxyError> {
    let request = parse_body(payload)?;
    dispatch(&state, Engine::OpenAi, request).await.map(Json)
}

async fn ai_proxy(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ProxyRequest>, JsonRejection>,
) -> Result<Json<ProxyResponse>, ProxyError> {
    let request = parse_body(payload)?;
    let engine: Engine = request
        .engine
        .as_deref()
        .ok_or(ProxyError::UnsupportedEngine)?
        .parse()?;
    dispatch(&state, engine, request).await.map(Json)
}

async fn dispatch(
    state: &AppState,
    engine: Engine,
    request: ProxyRequest,
) -> Result<ProxyResponse, ProxyError> {
    let span = info_span!("proxy", request_id = %Uuid::new_v4(), engine = %engine);

    async move {
        let api_key = request
            .api_key
            .filter(|k| !k.trim().is_empty())
            .or_else(|| state.credentials.api_key(engine))
            .ok_or(ProxyError::MissingCredential(engine))?;

        let result = providers::complete(
            &state.client,
            &state.endpoints,
            engine,
            &api_key,
            request.context_info.as_deref(),
            &request.user_message,
        )
        .await;

        match &result {
            Ok(_) => info!("{} API response received successfully", engine.display_name()),
            Err(e) => warn!(status = e.status().as_u16(), error = %e, "Proxy request failed"),
        }
        result
    }
    .instrument(span)
    .await
}
