mod rate_limit;

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{Json, State};
use axum::http::{header, HeaderValue, Method, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{body::Body, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use techai_agents::{load_tips, ChatCommand, SupportAgent, SupportError};
use techai_classifier::IntentRouter;
use techai_core::{AppShortcut, Mode};
use techai_gateway::{ReplyEngine, SerpApiClient};
use techai_observability::AppMetrics;
use techai_storage::Store;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

pub use crate::rate_limit::IpRateLimiter;

// Vision requests carry base64 data URLs; everything else is tiny.
const MAX_BODY_BYTES: usize = 6 * 1024 * 1024;

#[derive(Clone)]
pub struct ApiState {
    pub agent: Arc<SupportAgent<Store>>,
    pub metrics: Arc<AppMetrics>,
    pub api_key: String,
    pub limiter: IpRateLimiter,
    pub allowed_origins: Arc<Vec<String>>,
    pub capabilities: HealthCapabilities,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCapabilities {
    pub model_backed: bool,
    pub web_search: bool,
    pub sqlite: bool,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp_utc: String,
    metrics: techai_observability::MetricsSnapshot,
    capabilities: HealthCapabilities,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    session_id: Option<String>,
    mode: Option<String>,
    message: Option<String>,
    new_topic: Option<bool>,
    mark_solved: Option<bool>,
    from_voice: Option<bool>,
    voice_session_ended: Option<bool>,
    use_web_search: Option<bool>,
    topic_title: Option<String>,
    image_data_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatResponse {
    reply: String,
    suggestions: Vec<String>,
    app_shortcuts: Vec<AppShortcut>,
    answer_count: u32,
    free_limit: u32,
}

#[derive(Debug, Deserialize)]
struct IntentRequest {
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct IntentResponse {
    intent: techai_core::Intent,
    confidence: f32,
    model: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkSolvedRequest {
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MarkSolvedResponse {
    status: &'static str,
    solved: bool,
    answer_count: u32,
    free_limit: u32,
}

pub async fn build_app() -> Result<Router> {
    let metrics = AppMetrics::shared();

    let http_client = Client::builder()
        .connect_timeout(Duration::from_secs(6))
        .timeout(Duration::from_secs(30))
        .build()
        .context("failed to build HTTP client")?;

    let engine = ReplyEngine::load_default(http_client.clone());
    let classifier = IntentRouter::load_default(&engine);
    let search = SerpApiClient::from_env(http_client);

    let store = if let Ok(database_url) = env::var("TECHAI_DATABASE_URL") {
        Store::sqlite(&database_url).await?
    } else {
        Store::memory()
    };
    let sqlite_backed = matches!(store, Store::Sqlite(_));

    let tips_path =
        PathBuf::from(env::var("TECHAI_TIPS_PATH").unwrap_or_else(|_| "tech-tips.txt".to_string()));
    let learn_later_path = PathBuf::from(
        env::var("TECHAI_LEARN_LATER_PATH").unwrap_or_else(|_| "learn_later.txt".to_string()),
    );

    let capabilities = HealthCapabilities {
        model_backed: engine.is_model_backed(),
        web_search: search.is_some(),
        sqlite: sqlite_backed,
    };

    let agent = Arc::new(SupportAgent::new(
        engine,
        classifier,
        Arc::new(store),
        metrics.clone(),
        search,
        load_tips(&tips_path),
        learn_later_path,
    ));

    let api_key = env::var("TECHAI_API_KEY").unwrap_or_else(|_| "dev-techai-key".to_string());
    let rate_limit_window = Duration::from_secs(
        env::var("TECHAI_RATE_LIMIT_WINDOW_SECONDS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(60),
    );
    let rate_limit_max = env::var("TECHAI_RATE_LIMIT_MAX")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(80);
    let allowed_origins = parse_allowed_origins();

    let state = ApiState {
        agent,
        metrics,
        api_key,
        limiter: IpRateLimiter::new(rate_limit_window, rate_limit_max),
        allowed_origins: Arc::new(allowed_origins),
        capabilities,
    };

    Ok(build_router(state))
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/chat", post(chat))
        .route("/v1/vision", post(vision))
        .route("/v1/intent", post(intent))
        .route("/v1/mark_solved", post(mark_solved))
        .layer(build_cors_layer(&state.allowed_origins))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api_key_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .with_state(state)
}

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let payload = HealthResponse {
        status: "ok",
        timestamp_utc: chrono::Utc::now().to_rfc3339(),
        metrics: state.metrics.snapshot(),
        capabilities: state.capabilities.clone(),
    };
    (StatusCode::OK, Json(payload))
}

async fn chat(State(state): State<ApiState>, Json(request): Json<ChatRequest>) -> Response {
    let command = match chat_command(&request) {
        Ok(command) => command,
        Err(field) => return validation_error(field),
    };

    match state.agent.handle_chat(command).await {
        Ok(outcome) => chat_response(outcome),
        Err(err) => support_error_response(err),
    }
}

async fn vision(State(state): State<ApiState>, Json(request): Json<ChatRequest>) -> Response {
    let command = match chat_command(&request) {
        Ok(command) => command,
        Err(field) => return validation_error(field),
    };

    let Some(image) = command.image_data_url.as_deref() else {
        return validation_error("imageDataUrl");
    };
    if !is_valid_image_data_url(image) {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "validation_error",
                "message": "imageDataUrl ist kein gültiges Bild"
            })),
        )
            .into_response();
    }

    match state.agent.handle_vision(command).await {
        Ok(outcome) => chat_response(outcome),
        Err(err) => support_error_response(err),
    }
}

async fn intent(State(state): State<ApiState>, Json(request): Json<IntentRequest>) -> Response {
    let Some(message) = request
        .message
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    else {
        return validation_error("message");
    };

    match state.agent.classify_message(message).await {
        Ok(prediction) => (
            StatusCode::OK,
            Json(IntentResponse {
                intent: prediction.intent,
                confidence: prediction.confidence,
                model: prediction.model,
            }),
        )
            .into_response(),
        Err(err) => support_error_response(err),
    }
}

async fn mark_solved(
    State(state): State<ApiState>,
    Json(request): Json<MarkSolvedRequest>,
) -> Response {
    let Some(session_id) = request
        .session_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    else {
        return validation_error("sessionId");
    };

    match state.agent.mark_solved(session_id).await {
        Ok(snapshot) => (
            StatusCode::OK,
            Json(MarkSolvedResponse {
                status: "ok",
                solved: snapshot.solved,
                answer_count: snapshot.answer_count,
                free_limit: snapshot.free_limit,
            }),
        )
            .into_response(),
        Err(err) => support_error_response(err),
    }
}

fn chat_command(request: &ChatRequest) -> Result<ChatCommand, &'static str> {
    let session_id = request
        .session_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or("sessionId")?;
    let message = request
        .message
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or("message")?;

    Ok(ChatCommand {
        session_id: session_id.to_string(),
        mode: Mode::from_optional_str(request.mode.as_deref()),
        message: message.to_string(),
        new_topic: request.new_topic.unwrap_or(false),
        mark_solved: request.mark_solved.unwrap_or(false),
        from_voice: request.from_voice.unwrap_or(false),
        voice_session_ended: request.voice_session_ended.unwrap_or(false),
        use_web_search: request.use_web_search.unwrap_or(false),
        topic_title: request
            .topic_title
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string),
        image_data_url: request
            .image_data_url
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string),
    })
}

fn chat_response(outcome: techai_agents::ChatOutcome) -> Response {
    (
        StatusCode::OK,
        Json(ChatResponse {
            reply: outcome.reply.reply,
            suggestions: outcome.reply.suggestions,
            app_shortcuts: outcome.reply.app_shortcuts,
            answer_count: outcome.answer_count,
            free_limit: outcome.free_limit,
        }),
    )
        .into_response()
}

fn validation_error(field: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({
            "error": "validation_error",
            "message": format!("{field} fehlt")
        })),
    )
        .into_response()
}

fn support_error_response(err: SupportError) -> Response {
    match err {
        SupportError::Validation(field) => validation_error(field),
        SupportError::UpstreamUnavailable(source) => {
            error!(error = %source, "model gateway failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "error": "assistant_unavailable",
                    "message": "Der Assistent ist gerade nicht erreichbar. Bitte versuchen Sie es gleich erneut."
                })),
            )
                .into_response()
        }
        SupportError::Precondition(source) => {
            error!(error = %source, "session store failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "error": "session_unavailable",
                    "message": "Die Sitzung konnte nicht geladen werden. Bitte versuchen Sie es erneut."
                })),
            )
                .into_response()
        }
    }
}

/// Accepts `data:image/...;base64,` payloads that actually decode.
fn is_valid_image_data_url(value: &str) -> bool {
    let Some(rest) = value.strip_prefix("data:image/") else {
        return false;
    };
    let Some((_, payload)) = rest.split_once(";base64,") else {
        return false;
    };
    !payload.is_empty() && BASE64.decode(payload).is_ok()
}

fn parse_allowed_origins() -> Vec<String> {
    env::var("TECHAI_ALLOWED_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3000".to_string())
        .split(',')
        .map(|origin| origin.trim().trim_end_matches('/').to_string())
        .filter(|origin| !origin.is_empty())
        .collect()
}

fn build_cors_layer(allowed_origins: &Arc<Vec<String>>) -> CorsLayer {
    let origins = allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect::<Vec<_>>();
    let origins = if origins.is_empty() {
        vec![HeaderValue::from_static("http://localhost:3000")]
    } else {
        origins
    };

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-api-key"),
        ])
}

fn is_public_endpoint(path: &str) -> bool {
    matches!(path, "/health")
}

async fn api_key_middleware(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if request.method() == Method::OPTIONS || is_public_endpoint(path.as_str()) {
        return next.run(request).await;
    }

    let header_key = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if header_key != state.api_key {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": "unauthorized",
                "message": "missing or invalid x-api-key"
            })),
        )
            .into_response();
    }

    next.run(request).await
}

async fn rate_limit_middleware(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS || is_public_endpoint(request.uri().path()) {
        return next.run(request).await;
    }

    let ip = request_ip(&request);
    if !state.limiter.allow(&ip) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "error": "rate_limited",
                "message": "rate limit exceeded for this IP"
            })),
        )
            .into_response();
    }

    next.run(request).await
}

fn request_ip(request: &Request<Body>) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value
                .split(',')
                .next()
                .unwrap_or("unknown")
                .trim()
                .to_string()
        })
        .unwrap_or_else(|| "local".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> ChatRequest {
        ChatRequest {
            session_id: Some("s1".to_string()),
            mode: Some("unerfahren".to_string()),
            message: Some("Mein Fernseher zeigt kein Bild".to_string()),
            new_topic: None,
            mark_solved: None,
            from_voice: None,
            voice_session_ended: None,
            use_web_search: None,
            topic_title: None,
            image_data_url: None,
        }
    }

    #[test]
    fn chat_command_requires_session_and_message() {
        let mut request = base_request();
        request.session_id = Some("   ".to_string());
        assert_eq!(chat_command(&request).unwrap_err(), "sessionId");

        let mut request = base_request();
        request.message = None;
        assert_eq!(chat_command(&request).unwrap_err(), "message");

        assert!(chat_command(&base_request()).is_ok());
    }

    #[test]
    fn image_data_urls_are_validated() {
        assert!(is_valid_image_data_url("data:image/png;base64,aGFsbG8="));
        assert!(!is_valid_image_data_url("data:image/png;base64,"));
        assert!(!is_valid_image_data_url("data:image/png;base64,$$$"));
        assert!(!is_valid_image_data_url("data:text/plain;base64,aGFsbG8="));
        assert!(!is_valid_image_data_url("https://example.com/bild.png"));
    }

    #[test]
    fn forwarded_ip_takes_the_first_hop() {
        let request = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(request_ip(&request), "203.0.113.7");
    }
}
