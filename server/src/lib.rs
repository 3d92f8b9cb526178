pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod metrics;
pub mod validation;

use std::sync::Arc;

use anyhow::Context;
use audio_core::SpeechClient;
use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{HeaderValue, Method},
    middleware::Next,
    response::Response,
    routing::{get, post},
    Router,
};
use llm_core::OpenAiClient;
use tower::ServiceBuilder;
use tower_governor::{governor::GovernorConfigBuilder, key_extractor::GlobalKeyExtractor, GovernorLayer};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::handlers::{
    audio_endpoint, chat_endpoint, health_check, index_page, metrics_endpoint, not_found,
    translation_endpoint,
};
use crate::metrics::AppMetrics;

/// Room for multipart framing on top of the upload limit
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub llm: Arc<OpenAiClient>,
    pub speech: Arc<SpeechClient>,
    pub metrics: AppMetrics,
    pub config: ServerConfig,
}

impl AppState {
    /// Build the provider clients described by `config`.
    pub fn from_config(config: ServerConfig) -> anyhow::Result<Self> {
        let mut llm = OpenAiClient::new(config.openai_api_key.clone(), config.chat_model.clone())
            .with_base_url(config.openai_base_url.clone())
            .with_timeout(config.upstream_timeout())?;
        if let Some(ref prompt) = config.system_prompt {
            llm = llm.with_system_prompt(prompt.clone());
        }

        let speech = SpeechClient::new(config.openai_api_key.clone())
            .with_base_url(config.openai_base_url.clone())
            .with_options(config.speech.clone())
            .with_timeout(config.upstream_timeout())?;

        Ok(Self {
            llm: Arc::new(llm),
            speech: Arc::new(speech),
            metrics: AppMetrics::new(),
            config,
        })
    }
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_credentials(false);

    let Some(ref allowed_origins) = config.cors_allowed_origins else {
        warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
        return base.allow_origin(Any);
    };

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();

    if origins.is_empty() {
        warn!("CORS_ALLOWED_ORIGINS is empty, falling back to permissive CORS");
        base.allow_origin(Any)
    } else {
        info!("CORS configured for {} origin(s)", origins.len());
        base.allow_origin(AllowOrigin::list(origins))
    }
}

// Request ID middleware for tracing
async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let header = HeaderValue::from_str(&request_id).ok();
    if let Some(ref value) = header {
        request.headers_mut().insert("x-request-id", value.clone());
    }
    let mut response = next.run(request).await;
    if let Some(value) = header {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Assemble the full application: API routes at the root and under `/api`,
/// the chat page at `/`, and the middleware stack.
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let config = state.config.clone();

    // Global limit: every client shares the same bucket.
    let rate = config.rate_limit_per_minute.max(1);
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond((60_000 / rate as u64).max(1))
            .burst_size(rate)
            .key_extractor(GlobalKeyExtractor)
            .finish()
            .context("invalid rate limit configuration")?,
    );
    info!("Rate limiting: {} requests per minute", rate);

    if !config.request_timeout_covers_upstream() {
        warn!(
            request_timeout_secs = config.request_timeout_secs,
            upstream_budget_secs = config.upstream_budget().as_secs(),
            "REQUEST_TIMEOUT_SECS is shorter than the upstream budget; slow translations will end with 408"
        );
    }

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer::new(governor_conf))
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(cors_layer(&config))
        .into_inner();

    let api = Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(health_check))
        .route("/audio", post(audio_endpoint))
        .route("/chat", post(chat_endpoint))
        .route("/translation", post(translation_endpoint))
        .route("/metrics", get(metrics_endpoint));

    let app = Router::new()
        .route("/", get(index_page))
        .merge(api.clone())
        .nest("/api", api)
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(config.max_upload_bytes() + MULTIPART_OVERHEAD_BYTES))
        .layer(axum::middleware::from_fn(add_request_id))
        .layer(middleware_stack)
        .with_state(state);

    Ok(app)
}
