//! HTTP surface: both public dialects in front of the one provider.

use crate::alias::AliasTable;
use crate::bridge::{CompletionProvider, EventStream};
use crate::canonical::{CanonicalRequest, FinalMessage, ProviderEvent};
use crate::config::BridgeConfig;
use crate::error::{ProxyError, Result};
use crate::translate::anthropic_types::{
    AnthropicModelsResponse, ErrorResponse, MessagesRequest,
};
use crate::translate::openai_types::{
    ChatCompletionRequest, ChatErrorResponse, ModelsListResponse,
};
use crate::translate::response::{
    final_to_anthropic, final_to_openai, model_to_anthropic, model_to_openai,
};
use crate::translate::streaming::{AnthropicStreamTranslator, OpenAiStreamTranslator};
use crate::translate::request as translate_request;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub config: BridgeConfig,
    pub provider: Arc<dyn CompletionProvider>,
    pub anthropic_aliases: AliasTable,
    pub openai_aliases: AliasTable,
}

impl AppState {
    pub fn new(config: BridgeConfig, provider: Arc<dyn CompletionProvider>) -> Self {
        let anthropic_aliases = AliasTable::anthropic(&config.models.anthropic);
        let openai_aliases = AliasTable::openai(&config.models.openai);
        Self {
            config,
            provider,
            anthropic_aliases,
            openai_aliases,
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/messages", post(handle_messages))
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/v1/models", get(handle_models))
        .route("/v1/models/:id", get(handle_model))
        .route("/health", get(handle_health))
        .route("/", get(handle_root))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Anthropic dialect
// ---------------------------------------------------------------------------

async fn handle_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Reject before any process is spawned; the serde error names the
    // offending field.
    let req: MessagesRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected malformed messages request");
            let err = ErrorResponse::invalid_request(format!("Invalid request body: {e}"));
            return (StatusCode::BAD_REQUEST, Json(err)).into_response();
        }
    };

    let is_streaming = req.stream.unwrap_or(false);
    let model = state.anthropic_aliases.resolve(&req.model).to_string();

    tracing::info!(
        requested = %req.model,
        %model,
        streaming = is_streaming,
        messages = req.messages.len(),
        "Messages request"
    );

    let (turns, system_prompt, tools) = translate_request::anthropic_to_canonical(&req);
    let canonical = CanonicalRequest {
        model,
        turns,
        system_prompt,
        tools,
        temperature: req.temperature,
        max_tokens: Some(req.max_tokens),
        stream: is_streaming,
    };

    let request_id = request_id("msg_");
    let stream = state.provider.stream_events(canonical, api_key(&headers));

    if is_streaming {
        stream_anthropic(stream, request_id, req.model.clone())
    } else {
        match collect_final(stream).await {
            Ok(message) => {
                Json(final_to_anthropic(&message, &request_id, &req.model)).into_response()
            }
            Err(e) => {
                tracing::error!(error = %e, "Completion failed");
                let err = ErrorResponse::api_error(e.to_string());
                (StatusCode::INTERNAL_SERVER_ERROR, Json(err)).into_response()
            }
        }
    }
}

fn stream_anthropic(mut events: EventStream, request_id: String, model: String) -> Response {
    let sse = async_stream::stream! {
        let mut translator = AnthropicStreamTranslator::new(&request_id, &model);

        for frame in translator.start() {
            yield sse_named(&frame);
        }

        while let Some(item) = events.next().await {
            match item {
                Ok(event) => {
                    for frame in translator.process_event(&event) {
                        yield sse_named(&frame);
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Stream failed mid-flight");
                    for frame in translator.fail(&e.to_string()) {
                        yield sse_named(&frame);
                    }
                    break;
                }
            }
        }

        // Provider ended without a terminal event; close the message.
        for frame in translator.finish() {
            yield sse_named(&frame);
        }
    };

    Sse::new(sse.map(Ok::<Event, Infallible>))
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn sse_named(frame: &crate::translate::anthropic_types::StreamEvent) -> Event {
    let data = serde_json::to_string(frame).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to serialize stream frame");
        String::from("{}")
    });
    Event::default().event(frame.event_name()).data(data)
}

// ---------------------------------------------------------------------------
// OpenAI dialect
// ---------------------------------------------------------------------------

async fn handle_chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let req: ChatCompletionRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected malformed chat completions request");
            let err = ChatErrorResponse::invalid_request(format!("Invalid request body: {e}"));
            return (StatusCode::BAD_REQUEST, Json(err)).into_response();
        }
    };

    let is_streaming = req.stream.unwrap_or(false);
    let model = state.openai_aliases.resolve(&req.model).to_string();

    tracing::info!(
        requested = %req.model,
        %model,
        streaming = is_streaming,
        messages = req.messages.len(),
        "Chat completions request"
    );

    let (turns, system_prompt, tools) = translate_request::openai_to_canonical(&req);
    let canonical = CanonicalRequest {
        model,
        turns,
        system_prompt,
        tools,
        temperature: req.temperature,
        max_tokens: req.max_tokens,
        stream: is_streaming,
    };

    let request_id = request_id("chatcmpl-");
    let created = chrono::Utc::now().timestamp();
    let stream = state.provider.stream_events(canonical, api_key(&headers));

    if is_streaming {
        stream_openai(stream, request_id, req.model.clone(), created)
    } else {
        match collect_final(stream).await {
            Ok(message) => {
                Json(final_to_openai(&message, &request_id, &req.model, created)).into_response()
            }
            Err(e) => {
                tracing::error!(error = %e, "Completion failed");
                let err = ChatErrorResponse::api_error(e.to_string());
                (StatusCode::INTERNAL_SERVER_ERROR, Json(err)).into_response()
            }
        }
    }
}

fn stream_openai(
    mut events: EventStream,
    request_id: String,
    model: String,
    created: i64,
) -> Response {
    let sse = async_stream::stream! {
        let mut translator = OpenAiStreamTranslator::new(&request_id, &model, created);

        while let Some(item) = events.next().await {
            match item {
                Ok(event) => {
                    if let Some(chunk) = translator.process_event(&event) {
                        yield sse_chunk(&chunk);
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Stream failed mid-flight");
                    if let Some(chunk) = translator.fail() {
                        yield sse_chunk(&chunk);
                    }
                    break;
                }
            }
        }

        if let Some(chunk) = translator.finish() {
            yield sse_chunk(&chunk);
        }

        // The dialect's terminal sentinel, always last.
        yield Event::default().data("[DONE]");
    };

    Sse::new(sse.map(Ok::<Event, Infallible>))
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn sse_chunk(chunk: &crate::translate::openai_types::ChatCompletionChunk) -> Event {
    let data = serde_json::to_string(chunk).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to serialize stream chunk");
        String::from("{}")
    });
    Event::default().data(data)
}

// ---------------------------------------------------------------------------
// Model listing
// ---------------------------------------------------------------------------

async fn handle_models(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let models = state.provider.list_models().await;

    // Both dialects share this path; Anthropic clients identify themselves
    // with the anthropic-version header.
    if headers.contains_key("anthropic-version") {
        let resp = AnthropicModelsResponse {
            data: models.iter().map(model_to_anthropic).collect(),
            has_more: false,
        };
        Json(resp).into_response()
    } else {
        let resp = ModelsListResponse {
            object: "list".to_string(),
            data: models.iter().map(model_to_openai).collect(),
        };
        Json(resp).into_response()
    }
}

async fn handle_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let models = state.provider.list_models().await;
    match models.iter().find(|m| m.id == id) {
        Some(model) => Json(model_to_openai(model)).into_response(),
        None => {
            let err = ChatErrorResponse::invalid_request(format!("Unknown model: {id}"));
            (StatusCode::NOT_FOUND, Json(err)).into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// Liveness
// ---------------------------------------------------------------------------

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ["/v1/messages", "/v1/chat/completions", "/v1/models", "/health"],
    }))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Drain the event stream and return the authoritative final message. Used
/// by the non-streaming paths; partial events are never re-assembled.
async fn collect_final(mut events: EventStream) -> Result<FinalMessage> {
    while let Some(item) = events.next().await {
        if let ProviderEvent::Done { reason, message } = item? {
            let stop_reason = ProviderEvent::done_stop_reason(reason, &message);
            return Ok(FinalMessage {
                stop_reason,
                ..message
            });
        }
    }
    Err(ProxyError::bridge(
        "Provider stream ended without a final message",
    ))
}

/// Per-call bearer token, forwarded verbatim to the provider. The Anthropic
/// dialect sends `x-api-key`; the OpenAI dialect sends `Authorization`.
fn api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        if !key.is_empty() {
            return Some(key.to_string());
        }
    }
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|v| !v.is_empty())
        .map(String::from)
}

fn request_id(prefix: &str) -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}{}", &hex[..24])
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn api_key_prefers_x_api_key() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("sk-1"));
        headers.insert("authorization", HeaderValue::from_static("Bearer sk-2"));
        assert_eq!(api_key(&headers), Some("sk-1".to_string()));
    }

    #[test]
    fn api_key_falls_back_to_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer sk-2"));
        assert_eq!(api_key(&headers), Some("sk-2".to_string()));

        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(api_key(&headers), None);
    }

    #[test]
    fn api_key_absent() {
        assert_eq!(api_key(&HeaderMap::new()), None);
    }

    #[test]
    fn request_ids_carry_the_dialect_prefix() {
        let id = request_id("msg_");
        assert!(id.starts_with("msg_"));
        assert_eq!(id.len(), "msg_".len() + 24);

        let id = request_id("chatcmpl-");
        assert!(id.starts_with("chatcmpl-"));
        assert_ne!(request_id("chatcmpl-"), id);
    }
}
