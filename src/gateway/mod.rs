//! HTTP surface: the platform callback endpoints (URL verification and
//! message delivery), the relay-facing proxy endpoint and small admin
//! endpoints for menu management and a self-test message.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Json;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use chrono::Local;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::codec::{self, CallbackParams, EventKind, InboundEvent};
use crate::commands::CommandRouter;
use crate::config::Config;
use crate::crypto::CryptoEnvelope;
use crate::dedup::Deduplicator;
use crate::errors::GatewayError;
use crate::media::MediaService;
use crate::menu::MenuClient;
use crate::notify::Notifier;
use crate::search::SearchAggregator;
use crate::search::backends::build_backends;
use crate::session::SessionStore;
use crate::token::TokenCache;
use crate::utils::{http_client, join_url};

#[derive(Clone)]
pub struct AppState {
    pub crypto: Arc<CryptoEnvelope>,
    pub dedup: Arc<Deduplicator>,
    pub router: Arc<CommandRouter>,
    pub notifier: Arc<Notifier>,
    pub menu: Arc<MenuClient>,
    /// Raw callbacks are mirrored here before local processing.
    pub relay_url: Option<String>,
    pub client: reqwest::Client,
    pub port: u16,
}

pub fn build_state(config: &Config) -> Result<AppState> {
    let crypto = CryptoEnvelope::new(
        config.wecom.token.clone(),
        &config.wecom.encoding_aes_key,
        config.wecom.corp_id.clone(),
    )
    .context("invalid encodingAesKey in config")?;

    let tokens = Arc::new(TokenCache::new());
    let notifier = Arc::new(Notifier::from_config(config, tokens.clone()));
    let media = Arc::new(MediaService::from_config(&config.media));
    let aggregator = Arc::new(SearchAggregator::new(
        build_backends(&config.search),
        notifier.clone(),
        config.search.placeholder_image.clone(),
    ));
    let router = Arc::new(CommandRouter::new(
        Arc::new(SessionStore::new()),
        notifier.clone(),
        media,
        aggregator,
    ));
    let menu = Arc::new(MenuClient::from_config(config, tokens));

    let relay_url = (config.relay.enabled && !config.relay.url.is_empty())
        .then(|| config.relay.url.clone());

    Ok(AppState {
        crypto: Arc::new(crypto),
        dedup: Arc::new(Deduplicator::new()),
        router,
        notifier,
        menu,
        relay_url,
        client: http_client(),
        port: config.server.port,
    })
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(verify_handler).post(callback_handler))
        .route("/wechat", get(verify_handler))
        .route("/wechat/callback", post(callback_handler))
        .route("/api/proxy/message", post(proxy_message_handler))
        .route("/api/send-test", get(send_test_handler))
        .route(
            "/api/menu",
            post(menu_create_handler)
                .get(menu_get_handler)
                .delete(menu_delete_handler),
        )
        .with_state(state)
}

pub async fn run_server(config: &Config) -> Result<()> {
    let state = build_state(config)?;
    let port = state.port;
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;
    info!("gateway: listening on 0.0.0.0:{}", port);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("gateway: shutdown signal received");
        })
        .await
        .context("HTTP server failed")?;
    Ok(())
}

/// URL verification GET. Without `echostr` this is a plain liveness probe.
async fn verify_handler(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Response {
    if params.echostr.is_none() {
        return (StatusCode::OK, "企业微信通知服务运行正常").into_response();
    }
    if params.msg_signature.is_empty() || params.timestamp.is_empty() || params.nonce.is_empty() {
        return (StatusCode::BAD_REQUEST, "缺少必要参数").into_response();
    }
    match codec::decrypt_echo(&params, &state.crypto) {
        Ok(plain) => {
            info!("gateway: URL verification succeeded");
            (StatusCode::OK, plain).into_response()
        }
        Err(GatewayError::SignatureInvalid) => {
            warn!("gateway: URL verification signature mismatch");
            (StatusCode::UNAUTHORIZED, "签名验证失败").into_response()
        }
        Err(err) => {
            warn!("gateway: echostr decrypt failed: {}", err);
            (StatusCode::FORBIDDEN, "echostr解密失败").into_response()
        }
    }
}

/// Message callback POST. The platform retries on anything but a fast
/// `success` body, so the ack never depends on processing: decode and dedup
/// inline, dispatch in the background, answer `success` unconditionally.
async fn callback_handler(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
    body: String,
) -> &'static str {
    if let Some(relay) = &state.relay_url {
        forward_to_relay(&state, relay, &params, body.clone());
    }

    if !body.contains("<xml") {
        warn!("gateway: callback body is not XML, acking anyway");
        return "success";
    }

    match codec::decode_inbound(&body, &params, &state.crypto) {
        Ok(event) => {
            if state.dedup.check_and_mark(&event.msg_id).await {
                let router = state.router.clone();
                tokio::spawn(async move {
                    let reply = router.dispatch(&event).await;
                    debug!("gateway: dispatched, reply {:?}", reply);
                });
            } else {
                info!("gateway: duplicate message {} skipped", event.msg_id);
            }
        }
        Err(err) => {
            warn!("gateway: callback decode failed: {}", err);
        }
    }
    "success"
}

/// Mirror the raw callback to the relay host, best-effort.
fn forward_to_relay(state: &AppState, relay: &str, params: &CallbackParams, body: String) {
    let url = join_url(relay, "callback");
    let client = state.client.clone();
    let query = [
        ("msg_signature", params.msg_signature.clone()),
        ("timestamp", params.timestamp.clone()),
        ("nonce", params.nonce.clone()),
    ];
    tokio::spawn(async move {
        match client
            .post(&url)
            .query(&query)
            .header("content-type", "text/xml")
            .body(body)
            .send()
            .await
        {
            Ok(response) => debug!("gateway: relayed callback, HTTP {}", response.status()),
            Err(err) => warn!("gateway: relay forward failed: {:#}", err),
        }
    });
}

/// JSON message from the relay host, routed like a decrypted text event.
#[derive(Debug, Deserialize)]
struct ProxyMessage {
    message: Option<String>,
    touser: Option<String>,
}

async fn proxy_message_handler(
    State(state): State<AppState>,
    Json(body): Json<ProxyMessage>,
) -> Response {
    let Some(message) = body.message.filter(|m| !m.trim().is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "message": "缺少message参数"})),
        )
            .into_response();
    };
    let to = body.touser.unwrap_or_else(|| "@all".to_string());
    info!("gateway: proxy message from {}", to);
    let event = InboundEvent {
        msg_id: String::new(),
        from_user: to,
        kind: EventKind::Text,
        content: message,
    };
    let response = state.router.dispatch(&event).await;
    Json(json!({"success": true, "response": response})).into_response()
}

#[derive(Debug, Deserialize)]
struct TestParams {
    content: Option<String>,
    touser: Option<String>,
}

fn self_test_message(state: &AppState) -> String {
    format!(
        "网关自检消息\n版本: {}\n端口: {}\n中继: {}\n时间: {}",
        crate::VERSION,
        state.port,
        state.relay_url.as_deref().unwrap_or("未启用"),
        Local::now().format("%Y-%m-%d %H:%M:%S")
    )
}

async fn send_test_handler(
    State(state): State<AppState>,
    Query(params): Query<TestParams>,
) -> Response {
    let content = params
        .content
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| self_test_message(&state));
    let to = params.touser.unwrap_or_else(|| "@all".to_string());
    let outcome = state.notifier.send_text(&content, &to).await;
    Json(json!({
        "success": outcome.success,
        "msgId": outcome.msg_id,
    }))
    .into_response()
}

async fn menu_create_handler(State(state): State<AppState>) -> Response {
    match state.menu.create().await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(err) => menu_error(&err),
    }
}

async fn menu_get_handler(State(state): State<AppState>) -> Response {
    match state.menu.get().await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(err) => menu_error(&err),
    }
}

async fn menu_delete_handler(State(state): State<AppState>) -> Response {
    match state.menu.delete().await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(err) => menu_error(&err),
    }
}

fn menu_error(err: &anyhow::Error) -> Response {
    error!("gateway: menu operation failed: {:#}", err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"success": false, "message": format!("{err:#}")})),
    )
        .into_response()
}
