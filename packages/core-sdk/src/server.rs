use std::any::Any;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, get_service, post},
    Json, Router,
};
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::services::ServeDir;

use crate::chat::ChatError;
use crate::config::{AppConfig, RunMode};
use crate::model::{select_model, CONFIG_HINT};
use crate::{chat, telemetry};

/**
 * \brief 路由共享状态，只读配置。
 */
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

/**
 * \brief 构建路由：聊天接口、健康检查与站点静态文件。
 */
pub fn router(state: AppState) -> Router {
    let static_service = get_service(
        ServeDir::new(&state.config.site_dir).append_index_html_on_directories(true),
    );
    let run_mode = state.config.run_mode;

    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/health", get(health_check))
        .fallback_service(static_service)
        .layer(CatchPanicLayer::custom(
            move |err: Box<dyn Any + Send + 'static>| handle_panic(err, run_mode),
        ))
        .with_state(state)
}

/**
 * \brief 启动 HTTP 服务。
 */
pub async fn run(config: AppConfig) -> Result<()> {
    telemetry::set_enabled(config.telemetry_enabled);
    let addr = config.addr.clone();
    let app = router(AppState::new(config));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    println!("Server listening on http://{}", addr);
    telemetry::log_event("server", &format!("listening addr={}", addr));
    axum::serve(listener, app).await?;
    Ok(())
}

/**
 * \brief 聊天接口：POST /api/chat，body 为 {"messages": [...]}。
 */
async fn chat_handler(State(state): State<AppState>, body: Bytes) -> Response {
    chat::handle(state.config.clone(), body).await
}

/**
 * \brief 健康检查：只检查凭证配置，不访问模型服务。
 */
async fn health_check(State(state): State<AppState>) -> Response {
    match select_model(&state.config.credentials, &state.config.endpoints) {
        Ok(handle) => Json(json!({
            "ok": true,
            "provider": handle.provider.name(),
            "model": handle.model,
        }))
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "ok": false,
                "error": e.to_string(),
                "hint": CONFIG_HINT,
            })),
        )
            .into_response(),
    }
}

/**
 * \brief 处理器 panic 时按未预期错误返回 500。
 */
fn handle_panic(err: Box<dyn Any + Send + 'static>, run_mode: RunMode) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "Text generation failed. Please try again.".to_string()
    };
    telemetry::log_error("server.chat", &format!("handler panicked: {}", detail));
    ChatError::Unexpected(anyhow!(detail)).into_response_for(run_mode)
}
