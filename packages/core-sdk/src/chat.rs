use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::{Stream, StreamExt};
use serde_json::json;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::config::{AppConfig, RunMode};
use crate::llm::{self, Completion};
use crate::model::{select_model, ConfigError, ModelHandle, CONFIG_HINT};
use crate::models::{
    most_recent_user_message, provider_messages, ChatRequest, Message, StreamEvent,
};
use crate::{prompts, protocol, telemetry};

/** \brief 生成消息 ID 的固定前缀，避免与客户端 ID 冲突。 */
pub const MESSAGE_ID_PREFIX: &str = "msgs";

pub const NO_USER_MESSAGE: &str = "No user message found";

/**
 * \brief 聊天接口在响应头发出之前可能出现的错误。
 *        生成阶段的错误走数据流自身的 error 通道，不在此列。
 */
#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid request body: {0}")]
    MalformedBody(#[from] serde_json::Error),
    #[error("No user message found")]
    NoUserMessage,
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl ChatError {
    /**
     * \brief 映射为 HTTP 响应；只有非生产模式才附带 details。
     */
    pub fn into_response_for(self, run_mode: RunMode) -> Response {
        match self {
            ChatError::Config(err) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": err.to_string(), "hint": CONFIG_HINT })),
            )
                .into_response(),
            ChatError::NoUserMessage => (StatusCode::NOT_FOUND, NO_USER_MESSAGE).into_response(),
            ChatError::MalformedBody(err) => {
                let details = run_mode.verbose_errors().then(|| format!("{:?}", err));
                internal_error(format!("invalid request body: {}", err), details)
            }
            ChatError::Unexpected(err) => {
                let details = run_mode.verbose_errors().then(|| format!("{:?}", err));
                internal_error(err.to_string(), details)
            }
        }
    }
}

fn internal_error(error: String, details: Option<String>) -> Response {
    let mut body = json!({ "error": error });
    if let Some(details) = details {
        body["details"] = json!(details);
    }
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

/**
 * \brief 生成形如 msgs-<32 位十六进制> 的消息 ID。
 */
pub fn generate_message_id() -> String {
    format!("{}-{}", MESSAGE_ID_PREFIX, uuid::Uuid::new_v4().simple())
}

/**
 * \brief 流式生成前的同步检查：选择模型、解析请求体、定位最近的用户消息。
 *        任何一步失败都不会产生网络请求。
 */
pub fn prepare(
    config: &AppConfig,
    body: &[u8],
) -> Result<(ModelHandle, Vec<Message>), ChatError> {
    let handle = match select_model(&config.credentials, &config.endpoints) {
        Ok(handle) => {
            telemetry::log_event(
                "server.model",
                &format!(
                    "model initialized provider={} model={} structured_outputs={}",
                    handle.provider.name(),
                    handle.model,
                    handle.structured_outputs
                ),
            );
            handle
        }
        Err(err) => {
            telemetry::log_error("server.model", &format!("failed to get model: {}", err));
            return Err(err.into());
        }
    };

    let request: ChatRequest = serde_json::from_slice(body)?;
    telemetry::log_event(
        "server.chat",
        &format!("received messages={}", request.messages.len()),
    );

    if most_recent_user_message(&request.messages).is_none() {
        return Err(ChatError::NoUserMessage);
    }

    Ok((handle, request.messages))
}

/**
 * \brief 处理一次 POST /api/chat。
 */
pub async fn handle(config: Arc<AppConfig>, body: Bytes) -> Response {
    let run_mode = config.run_mode;
    match prepare(&config, &body) {
        Ok((handle, messages)) => {
            let stream = relay(handle, messages, run_mode, config.max_duration);
            stream_response(stream)
        }
        Err(err) => {
            if let ChatError::Unexpected(ref e) = err {
                telemetry::log_error("server.chat", &format!("chat api error: {:?}", e));
            }
            err.into_response_for(run_mode)
        }
    }
}

/**
 * \brief 以数据流协议逐行转发模型输出。连接断开（发送失败）时停止拉取上游。
 */
pub fn relay(
    handle: ModelHandle,
    messages: Vec<Message>,
    run_mode: RunMode,
    max_duration: Duration,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    let (tx, rx) = mpsc::unbounded_channel::<StreamEvent>();
    let deadline = Instant::now() + max_duration;

    tokio::spawn(async move {
        let message_id = generate_message_id();
        let payload = provider_messages(prompts::PROMPT, &messages);
        let error_text = |e: &anyhow::Error| {
            if run_mode.verbose_errors() {
                e.to_string()
            } else {
                protocol::GENERIC_ERROR.to_string()
            }
        };

        telemetry::log_event(
            "server.chat",
            &format!(
                "stream start provider={} model={} message_id={} msgs={}",
                handle.provider.name(),
                handle.model,
                message_id,
                messages.len()
            ),
        );

        if tx.send(StreamEvent::Start { message_id }).is_err() {
            return;
        }

        let mut upstream = match timeout_at(deadline, llm::stream_chat(&handle, &payload)).await {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                telemetry::log_error("server.chat", &format!("stream failed: {}", e));
                let _ = tx.send(StreamEvent::Error(error_text(&e)));
                return;
            }
            Err(_) => {
                let e = deadline_exceeded(max_duration);
                telemetry::log_error("server.chat", &e.to_string());
                let _ = tx.send(StreamEvent::Error(error_text(&e)));
                return;
            }
        };

        let mut delivered = 0usize;
        loop {
            let item = match timeout_at(deadline, upstream.next()).await {
                Ok(item) => item,
                Err(_) => {
                    let e = deadline_exceeded(max_duration);
                    telemetry::log_error("server.chat", &e.to_string());
                    let _ = tx.send(StreamEvent::Error(error_text(&e)));
                    break;
                }
            };
            match item {
                Some(Ok(Completion::Delta(delta))) => {
                    delivered += delta.len();
                    if tx.send(StreamEvent::TextDelta(delta)).is_err() {
                        telemetry::log_event("server.chat", "client disconnected, stream dropped");
                        return;
                    }
                }
                Some(Ok(Completion::Done {
                    finish_reason,
                    usage,
                })) => {
                    let _ = tx.send(StreamEvent::Finish {
                        finish_reason: finish_reason.unwrap_or_else(|| "stop".to_string()),
                        usage: usage.unwrap_or_default(),
                    });
                    break;
                }
                Some(Err(e)) => {
                    telemetry::log_error("server.chat", &format!("stream error: {}", e));
                    let _ = tx.send(StreamEvent::Error(error_text(&e)));
                    break;
                }
                None => break,
            }
        }

        telemetry::log_event(
            "server.chat",
            &format!("stream end delivered_bytes={}", delivered),
        );
    });

    UnboundedReceiverStream::new(rx).map(|event| Ok(Bytes::from(protocol::encode(&event))))
}

fn deadline_exceeded(max_duration: Duration) -> anyhow::Error {
    anyhow::anyhow!("request exceeded {:?}", max_duration)
}

fn stream_response<S>(stream: S) -> Response
where
    S: Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
{
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(protocol::CONTENT_TYPE),
    );
    headers.insert(
        protocol::STREAM_HEADER,
        HeaderValue::from_static(protocol::STREAM_HEADER_VALUE),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    (headers, Body::from_stream(stream)).into_response()
}
