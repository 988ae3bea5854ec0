use anyhow::{anyhow, Result};
use async_stream::try_stream;
use futures_util::{Stream, StreamExt};
use reqwest::header::CONTENT_TYPE;
use std::pin::Pin;

use crate::models::{ChatRequest, Message, StreamEvent};
use crate::protocol::LineDecoder;
use crate::store::ChatStore;
use crate::telemetry;

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/**
 * \brief /api/chat 的 HTTP 客户端，负责把数据流解码为事件。
 */
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    endpoint: String,
}

impl ChatClient {
    /**
     * \brief \param base 服务地址，如 "http://127.0.0.1:3000"
     */
    pub fn new(base: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/api/chat", base.trim_end_matches('/')),
        })
    }

    /**
     * \brief 发送会话并返回事件流。非 2xx 响应的错误文本以状态码开头。
     */
    pub async fn stream(&self, messages: &[Message]) -> Result<EventStream> {
        let body = ChatRequest {
            messages: messages.to_vec(),
        };
        let resp = self
            .http
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("{}: {}", status, text));
        }

        let mut bytes = resp.bytes_stream();
        let mut decoder = LineDecoder::new();
        let out = try_stream! {
            while let Some(chunk) = bytes.next().await {
                let chunk = chunk?;
                for event in decoder.push(&chunk)? {
                    yield event;
                }
            }
            if let Some(event) = decoder.finish()? {
                yield event;
            }
        };
        Ok(Box::pin(out))
    }
}

/**
 * \brief 把客户端与状态容器组合起来，驱动一轮完整的发送/重新生成。
 *        同一会话同一时间只有一轮生成。
 */
pub struct ChatSession {
    client: ChatClient,
    store: ChatStore,
}

impl ChatSession {
    pub fn new(client: ChatClient, store: ChatStore) -> Self {
        Self { client, store }
    }

    pub fn store(&self) -> &ChatStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ChatStore {
        &mut self.store
    }

    /**
     * \brief 发送新的用户消息。
     */
    pub async fn send(&mut self, text: &str) {
        let conversation = self.store.send_user_message(text);
        self.run(conversation).await;
    }

    /**
     * \brief 编辑指定消息并重新生成；消息不存在时返回 false。
     */
    pub async fn edit(&mut self, id: &str, text: &str) -> bool {
        match self.store.edit_message(id, text) {
            Some(conversation) => {
                self.run(conversation).await;
                true
            }
            None => false,
        }
    }

    /**
     * \brief 重新生成最后一条助手回复。
     */
    pub async fn regenerate(&mut self) -> bool {
        match self.store.reload() {
            Some(conversation) => {
                self.run(conversation).await;
                true
            }
            None => false,
        }
    }

    async fn run(&mut self, conversation: Vec<Message>) {
        telemetry::log_event(
            "cli.chat",
            &format!("request messages={}", conversation.len()),
        );
        let mut stream = match self.client.stream(&conversation).await {
            Ok(s) => s,
            Err(e) => {
                telemetry::log_error("cli.chat", &format!("request failed: {}", e));
                self.store.apply_event(StreamEvent::Error(e.to_string()));
                return;
            }
        };

        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => {
                    let terminal = event.is_terminal();
                    self.store.apply_event(event);
                    if terminal {
                        return;
                    }
                }
                Err(e) => {
                    telemetry::log_error("cli.chat", &format!("stream error: {}", e));
                    self.store.apply_event(StreamEvent::Error(e.to_string()));
                    return;
                }
            }
        }
        self.store.abort_stream();
    }
}
