// 数据流协议（data stream v1）：每行 `<code>:<json>\n`，前端 useChat 直接消费。

use anyhow::{anyhow, Result};
use serde_json::{json, Value};

use crate::models::{StreamEvent, Usage};

/** \brief 响应头名称与取值，客户端据此识别数据流协议。 */
pub const STREAM_HEADER: &str = "x-vercel-ai-data-stream";
pub const STREAM_HEADER_VALUE: &str = "v1";
pub const CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/** \brief 生产环境下替代原始错误的通用文本。 */
pub const GENERIC_ERROR: &str = "An error occurred.";

/**
 * \brief 把一个事件编码为协议行。Finish 对应 step 结束与消息结束两行。
 */
pub fn encode(event: &StreamEvent) -> String {
    match event {
        StreamEvent::Start { message_id } => {
            format!("f:{}\n", json!({ "messageId": message_id }))
        }
        StreamEvent::TextDelta(delta) => format!("0:{}\n", json!(delta)),
        StreamEvent::Error(text) => format!("3:{}\n", json!(text)),
        StreamEvent::Finish {
            finish_reason,
            usage,
        } => {
            let step = json!({
                "finishReason": finish_reason,
                "usage": usage,
                "isContinued": false,
            });
            let message = json!({
                "finishReason": finish_reason,
                "usage": usage,
            });
            format!("e:{}\nd:{}\n", step, message)
        }
    }
}

/**
 * \brief 解析单行。step 结束行（e:）与未知前缀返回 None，由消息结束行（d:）产生 Finish。
 */
pub fn decode_line(line: &str) -> Result<Option<StreamEvent>> {
    let line = line.trim_end_matches(|c| c == '\r' || c == '\n');
    if line.is_empty() {
        return Ok(None);
    }
    let (code, payload) = line
        .split_once(':')
        .ok_or_else(|| anyhow!("malformed stream line: {}", line))?;
    let value: Value = serde_json::from_str(payload)?;
    let event = match code {
        "f" => Some(StreamEvent::Start {
            message_id: value
                .get("messageId")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        }),
        "0" => Some(StreamEvent::TextDelta(
            value
                .as_str()
                .ok_or_else(|| anyhow!("text part must be a string"))?
                .to_string(),
        )),
        "3" => Some(StreamEvent::Error(
            value.as_str().map(|s| s.to_string()).unwrap_or_else(|| value.to_string()),
        )),
        "d" => Some(StreamEvent::Finish {
            finish_reason: value
                .get("finishReason")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string(),
            usage: value
                .get("usage")
                .and_then(|u| serde_json::from_value::<Usage>(u.clone()).ok())
                .unwrap_or_default(),
        }),
        _ => None,
    };
    Ok(event)
}

/**
 * \brief 按行切分字节流的增量解码器；跨 chunk 的半行会保留到下一次 push。
 */
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<StreamEvent>> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line = self.buf.drain(..=pos).collect::<Vec<u8>>();
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = decode_line(&line)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /**
     * \brief 流结束时处理末尾没有换行的残留数据。
     */
    pub fn finish(&mut self) -> Result<Option<StreamEvent>> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        let rest = std::mem::take(&mut self.buf);
        decode_line(&String::from_utf8_lossy(&rest))
    }
}
