use anyhow::{anyhow, Result};
use async_stream::try_stream;
use futures_util::Stream;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};
use std::pin::Pin;

use crate::model::ModelHandle;
use crate::models::{ProviderMessage, Usage};

/**
 * \brief 模型服务返回的增量片段。
 */
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /** \brief 文本增量 */
    Delta(String),
    /** \brief 流正常结束，附带结束原因与用量（若服务端提供） */
    Done {
        finish_reason: Option<String>,
        usage: Option<Usage>,
    },
}

pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<Completion>> + Send>>;

/**
 * \brief 以 OpenAI 兼容协议发起流式生成。Groq 与 OpenAI 共用此实现。
 *        非 2xx 响应在建立流之前即返回错误，错误文本包含状态码。
 */
pub async fn stream_chat(
    handle: &ModelHandle,
    messages: &[ProviderMessage],
) -> Result<CompletionStream> {
    let url = format!(
        "{}/v1/chat/completions",
        handle.api_base.trim_end_matches('/')
    );
    let client = reqwest::Client::builder().build()?;
    let body = json!({
        "model": handle.model,
        "messages": messages,
        "stream": true,
        "stream_options": { "include_usage": true }
    });

    let resp = client
        .post(url)
        .header(CONTENT_TYPE, "application/json")
        .header(AUTHORIZATION, format!("Bearer {}", handle.api_key))
        .json(&body)
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(anyhow!("request failed: {} -> {}", status, text));
    }

    let mut stream = resp.bytes_stream();
    let mut buf = Vec::<u8>::new();
    let mut finish_reason: Option<String> = None;
    let mut usage: Option<Usage> = None;

    let out = try_stream! {
        use futures_util::StreamExt;
        let mut done = false;
        while !done {
            let chunk = match stream.next().await {
                Some(chunk) => chunk?,
                None => break,
            };
            buf.extend_from_slice(&chunk);
            while let Some(pos) = find_double_newline(&buf) {
                let block = buf.drain(..pos + 2).collect::<Vec<u8>>();
                let line = match extract_data_line(&block) {
                    Some(line) => line,
                    None => continue,
                };
                if line.trim() == "[DONE]" {
                    done = true;
                    break;
                }
                let frame = parse_frame(&line)?;
                if frame.finish_reason.is_some() {
                    finish_reason = frame.finish_reason;
                }
                if frame.usage.is_some() {
                    usage = frame.usage;
                }
                if let Some(delta) = frame.delta {
                    yield Completion::Delta(delta);
                }
            }
        }
        if !done && !buf.is_empty() {
            if let Some(line) = extract_data_line(&buf) {
                if line.trim() != "[DONE]" {
                    let frame = parse_frame(&line)?;
                    if frame.finish_reason.is_some() {
                        finish_reason = frame.finish_reason;
                    }
                    if frame.usage.is_some() {
                        usage = frame.usage;
                    }
                    if let Some(delta) = frame.delta {
                        yield Completion::Delta(delta);
                    }
                }
            }
        }
        yield Completion::Done { finish_reason, usage };
    };

    Ok(Box::pin(out))
}

#[derive(Debug, Default, PartialEq)]
struct Frame {
    delta: Option<String>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
}

fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

fn extract_data_line(block: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(block);
    for line in text.lines() {
        let line = line.trim_start();
        if let Some(rest) = line.strip_prefix("data:") {
            return Some(rest.trim().to_string());
        }
    }
    None
}

/**
 * \brief 解析单个 SSE data 负载；服务端在流中下发的 error 对象转为错误。
 */
fn parse_frame(line: &str) -> Result<Frame> {
    let v: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => return Ok(Frame::default()),
    };
    if let Some(err) = v.get("error") {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| err.to_string());
        return Err(anyhow!("provider error: {}", message));
    }
    let choice = v.get("choices").and_then(|c| c.get(0));
    let delta = choice
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());
    let finish_reason = choice
        .and_then(|c| c.get("finish_reason"))
        .and_then(|r| r.as_str())
        .map(|s| s.to_string());
    let usage = v
        .get("usage")
        .filter(|u| !u.is_null())
        .or_else(|| v.get("x_groq").and_then(|x| x.get("usage")))
        .and_then(parse_usage);
    Ok(Frame {
        delta,
        finish_reason,
        usage,
    })
}

fn parse_usage(v: &Value) -> Option<Usage> {
    let prompt = v.get("prompt_tokens").and_then(|t| t.as_u64())?;
    let completion = v.get("completion_tokens").and_then(|t| t.as_u64())?;
    Some(Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
    })
}
