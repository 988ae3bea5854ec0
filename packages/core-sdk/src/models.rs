use serde::{Deserialize, Deserializer, Serialize};

/**
 * \brief 消息角色。前端只会产生 user/assistant，system 仅透传给模型；
 *        其它角色（如 data）解析为 Other，不发往模型。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Other,
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            "system" => Role::System,
            _ => Role::Other,
        })
    }
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Other => "other",
        }
    }
}

/**
 * \brief 消息片段。目前只处理文本，其它类型落入 Unknown 并被跳过。
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    #[serde(other)]
    Unknown,
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        MessagePart::Text { text: text.into() }
    }
}

/**
 * \brief 会话中的单条消息，字段与前端 useChat 的消息结构对齐。
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /** \brief 会话内唯一 ID */
    pub id: String,
    /** \brief 角色 */
    pub role: Role,
    /** \brief 有序片段 */
    #[serde(default)]
    pub parts: Vec<MessagePart>,
    /** \brief 旧版客户端只发送 content，parts 为空时以它为准 */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Message {
    pub fn new(id: impl Into<String>, role: Role, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            parts: vec![MessagePart::text(text)],
            content: None,
        }
    }

    /**
     * \brief 拼接全部文本片段；parts 为空时回退到 content。
     */
    pub fn text(&self) -> String {
        if self.parts.is_empty() {
            return self.content.clone().unwrap_or_default();
        }
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text { text } => Some(text.as_str()),
                MessagePart::Unknown => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/**
 * \brief POST /api/chat 的请求体。
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
}

/**
 * \brief 从末尾向前查找最近一条用户消息。
 */
pub fn most_recent_user_message(messages: &[Message]) -> Option<&Message> {
    messages.iter().rev().find(|m| m.role == Role::User)
}

/**
 * \brief 发往模型服务的消息，与 OpenAI Chat 消息格式对齐。
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMessage {
    /** \brief 角色：system/user/assistant */
    pub role: String,
    /** \brief 内容 */
    pub content: String,
}

/**
 * \brief 组装模型请求：系统提示在前，随后是完整会话。
 */
pub fn provider_messages(system: &str, messages: &[Message]) -> Vec<ProviderMessage> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    out.push(ProviderMessage {
        role: "system".to_string(),
        content: system.to_string(),
    });
    for msg in messages.iter().filter(|m| m.role != Role::Other) {
        out.push(ProviderMessage {
            role: msg.role.as_str().to_string(),
            content: msg.text(),
        });
    }
    out
}

/**
 * \brief token 用量，字段名沿用数据流协议的驼峰写法。
 */
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/**
 * \brief 流式生成过程中的事件。
 */
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Start { message_id: String },
    TextDelta(String),
    Finish {
        finish_reason: String,
        usage: Usage,
    },
    Error(String),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Finish { .. } | StreamEvent::Error(_))
    }
}
