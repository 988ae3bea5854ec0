use crate::models::{Message, MessagePart, Role};

/**
 * \brief 单个气泡。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bubble {
    User { text: String, show_actions: bool },
    Assistant { text: String },
}

/**
 * \brief 一条消息对应的显示区域；非文本片段不产生气泡，区域可能为空。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub id: String,
    pub bubbles: Vec<Bubble>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedTranscript {
    pub messages: Vec<RenderedMessage>,
    /** \brief 是否在末尾显示“思考中”提示 */
    pub thinking: bool,
}

/**
 * \brief 把会话渲染为气泡列表。只有最后两条消息上的用户气泡提供编辑操作。
 */
pub fn render(messages: &[Message], is_thinking: bool) -> RenderedTranscript {
    let total = messages.len();
    let rendered = messages
        .iter()
        .enumerate()
        .map(|(idx, message)| {
            let show_actions = idx + 1 == total || idx + 2 == total;
            let bubbles = message
                .parts
                .iter()
                .filter_map(|part| match part {
                    MessagePart::Text { text } => Some(match message.role {
                        Role::User => Bubble::User {
                            text: text.clone(),
                            show_actions,
                        },
                        _ => Bubble::Assistant { text: text.clone() },
                    }),
                    MessagePart::Unknown => None,
                })
                .collect();
            RenderedMessage {
                id: message.id.clone(),
                bubbles,
            }
        })
        .collect();
    RenderedTranscript {
        messages: rendered,
        thinking: is_thinking,
    }
}
