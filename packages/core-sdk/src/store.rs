use crate::models::{Message, MessagePart, Role, StreamEvent};

/**
 * \brief 状态变更通知。订阅者按注册顺序同步收到。
 */
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    MessagesChanged,
    TextAppended { message_id: String, delta: String },
    GeneratingChanged(bool),
    /** \brief 错误从无到有时触发一次 */
    ErrorRaised(String),
    ErrorCleared,
}

pub type Listener = Box<dyn FnMut(&StoreEvent) + Send>;

/**
 * \brief 聊天会话的客户端状态容器。所有修改都经由下列方法完成，
 *        每次修改后通知订阅者。
 */
#[derive(Default)]
pub struct ChatStore {
    messages: Vec<Message>,
    error: Option<String>,
    generating: bool,
    streaming_id: Option<String>,
    listeners: Vec<Listener>,
}

impl std::fmt::Debug for ChatStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStore")
            .field("messages", &self.messages)
            .field("error", &self.error)
            .field("generating", &self.generating)
            .field("streaming_id", &self.streaming_id)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl ChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_generating(&self) -> bool {
        self.generating
    }

    /**
     * \brief 注册订阅者。
     */
    pub fn subscribe(&mut self, listener: Listener) {
        self.listeners.push(listener);
    }

    fn emit(&mut self, event: StoreEvent) {
        for listener in self.listeners.iter_mut() {
            listener(&event);
        }
    }

    pub fn append_message(&mut self, message: Message) {
        self.messages.push(message);
        self.emit(StoreEvent::MessagesChanged);
    }

    /**
     * \brief 追加一条用户消息并返回需要发送的完整会话。
     */
    pub fn send_user_message(&mut self, text: &str) -> Vec<Message> {
        let id = format!("user-{}", uuid::Uuid::new_v4().simple());
        self.append_message(Message::new(id, Role::User, text));
        self.begin_request();
        self.messages.clone()
    }

    /**
     * \brief 把指定消息所有文本片段替换为新文本。消息不存在时返回 false。
     */
    pub fn replace_message_text(&mut self, id: &str, text: &str) -> bool {
        let Some(message) = self.messages.iter_mut().find(|m| m.id == id) else {
            return false;
        };
        if message.parts.is_empty() {
            message.content = Some(text.to_string());
        } else {
            for part in message.parts.iter_mut() {
                if let MessagePart::Text { text: current } = part {
                    *current = text.to_string();
                }
            }
            if message.content.is_some() {
                message.content = Some(text.to_string());
            }
        }
        self.emit(StoreEvent::MessagesChanged);
        true
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        let raised = self.error.is_none();
        self.error = Some(message.clone());
        if raised {
            self.emit(StoreEvent::ErrorRaised(message));
        }
    }

    pub fn clear_error(&mut self) {
        if self.error.take().is_some() {
            self.emit(StoreEvent::ErrorCleared);
        }
    }

    pub fn set_generating(&mut self, generating: bool) {
        if self.generating != generating {
            self.generating = generating;
            self.emit(StoreEvent::GeneratingChanged(generating));
        }
    }

    fn begin_request(&mut self) {
        self.clear_error();
        self.streaming_id = None;
        self.set_generating(true);
    }

    /**
     * \brief 重新生成：去掉末尾的助手回复，返回需要重发的会话。
     *        会话中没有用户消息时返回 None。
     */
    pub fn reload(&mut self) -> Option<Vec<Message>> {
        if !self.messages.iter().any(|m| m.role == Role::User) {
            return None;
        }
        if self
            .messages
            .last()
            .map(|m| m.role == Role::Assistant)
            .unwrap_or(false)
        {
            self.messages.pop();
            self.emit(StoreEvent::MessagesChanged);
        }
        self.begin_request();
        Some(self.messages.clone())
    }

    /**
     * \brief 编辑某条用户消息后重新生成其后的助手回复。
     */
    pub fn edit_message(&mut self, id: &str, text: &str) -> Option<Vec<Message>> {
        if !self.replace_message_text(id, text) {
            return None;
        }
        self.reload()
    }

    /**
     * \brief 最近一条用户消息的 ID，供“编辑最后一条消息”使用。
     */
    pub fn last_user_message_id(&self) -> Option<&str> {
        crate::models::most_recent_user_message(&self.messages).map(|m| m.id.as_str())
    }

    /**
     * \brief 把一个流事件并入会话。增量追加到当前助手消息，
     *        Finish/Error 结束本轮生成。
     */
    pub fn apply_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Start { message_id } => {
                self.open_assistant(message_id);
            }
            StreamEvent::TextDelta(delta) => {
                if self.streaming_id.is_none() {
                    self.open_assistant(format!("assistant-{}", uuid::Uuid::new_v4().simple()));
                }
                let Some(id) = self.streaming_id.clone() else {
                    return;
                };
                if let Some(message) = self.messages.iter_mut().find(|m| m.id == id) {
                    match message.parts.last_mut() {
                        Some(MessagePart::Text { text }) => text.push_str(&delta),
                        _ => message.parts.push(MessagePart::text(delta.clone())),
                    }
                }
                self.emit(StoreEvent::TextAppended {
                    message_id: id,
                    delta,
                });
            }
            StreamEvent::Finish { .. } => {
                self.close_assistant();
                self.set_generating(false);
            }
            StreamEvent::Error(text) => {
                self.close_assistant();
                self.set_generating(false);
                self.set_error(text);
            }
        }
    }

    /**
     * \brief 流在没有结束事件的情况下中断。
     */
    pub fn abort_stream(&mut self) {
        self.close_assistant();
        self.set_generating(false);
    }

    fn open_assistant(&mut self, id: String) {
        self.streaming_id = Some(id.clone());
        self.messages.push(Message {
            id,
            role: Role::Assistant,
            parts: Vec::new(),
            content: None,
        });
        self.emit(StoreEvent::MessagesChanged);
    }

    fn close_assistant(&mut self) {
        let Some(id) = self.streaming_id.take() else {
            return;
        };
        // 没有收到任何文本的助手消息不保留
        let before = self.messages.len();
        self.messages
            .retain(|m| !(m.id == id && m.role == Role::Assistant && m.parts.is_empty()));
        if self.messages.len() != before {
            self.emit(StoreEvent::MessagesChanged);
        }
    }
}
