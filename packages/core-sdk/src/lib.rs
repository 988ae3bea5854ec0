pub mod chat;
pub mod client;
pub mod config;
pub mod llm;
pub mod model;
pub mod models;
pub mod notice;
pub mod prompts;
pub mod protocol;
pub mod render;
pub mod server;
pub mod store;
pub mod telemetry;

/**
 * \brief SDK 预导入集合，方便外部引用常用模块。
 */
pub mod prelude {
    pub use crate::chat;
    pub use crate::client::{ChatClient, ChatSession};
    pub use crate::config::AppConfig;
    pub use crate::model::{select_model, ModelHandle};
    pub use crate::models::{Message, MessagePart, Role, StreamEvent};
    pub use crate::notice::{classify, Notice, NoticeKind};
    pub use crate::render::{render, Bubble, RenderedTranscript};
    pub use crate::server;
    pub use crate::store::{ChatStore, StoreEvent};
    pub use crate::telemetry;
}
