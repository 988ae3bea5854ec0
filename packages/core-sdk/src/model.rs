use thiserror::Error;

use crate::config::{Credentials, ProviderEndpoints, GROQ_KEY_VAR, OPENAI_KEY_VAR};

pub const GROQ_MODEL: &str = "llama-3.1-8b-instant";
pub const OPENAI_MODEL: &str = "gpt-4o-mini";

/** \brief 503 响应中给出的配置提示。 */
pub const CONFIG_HINT: &str =
    "Add GROQ_API_KEY (free at https://console.groq.com) to .env and restart the dev server";

/**
 * \brief 凭证缺失或为空。在发起任何网络请求之前即失败，不做重试。
 */
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} is empty. Please check your .env file.")]
    EmptyCredential(&'static str),
    #[error("Missing API key. Add GROQ_API_KEY (free at https://console.groq.com) or OPENAI_API_KEY to .env")]
    MissingCredential,
}

/**
 * \brief 已知的两个模型服务。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Groq,
    OpenAi,
}

impl ProviderKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::Groq => "groq",
            ProviderKind::OpenAi => "openai",
        }
    }
}

/**
 * \brief 绑定到某个模型服务与模型 ID 的句柄，构造后无状态，可跨请求复用。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelHandle {
    pub provider: ProviderKind,
    pub model: String,
    pub api_base: String,
    pub api_key: String,
    /** \brief 结构化输出模式；只影响 JSON 响应格式的请求 */
    pub structured_outputs: bool,
}

/**
 * \brief 根据凭证确定本次请求使用的模型。GROQ_API_KEY 优先。
 *        空字符串视同未设置；只含空白的值视为配置错误。
 */
pub fn select_model(
    credentials: &Credentials,
    endpoints: &ProviderEndpoints,
) -> Result<ModelHandle, ConfigError> {
    if let Some(key) = non_empty(credentials.groq_api_key.as_deref()) {
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::EmptyCredential(GROQ_KEY_VAR));
        }
        return Ok(ModelHandle {
            provider: ProviderKind::Groq,
            model: GROQ_MODEL.to_string(),
            api_base: endpoints.groq_base.clone(),
            api_key: key.to_string(),
            structured_outputs: false,
        });
    }

    if let Some(key) = non_empty(credentials.openai_api_key.as_deref()) {
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::EmptyCredential(OPENAI_KEY_VAR));
        }
        return Ok(ModelHandle {
            provider: ProviderKind::OpenAi,
            model: OPENAI_MODEL.to_string(),
            api_base: endpoints.openai_base.clone(),
            api_key: key.to_string(),
            structured_outputs: true,
        });
    }

    Err(ConfigError::MissingCredential)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
