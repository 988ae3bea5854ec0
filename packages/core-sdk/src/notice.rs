/**
 * \brief 面向用户的提示类别。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Unavailable,
    InvalidKey,
    RateLimited,
    Generic,
}

/**
 * \brief 错误提示（toast）的标题与描述。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub title: String,
    pub description: String,
}

const UNAVAILABLE_MARKERS: &[&str] = &["Incorrect API", "Missing API key", "503", "API key"];
const INVALID_KEY_MARKERS: &[&str] = &["401", "Unauthorized"];
const RATE_LIMIT_MARKERS: &[&str] = &["429", "rate limit"];

const FALLBACK_DESCRIPTION: &str =
    "An unexpected error occurred. Check the console for details.";

/**
 * \brief 按子串匹配错误文本，先匹配者优先。配置类问题排在鉴权与限流之前。
 */
pub fn classify(message: &str) -> Notice {
    let contains_any = |markers: &[&str]| markers.iter().any(|m| message.contains(m));

    if contains_any(UNAVAILABLE_MARKERS) {
        return Notice {
            kind: NoticeKind::Unavailable,
            title: "Text generation unavailable".to_string(),
            description: "Add GROQ_API_KEY to .env (free key at console.groq.com) or OPENAI_API_KEY, then restart the dev server.".to_string(),
        };
    }
    if contains_any(INVALID_KEY_MARKERS) {
        return Notice {
            kind: NoticeKind::InvalidKey,
            title: "Invalid API key".to_string(),
            description: "Please check your GROQ_API_KEY in .env and restart the dev server."
                .to_string(),
        };
    }
    if contains_any(RATE_LIMIT_MARKERS) {
        return Notice {
            kind: NoticeKind::RateLimited,
            title: "Rate limit exceeded".to_string(),
            description: "Please wait a moment and try again.".to_string(),
        };
    }
    Notice {
        kind: NoticeKind::Generic,
        title: "Something went wrong".to_string(),
        description: if message.is_empty() {
            FALLBACK_DESCRIPTION.to_string()
        } else {
            message.to_string()
        },
    }
}
