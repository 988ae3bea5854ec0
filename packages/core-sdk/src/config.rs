use std::time::Duration;

/** \brief 主模型服务凭证的环境变量名。 */
pub const GROQ_KEY_VAR: &str = "GROQ_API_KEY";
/** \brief 备用模型服务凭证的环境变量名。 */
pub const OPENAI_KEY_VAR: &str = "OPENAI_API_KEY";

pub const DEFAULT_GROQ_BASE: &str = "https://api.groq.com/openai";
pub const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com";

/** \brief 单次聊天请求的最长持续时间。 */
pub const MAX_DURATION: Duration = Duration::from_secs(50);

/**
 * \brief 运行模式，来自 NODE_ENV；未设置时按生产环境处理。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Development,
    Test,
    Production,
}

impl RunMode {
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("development") => RunMode::Development,
            Some("test") => RunMode::Test,
            _ => RunMode::Production,
        }
    }

    /**
     * \brief 只有开发模式向调用方暴露原始错误详情，test 与生产一样返回通用文本。
     */
    pub fn verbose_errors(&self) -> bool {
        *self == RunMode::Development
    }
}

/**
 * \brief 两个模型服务的凭证。Some("") 与 None 等价，选择模型时跳过。
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub groq_api_key: Option<String>,
    pub openai_api_key: Option<String>,
}

/**
 * \brief 模型服务 API 基地址，测试中可指向本地模拟服务。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub groq_base: String,
    pub openai_base: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            groq_base: DEFAULT_GROQ_BASE.to_string(),
            openai_base: DEFAULT_OPENAI_BASE.to_string(),
        }
    }
}

/**
 * \brief 进程级配置，启动时读取一次，之后只读。
 */
#[derive(Debug, Clone)]
pub struct AppConfig {
    /** \brief 监听地址 */
    pub addr: String,
    /** \brief 站点静态文件目录 */
    pub site_dir: String,
    pub credentials: Credentials,
    pub endpoints: ProviderEndpoints,
    pub run_mode: RunMode,
    /** \brief 是否写入遥测日志 */
    pub telemetry_enabled: bool,
    pub max_duration: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:3000".to_string(),
            site_dir: "site".to_string(),
            credentials: Credentials::default(),
            endpoints: ProviderEndpoints::default(),
            run_mode: RunMode::Production,
            telemetry_enabled: false,
            max_duration: MAX_DURATION,
        }
    }
}

impl AppConfig {
    /**
     * \brief 从进程环境读取配置；若存在 .env 则先加载。
     */
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /**
     * \brief 以任意键值查找函数构造配置，便于测试。
     */
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = AppConfig::default();
        let run_mode = RunMode::parse(lookup("NODE_ENV").as_deref());
        let telemetry_enabled = match lookup("PITCHDESK_TELEMETRY") {
            Some(v) => matches!(v.trim(), "1" | "true" | "on" | "yes"),
            None => run_mode == RunMode::Development,
        };
        Self {
            addr: lookup("PITCHDESK_ADDR").unwrap_or(defaults.addr),
            site_dir: lookup("PITCHDESK_SITE_DIR").unwrap_or(defaults.site_dir),
            credentials: Credentials {
                groq_api_key: lookup(GROQ_KEY_VAR),
                openai_api_key: lookup(OPENAI_KEY_VAR),
            },
            endpoints: ProviderEndpoints {
                groq_base: lookup("GROQ_BASE_URL").unwrap_or(defaults.endpoints.groq_base),
                openai_base: lookup("OPENAI_BASE_URL").unwrap_or(defaults.endpoints.openai_base),
            },
            run_mode,
            telemetry_enabled,
            max_duration: defaults.max_duration,
        }
    }
}
