//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `KRONOS__*` 覆盖（双下划线表示嵌套，如 `KRONOS__LLM__MODEL=gpt-4o`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::AgentError;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub composio: ComposioSection,
    pub checkpoint: CheckpointSection,
    pub server: ServerSection,
}

/// [app] 段：应用名、日志格式
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// 以 JSON 行输出日志
    pub log_json: bool,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "kronos".to_string(),
            log_json: false,
        }
    }
}

/// [llm] 段：后端、模型、生成参数与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// openai（任何 OpenAI 兼容端点）/ mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 未设置时读取 OPENAI_API_KEY
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key: None,
            temperature: 0.0,
            max_tokens: 2048,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

impl LlmSection {
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    pub request: u64,
    pub stream: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: 60,
            stream: 120,
        }
    }
}

/// [agent] 段：迭代上限、工具超时与并发、重试退避
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_iterations: u32,
    pub subagent_max_iterations: u32,
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    /// 单次委派（整个子智能体执行）超时（秒）
    pub subagent_timeout_secs: u64,
    pub max_concurrent_tools: usize,
    pub retry_backoff_ms: u64,
    /// schema 归一化递归深度上限
    pub schema_max_depth: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            subagent_max_iterations: 5,
            tool_timeout_secs: 30,
            subagent_timeout_secs: 120,
            max_concurrent_tools: 3,
            retry_backoff_ms: 1000,
            schema_max_depth: 8,
        }
    }
}

/// [composio] 段：外部工具目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ComposioSection {
    /// 未设置时读取 COMPOSIO_API_KEY；都没有则不启用外部目录
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ComposioSection {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://backend.composio.dev".to_string(),
            timeout_secs: 60,
        }
    }
}

impl ComposioSection {
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("COMPOSIO_API_KEY").ok().filter(|k| !k.is_empty()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    #[default]
    Memory,
    File,
}

/// [checkpoint] 段：存储后端与目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckpointSection {
    pub backend: CheckpointBackend,
    pub dir: PathBuf,
}

impl Default for CheckpointSection {
    fn default() -> Self {
        Self {
            backend: CheckpointBackend::Memory,
            dir: PathBuf::from("data/checkpoints"),
        }
    }
}

/// [server] 段：HTTP 监听地址
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl AppConfig {
    /// 基本取值检查
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.agent.max_iterations == 0 || self.agent.subagent_max_iterations == 0 {
            return Err(AgentError::ConfigError(
                "agent.max_iterations and agent.subagent_max_iterations must be at least 1".into(),
            ));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(AgentError::ConfigError(format!(
                "llm.temperature must be within 0.0..=2.0, got {}",
                self.llm.temperature
            )));
        }
        if self.llm.max_tokens == 0 {
            return Err(AgentError::ConfigError("llm.max_tokens must be positive".into()));
        }
        Ok(())
    }
}

/// 从 config 目录加载配置，环境变量 KRONOS__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 KRONOS__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found, ignoring");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("KRONOS")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
