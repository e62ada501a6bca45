//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `KANBOT__*` 覆盖（双下划线表示嵌套，如 `KANBOT__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::process::flows::FlowSettings;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub processes: ProcessesSection,
}

/// [app] 段：应用名、兜底对话历史轮数
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 兜底对话保留的历史轮数
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            max_history_turns: default_max_history_turns(),
        }
    }
}

fn default_max_history_turns() -> usize {
    20
}

/// [llm] 段：兜底对话使用的模型
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：mock / openai
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    pub system_prompt: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            system_prompt: None,
        }
    }
}

fn default_provider() -> String {
    "mock".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

/// [tools] 段：工具调用超时
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    15
}

/// [processes] 段：流程超时、重试、单轮步数上限
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessesSection {
    /// 自最后一次用户输入起，进行中的流程多久后视为放弃（毫秒）
    #[serde(default = "default_process_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_steps_per_turn")]
    pub max_steps_per_turn: usize,
    /// 每次处理消息前顺带清扫过期上下文
    #[serde(default)]
    pub sweep_on_access: bool,
}

impl Default for ProcessesSection {
    fn default() -> Self {
        Self {
            timeout_ms: default_process_timeout_ms(),
            max_retries: default_max_retries(),
            max_steps_per_turn: default_max_steps_per_turn(),
            sweep_on_access: false,
        }
    }
}

impl ProcessesSection {
    pub fn flow_settings(&self) -> FlowSettings {
        FlowSettings {
            timeout_ms: self.timeout_ms,
            max_retries: self.max_retries,
        }
    }
}

fn default_process_timeout_ms() -> u64 {
    600_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_max_steps_per_turn() -> usize {
    64
}

/// 从 config 目录加载配置，环境变量 KANBOT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 KANBOT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("KANBOT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
