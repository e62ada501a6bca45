//! Kanbot - 项目/任务管理助手
//!
//! 模块划分：
//! - **assistant**: 助手运行时（结构化流程优先，LLM 兜底）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与恢复策略
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 按会话的对话历史
//! - **observability**: 日志初始化
//! - **process**: 结构化对话流程引擎与内置任务流程
//! - **tools**: 工具 trait、执行器与内存工作区

pub mod assistant;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod process;
pub mod tools;

pub use assistant::{create_assistant, Assistant, AssistantReply, ReplySource};
pub use process::{ChatOrchestrator, ChatRequest, ProcessResult};
