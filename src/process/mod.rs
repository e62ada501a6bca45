//! 结构化对话流程引擎
//!
//! - **types / builder / graph**: 声明式流程定义、构建与注册时校验
//! - **registry**: 显式构造的流程注册表
//! - **intent**: 触发器匹配（正则 / 关键词 / 意图标签）
//! - **context / extract**: 每会话运行上下文、槽位抽取与是/否识别
//! - **executor**: 逐步推进的状态机
//! - **session**: 会话上下文存储（惰性过期 + 会话锁）
//! - **orchestrator**: process_message 单一入口
//! - **flows**: 任务创建 / 查询 / 更新 / 归档四个流程

pub mod builder;
pub mod context;
pub mod executor;
pub mod extract;
pub mod flows;
pub mod graph;
pub mod intent;
pub mod orchestrator;
pub mod registry;
pub mod session;
pub mod types;

pub use builder::ProcessBuilder;
pub use context::{Pending, ProcessContext, StepPointer, UserContext};
pub use executor::{ProcessExecutor, ProcessResult, TurnOutcome, CANCELLED_ACK};
pub use extract::SlotExtractor;
pub use intent::{IntentClassifier, IntentDetector, IntentMatch, NoopClassifier, RuleIntentClassifier};
pub use orchestrator::{ChatOrchestrator, ChatRequest};
pub use registry::ProcessRegistry;
pub use session::{ContextStore, MemoryContextStore, SessionGuard};
pub use types::{
    Branch, ExtractFrom, ProcessConfig, ProcessDefinition, SlotDefinition, SlotMap, SlotType,
    StepDefinition, StepKind, Text, ToolArgs, Trigger, TriggerKind,
};
