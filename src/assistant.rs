//! 助手运行时
//!
//! create_assistant 从配置与工作区组装工具、流程注册表、执行器、上下文存储与 LLM；
//! Assistant::reply 先交给结构化流程，无流程匹配时由 LLM 结合会话历史自由回答。

use std::sync::Arc;

use serde::Serialize;

use crate::config::AppConfig;
use crate::core::{ProcessError, GENERIC_FAILURE};
use crate::llm::{create_llm_from_config, LlmClient};
use crate::memory::{Message, SessionHistories};
use crate::process::flows::build_registry;
use crate::process::intent::RuleIntentClassifier;
use crate::process::{
    ChatOrchestrator, ChatRequest, ContextStore, IntentDetector, MemoryContextStore,
    ProcessExecutor, ProcessResult,
};
use crate::tools::{register_workspace_tools, ToolExecutor, ToolRegistry, Workspace};

const DEFAULT_SYSTEM_PROMPT: &str = "Eres Kanbot, un asistente de gestión de proyectos. \
Responde en español, de forma breve. Si el usuario quiere crear, consultar, actualizar o archivar \
tareas, indícale cómo pedirlo (por ejemplo: «crear tarea X para cliente Y»).";

/// 回复来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    Process,
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssistantReply {
    pub response: String,
    pub source: ReplySource,
    /// 流程回复时附带执行结果
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessResult>,
}

pub struct Assistant {
    orchestrator: ChatOrchestrator,
    llm: Arc<dyn LlmClient>,
    histories: SessionHistories,
    system_prompt: String,
    sweep_on_access: bool,
}

impl Assistant {
    pub fn new(
        orchestrator: ChatOrchestrator,
        llm: Arc<dyn LlmClient>,
        max_history_turns: usize,
    ) -> Self {
        Self {
            orchestrator,
            llm,
            histories: SessionHistories::new(max_history_turns),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            sweep_on_access: false,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_sweep_on_access(mut self, enabled: bool) -> Self {
        self.sweep_on_access = enabled;
        self
    }

    pub fn store(&self) -> &Arc<dyn ContextStore> {
        self.orchestrator.store()
    }

    /// 处理一条用户消息并记录到会话历史
    pub async fn reply(&self, request: &ChatRequest) -> AssistantReply {
        if self.sweep_on_access {
            self.store().cleanup_expired().await;
        }

        let reply = match self.orchestrator.process_message(request).await {
            Some(result) => AssistantReply {
                response: result.response.clone(),
                source: ReplySource::Process,
                process: Some(result),
            },
            None => AssistantReply {
                response: self.fallback(request).await,
                source: ReplySource::Fallback,
                process: None,
            },
        };

        self.histories
            .record(&request.session_id, &request.message, &reply.response)
            .await;
        reply
    }

    /// 清除会话的流程上下文与对话历史
    pub async fn reset_session(&self, session_id: &str) {
        self.store().clear(session_id).await;
        self.histories.forget(session_id).await;
    }

    async fn fallback(&self, request: &ChatRequest) -> String {
        let mut messages = vec![Message::system(self.system_prompt.clone())];
        messages.extend(self.histories.snapshot(&request.session_id).await);
        messages.push(Message::user(request.message.clone()));

        match self.llm.complete(&messages).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                tracing::warn!(session_id = %request.session_id, "LLM returned empty reply");
                GENERIC_FAILURE.to_string()
            }
            Err(e) => {
                tracing::error!(session_id = %request.session_id, error = %e, "LLM fallback failed");
                GENERIC_FAILURE.to_string()
            }
        }
    }
}

/// 按配置组装助手：工作区工具 + 内置流程 + 内存上下文存储 + LLM
pub fn create_assistant(cfg: &AppConfig, workspace: &Workspace) -> Result<Assistant, ProcessError> {
    let llm = create_llm_from_config(&cfg.llm);
    create_assistant_with_llm(cfg, workspace, llm)
}

pub fn create_assistant_with_llm(
    cfg: &AppConfig,
    workspace: &Workspace,
    llm: Arc<dyn LlmClient>,
) -> Result<Assistant, ProcessError> {
    let mut tools = ToolRegistry::new();
    register_workspace_tools(&mut tools, workspace);
    let tools = Arc::new(ToolExecutor::new(tools, cfg.tools.tool_timeout_secs));

    let registry = Arc::new(build_registry(&cfg.processes.flow_settings())?);
    let executor = ProcessExecutor::new(registry.clone(), tools)
        .with_step_budget(cfg.processes.max_steps_per_turn);
    let detector = IntentDetector::new(Arc::new(RuleIntentClassifier));
    let store: Arc<dyn ContextStore> = Arc::new(MemoryContextStore::new());

    let orchestrator = ChatOrchestrator::new(registry, detector, executor, store);
    let mut assistant = Assistant::new(orchestrator, llm, cfg.app.max_history_turns)
        .with_sweep_on_access(cfg.processes.sweep_on_access);
    if let Some(prompt) = &cfg.llm.system_prompt {
        assistant = assistant.with_system_prompt(prompt.clone());
    }
    Ok(assistant)
}
