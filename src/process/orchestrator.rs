//! 对话编排器
//!
//! 单一入口 process_message：会话已有进行中的流程则交给它继续；否则做意图识别并启动新流程；
//! 都不匹配时返回 None，由调用方走兜底对话。
//! 同一会话的「读取上下文 -> 推进 -> 写回」在会话锁内完成。

use std::sync::Arc;

use serde::Deserialize;

use crate::process::context::{Pending, ProcessContext, UserContext};
use crate::process::executor::{ProcessExecutor, ProcessResult, CANCELLED_ACK};
use crate::process::intent::{IntentDetector, IntentMatch};
use crate::process::registry::ProcessRegistry;
use crate::process::session::ContextStore;

/// 一次用户输入
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    pub user_id: String,
    pub session_id: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub user_name: Option<String>,
}

impl ChatRequest {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    pub fn admin(mut self, is_admin: bool) -> Self {
        self.is_admin = is_admin;
        self
    }

    pub fn user_context(&self) -> UserContext {
        UserContext {
            user_id: self.user_id.clone(),
            is_admin: self.is_admin,
            user_name: self.user_name.clone(),
            extra: Default::default(),
        }
    }
}

pub struct ChatOrchestrator {
    registry: Arc<ProcessRegistry>,
    detector: IntentDetector,
    executor: ProcessExecutor,
    store: Arc<dyn ContextStore>,
}

impl ChatOrchestrator {
    pub fn new(
        registry: Arc<ProcessRegistry>,
        detector: IntentDetector,
        executor: ProcessExecutor,
        store: Arc<dyn ContextStore>,
    ) -> Self {
        Self {
            registry,
            detector,
            executor,
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn ContextStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    /// 处理一条消息；None 表示没有结构化流程匹配
    pub async fn process_message(&self, request: &ChatRequest) -> Option<ProcessResult> {
        let session_id = request.session_id.as_str();
        let _guard = self.store.lock(session_id).await;

        let user = request.user_context();

        if let Some(mut ctx) = self.store.get(session_id).await {
            match self.superseding_match(&ctx, &request.message, &user) {
                None => {
                    let result = self.executor.resume(&mut ctx, &request.message).await;
                    self.persist(session_id, ctx, &result).await;
                    return Some(result);
                }
                Some(next) => {
                    tracing::info!(
                        session_id,
                        from = %ctx.process_id,
                        to = %next.process_id,
                        "Process superseded by new request"
                    );
                    self.store.clear(session_id).await;
                    let mut result = self.start(session_id, &next, user, &request.message).await?;
                    result.response = format!("{CANCELLED_ACK}\n\n{}", result.response);
                    return Some(result);
                }
            }
        }

        let matched = self.detector.detect(&request.message, &user, &self.registry)?;
        self.start(session_id, &matched, user, &request.message).await
    }

    async fn start(
        &self,
        session_id: &str,
        matched: &IntentMatch,
        user: UserContext,
        message: &str,
    ) -> Option<ProcessResult> {
        let definition = self.registry.get(&matched.process_id)?;
        let mut ctx = ProcessContext::new(&definition, session_id, user, message);
        let result = self.executor.start(&mut ctx).await;
        self.persist(session_id, ctx, &result).await;
        Some(result)
    }

    /// 终态清除，否则写回
    async fn persist(&self, session_id: &str, ctx: ProcessContext, result: &ProcessResult) {
        if result.completed {
            self.store.clear(session_id).await;
        } else {
            self.store.set(session_id, ctx).await;
        }
    }

    /// 正在等待槽位回答、流程允许取消、且消息明确命中另一个流程的正则触发器时，由新流程接管
    fn superseding_match(
        &self,
        ctx: &ProcessContext,
        message: &str,
        user: &UserContext,
    ) -> Option<IntentMatch> {
        if !matches!(ctx.pending, Some(Pending::Slot(_))) {
            return None;
        }
        let current = self.registry.get(&ctx.process_id)?;
        if !current.config.allow_cancel {
            return None;
        }
        self.detector
            .detect(message, user, &self.registry)
            .filter(|m| m.process_id != ctx.process_id && m.trigger == "pattern")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::executor::TurnOutcome;
    use crate::process::session::MemoryContextStore;
    use crate::process::{ProcessBuilder, SlotDefinition, StepDefinition, Text};
    use crate::tools::{ToolExecutor, ToolRegistry};

    fn orchestrator() -> ChatOrchestrator {
        let mut registry = ProcessRegistry::new();
        registry
            .register(
                ProcessBuilder::new("greet", "Greet")
                    .pattern_trigger(&[r"\bsaluda\b"], 5)
                    .slot(SlotDefinition::string("name").required().prompt("¿A quién?"))
                    .step(StepDefinition::collect("ask", &["name"]).then("done"))
                    .step(StepDefinition::respond(
                        "done",
                        Text::dynamic(|ctx| format!("Hola, {}", ctx.slot_text("name"))),
                    ))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
            .register(
                ProcessBuilder::new("ping", "Ping")
                    .pattern_trigger(&[r"^ping$"], 5)
                    .step(StepDefinition::respond("pong", Text::from("pong")))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let registry = Arc::new(registry);
        let executor = ProcessExecutor::new(
            registry.clone(),
            Arc::new(ToolExecutor::new(ToolRegistry::new(), 5)),
        );
        ChatOrchestrator::new(
            registry,
            IntentDetector::default(),
            executor,
            Arc::new(MemoryContextStore::new()),
        )
    }

    #[tokio::test]
    async fn test_no_match_returns_none() {
        let orch = orchestrator();
        let r = orch
            .process_message(&ChatRequest::new("s1", "u1", "¿qué hora es?"))
            .await;
        assert!(r.is_none());
        assert_eq!(orch.store().active_count().await, 0);
    }

    #[tokio::test]
    async fn test_in_flight_process_owns_next_turn() {
        let orch = orchestrator();
        let r = orch
            .process_message(&ChatRequest::new("s1", "u1", "saluda"))
            .await
            .unwrap();
        assert_eq!(r.status, TurnOutcome::AwaitingInput);
        assert!(orch.store().get("s1").await.is_some());

        // 进行中的流程直接接收回答，不再做意图识别
        let r = orch
            .process_message(&ChatRequest::new("s1", "u1", "Marta"))
            .await
            .unwrap();
        assert_eq!(r.response, "Hola, Marta");
        assert!(r.completed);
        assert!(orch.store().get("s1").await.is_none());
    }

    #[tokio::test]
    async fn test_pattern_of_other_process_supersedes() {
        let orch = orchestrator();
        orch.process_message(&ChatRequest::new("s1", "u1", "saluda"))
            .await
            .unwrap();
        let r = orch
            .process_message(&ChatRequest::new("s1", "u1", "ping"))
            .await
            .unwrap();
        assert_eq!(r.process_id, "ping");
        assert!(r.response.starts_with(CANCELLED_ACK));
        assert!(r.response.ends_with("pong"));
        assert_eq!(orch.store().active_count().await, 0);
    }

    #[test]
    fn test_chat_request_deserializes_camel_case() {
        let req: ChatRequest = serde_json::from_str(
            r#"{"message":"hola","userId":"u1","sessionId":"s1","isAdmin":true}"#,
        )
        .unwrap();
        assert!(req.is_admin);
        assert_eq!(req.user_context().user_id, "u1");
        assert!(req.user_name.is_none());
    }
}
