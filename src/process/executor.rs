//! 流程执行器（状态机核心）
//!
//! 一次调用处理一轮用户输入：先消化上一轮留下的等待（槽位回答 / 确认 / 是否重试），
//! 再沿步骤图连续推进非阻塞步骤，直到遇到需要用户输入的步骤或进入终态。
//! 所有内部错误都在这里被拦截：流程转为 Cancelled，用户只看到模板化的回复。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{ProcessError, RecoveryAction, RecoveryEngine, GENERIC_FAILURE};
use crate::process::context::{Pending, ProcessContext, StepPointer};
use crate::process::extract;
use crate::process::registry::ProcessRegistry;
use crate::process::types::*;
use crate::tools::ToolExecutor;

/// 用户取消后的确认回复
pub const CANCELLED_ACK: &str = "De acuerdo, he cancelado la operación.";

/// 无效回答次数耗尽
pub const TOO_MANY_ATTEMPTS: &str =
    "Demasiados intentos no válidos. He cancelado la operación; puedes empezar de nuevo cuando quieras.";

/// 确认步骤收到无法识别的回答时的提示
pub const CONFIRM_HINT: &str = "Responde «sí» o «no».";

const DEFAULT_MAX_STEPS_PER_TURN: usize = 64;

/// 单轮结束时流程所处的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    /// 阻塞在 collect / confirm / 重试询问，等待下一轮输入
    AwaitingInput,
    Completed,
    Cancelled,
}

/// 执行器返回给编排器的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResult {
    pub response: String,
    /// 流程已进入终态（完成或取消）
    pub completed: bool,
    pub status: TurnOutcome,
    pub process_id: String,
}

/// 回答处理后的去向
enum Flow {
    /// 继续推进步骤图
    Continue,
    /// 本轮到此为止（已阻塞或已终止）
    Stop,
}

pub struct ProcessExecutor {
    registry: Arc<ProcessRegistry>,
    tools: Arc<ToolExecutor>,
    recovery: RecoveryEngine,
    max_steps_per_turn: usize,
}

impl ProcessExecutor {
    pub fn new(registry: Arc<ProcessRegistry>, tools: Arc<ToolExecutor>) -> Self {
        Self {
            registry,
            tools,
            recovery: RecoveryEngine::new(),
            max_steps_per_turn: DEFAULT_MAX_STEPS_PER_TURN,
        }
    }

    /// 单轮最多推进的步数
    pub fn with_step_budget(mut self, max_steps_per_turn: usize) -> Self {
        self.max_steps_per_turn = max_steps_per_turn.max(1);
        self
    }

    /// 新建上下文的第一轮（消息即 original_message）
    pub async fn start(&self, ctx: &mut ProcessContext) -> ProcessResult {
        tracing::info!(
            session_id = %ctx.session_id,
            process_id = %ctx.process_id,
            run_id = %ctx.run_id,
            "Process started"
        );
        self.drive(ctx, None).await
    }

    /// 已有上下文收到新一轮用户输入
    pub async fn resume(&self, ctx: &mut ProcessContext, message: &str) -> ProcessResult {
        ctx.touch(message);
        self.drive(ctx, Some(message)).await
    }

    async fn drive(&self, ctx: &mut ProcessContext, answer: Option<&str>) -> ProcessResult {
        let mut out = Vec::new();

        let Some(definition) = self.registry.get(&ctx.process_id) else {
            tracing::warn!(process_id = %ctx.process_id, "Process definition not registered");
            cancel(ctx);
            out.push(GENERIC_FAILURE.to_string());
            return finish(ctx, out);
        };

        if ctx.history.is_empty() && definition.config.track_in_history {
            if let Some(step) = ctx.step_id().map(str::to_string) {
                ctx.history.push(step);
            }
        }

        let result = match answer {
            Some(message) => match self.handle_answer(&definition, ctx, message, &mut out) {
                Ok(Flow::Continue) => self.run(&definition, ctx, &mut out).await,
                Ok(Flow::Stop) => Ok(()),
                Err(e) => Err(e),
            },
            None => self.run(&definition, ctx, &mut out).await,
        };

        if let Err(err) = result {
            tracing::warn!(
                session_id = %ctx.session_id,
                process_id = %ctx.process_id,
                step = ctx.step_id().unwrap_or("-"),
                error = %err,
                "Process execution error"
            );
            cancel(ctx);
            out.push(GENERIC_FAILURE.to_string());
        }

        finish(ctx, out)
    }

    /// 消化上一轮留下的等待状态
    fn handle_answer(
        &self,
        definition: &ProcessDefinition,
        ctx: &mut ProcessContext,
        message: &str,
        out: &mut Vec<String>,
    ) -> Result<Flow, ProcessError> {
        let config = &definition.config;
        match ctx.pending.clone() {
            None => Ok(Flow::Continue),
            Some(Pending::Slot(name)) => {
                // 只认整句取消，「Cancelar suscripción...」仍是槽位内容
                if config.allow_cancel && extract::is_cancel(message) {
                    cancel(ctx);
                    out.push(CANCELLED_ACK.to_string());
                    return Ok(Flow::Stop);
                }
                let slot = definition
                    .slot(&name)
                    .ok_or_else(|| ProcessError::invalid(&definition.id, format!("unknown slot '{name}'")))?;

                let raw = match &slot.extract_from {
                    ExtractFrom::Message(Some(extractor)) => extractor(message),
                    _ => None,
                }
                .unwrap_or_else(|| Value::String(message.trim().to_string()));

                match extract::accept(slot, raw) {
                    Ok(value) => {
                        tracing::debug!(session_id = %ctx.session_id, slot = %name, "Slot filled from answer");
                        ctx.set_slot(&name, value);
                        ctx.pending = None;
                        ctx.retries = 0;
                        Ok(Flow::Continue)
                    }
                    Err(problem) => {
                        ctx.retries += 1;
                        if ctx.retries >= config.max_retries {
                            cancel(ctx);
                            out.push(TOO_MANY_ATTEMPTS.to_string());
                        } else {
                            out.push(format!("{problem} {}", slot_prompt(slot)));
                        }
                        Ok(Flow::Stop)
                    }
                }
            }
            Some(Pending::Confirmation) => {
                let step = current_step(definition, ctx)?;
                if extract::is_affirmative(message) {
                    ctx.pending = None;
                    ctx.retries = 0;
                    run_exit_hook(step, ctx);
                    advance(definition, ctx, step.next_step.as_deref());
                    return Ok(Flow::Continue);
                }
                if config.allow_cancel && extract::is_negative(message) {
                    cancel(ctx);
                    out.push(CANCELLED_ACK.to_string());
                    return Ok(Flow::Stop);
                }
                ctx.retries += 1;
                if ctx.retries >= config.max_retries {
                    cancel(ctx);
                    out.push(TOO_MANY_ATTEMPTS.to_string());
                } else if let StepKind::Confirm { message: text } = &step.kind {
                    out.push(CONFIRM_HINT.to_string());
                    out.push(text.render(ctx));
                }
                Ok(Flow::Stop)
            }
            Some(Pending::Retry) => {
                if config.allow_cancel && extract::is_negative(message) {
                    cancel(ctx);
                    out.push(CANCELLED_ACK.to_string());
                    return Ok(Flow::Stop);
                }
                ctx.pending = None;
                Ok(Flow::Continue)
            }
        }
    }

    /// 沿步骤图推进，直到阻塞或终态
    async fn run(
        &self,
        definition: &ProcessDefinition,
        ctx: &mut ProcessContext,
        out: &mut Vec<String>,
    ) -> Result<(), ProcessError> {
        let mut steps_taken = 0usize;

        while let StepPointer::Step(step_id) = ctx.current_step.clone() {
            if steps_taken >= self.max_steps_per_turn {
                return Err(ProcessError::StepBudgetExceeded(self.max_steps_per_turn));
            }
            steps_taken += 1;

            let step = definition
                .step(&step_id)
                .ok_or_else(|| ProcessError::UnknownStep {
                    process: definition.id.clone(),
                    step: step_id.clone(),
                })?;

            if let Some(extractor) = &step.on_enter {
                let found = extractor.extract(&ctx.latest_message, ctx);
                let written = ctx.merge_missing(found);
                if written > 0 {
                    tracing::debug!(step = %step_id, written, "Slots pre-filled on enter");
                }
            }

            match &step.kind {
                StepKind::Collect { slots } => {
                    for name in slots {
                        if ctx.has_slot(name) {
                            continue;
                        }
                        let Some(slot) = definition.slot(name) else {
                            return Err(ProcessError::invalid(
                                &definition.id,
                                format!("unknown slot '{name}'"),
                            ));
                        };
                        if let Some(raw) = extract_slot(slot, ctx) {
                            match extract::accept(slot, raw) {
                                Ok(value) => ctx.set_slot(name, value),
                                Err(problem) => {
                                    tracing::debug!(slot = %name, %problem, "Extracted value rejected")
                                }
                            }
                        }
                        if ctx.has_slot(name) {
                            continue;
                        }
                        if slot.required {
                            ctx.pending = Some(Pending::Slot(name.clone()));
                            out.push(slot_prompt(slot));
                            return Ok(());
                        }
                        if let Some(default) = &slot.default_value {
                            ctx.set_slot(name, default.clone());
                        }
                    }
                    run_exit_hook(step, ctx);
                    advance(definition, ctx, step.next_step.as_deref());
                }
                StepKind::Execute { tool, args, mutates } => {
                    let args = args.resolve(ctx);
                    tracing::debug!(step = %step_id, tool = %tool, mutates, "Executing tool");
                    match self.tools.execute(tool, args).await {
                        Ok(output) => {
                            ctx.tool_results.insert(tool.clone(), output);
                            ctx.retries = 0;
                            run_exit_hook(step, ctx);
                            advance(definition, ctx, step.next_step.as_deref());
                        }
                        Err(err) => {
                            ctx.retries += 1;
                            tracing::warn!(
                                session_id = %ctx.session_id,
                                process_id = %ctx.process_id,
                                step = %step_id,
                                attempt = ctx.retries,
                                error = %err,
                                "Tool step failed"
                            );
                            match self
                                .recovery
                                .handle(&err, ctx.retries, definition.config.max_retries)
                            {
                                RecoveryAction::RetryStep(prompt) => {
                                    ctx.pending = Some(Pending::Retry);
                                    out.push(prompt);
                                }
                                RecoveryAction::Cancel(message) => {
                                    cancel(ctx);
                                    out.push(message);
                                }
                            }
                            return Ok(());
                        }
                    }
                }
                StepKind::Branch { branches } => {
                    let mut target = None;
                    for branch in branches {
                        if (branch.condition)(&mut *ctx) {
                            target = Some(branch.next_step.clone());
                            break;
                        }
                    }
                    let target = target.ok_or_else(|| ProcessError::NoBranchMatched(step_id.clone()))?;
                    run_exit_hook(step, ctx);
                    advance(definition, ctx, Some(&target));
                }
                StepKind::Confirm { message } => {
                    out.push(message.render(ctx));
                    ctx.pending = Some(Pending::Confirmation);
                    return Ok(());
                }
                StepKind::Respond { response } => {
                    out.push(response.render(ctx));
                    run_exit_hook(step, ctx);
                    advance(definition, ctx, step.next_step.as_deref());
                }
            }
        }
        Ok(())
    }
}

fn current_step<'a>(
    definition: &'a ProcessDefinition,
    ctx: &ProcessContext,
) -> Result<&'a StepDefinition, ProcessError> {
    let id = ctx.step_id().unwrap_or_default();
    definition.step(id).ok_or_else(|| ProcessError::UnknownStep {
        process: definition.id.clone(),
        step: id.to_string(),
    })
}

fn run_exit_hook(step: &StepDefinition, ctx: &mut ProcessContext) {
    if let Some(hook) = &step.on_exit {
        hook(ctx);
    }
}

/// 移动状态机指针；None 表示自然完成
fn advance(definition: &ProcessDefinition, ctx: &mut ProcessContext, next: Option<&str>) {
    match next {
        Some(id) => {
            tracing::debug!(
                session_id = %ctx.session_id,
                process_id = %ctx.process_id,
                from = ctx.step_id().unwrap_or("-"),
                step = id,
                "Step advanced"
            );
            ctx.current_step = StepPointer::Step(id.to_string());
            if definition.config.track_in_history {
                ctx.history.push(id.to_string());
            }
        }
        None => {
            ctx.current_step = StepPointer::Completed;
            ctx.pending = None;
        }
    }
}

fn cancel(ctx: &mut ProcessContext) {
    ctx.current_step = StepPointer::Cancelled;
    ctx.pending = None;
}

fn slot_prompt(slot: &SlotDefinition) -> String {
    slot.prompt_if_missing
        .clone()
        .unwrap_or_else(|| format!("Necesito el valor de «{}».", slot.name))
}

/// 按 extract_from 规则尝试填充槽位（不做类型转换）
fn extract_slot(slot: &SlotDefinition, ctx: &ProcessContext) -> Option<Value> {
    let value = match &slot.extract_from {
        ExtractFrom::Message(Some(extractor)) => extractor(&ctx.latest_message).or_else(|| {
            if ctx.latest_message != ctx.original_message {
                extractor(&ctx.original_message)
            } else {
                None
            }
        }),
        ExtractFrom::Message(None) | ExtractFrom::PreviousStep => None,
        ExtractFrom::ToolResult { tool, pointer } => ctx.tool_output(tool).and_then(|output| {
            output
                .raw
                .pointer(pointer)
                .or_else(|| output.first().and_then(|item| item.pointer(pointer)))
                .cloned()
        }),
    };
    value.filter(|v| !v.is_null())
}

fn finish(ctx: &ProcessContext, out: Vec<String>) -> ProcessResult {
    let status = match ctx.current_step {
        StepPointer::Step(_) => TurnOutcome::AwaitingInput,
        StepPointer::Completed => TurnOutcome::Completed,
        StepPointer::Cancelled => TurnOutcome::Cancelled,
    };
    match status {
        TurnOutcome::Completed => tracing::info!(
            session_id = %ctx.session_id,
            process_id = %ctx.process_id,
            turns = ctx.turns,
            "Process completed"
        ),
        TurnOutcome::Cancelled => tracing::info!(
            session_id = %ctx.session_id,
            process_id = %ctx.process_id,
            turns = ctx.turns,
            "Process cancelled"
        ),
        TurnOutcome::AwaitingInput => {}
    }
    ProcessResult {
        response: out.join("\n\n"),
        completed: status != TurnOutcome::AwaitingInput,
        status,
        process_id: ctx.process_id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RETRY_PROMPT;
    use crate::process::context::UserContext;
    use crate::process::ProcessBuilder;
    use crate::tools::{Tool, ToolRegistry};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 前 fail_times 次调用失败，之后返回 reply
    struct FlakyTool {
        name: &'static str,
        fail_times: usize,
        calls: Arc<AtomicUsize>,
        reply: Value,
    }

    #[async_trait]
    impl Tool for FlakyTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "test tool"
        }

        async fn execute(&self, _args: Value) -> Result<Value, String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err("backend unavailable at 10.1.2.3".to_string())
            } else {
                Ok(self.reply.clone())
            }
        }
    }

    fn save_process() -> ProcessDefinition {
        save_process_with(true)
    }

    fn save_process_with(allow_cancel: bool) -> ProcessDefinition {
        ProcessBuilder::new("save-note", "Save note")
            .keyword_trigger(&["nota"], 1)
            .slot(
                SlotDefinition::string("title")
                    .required()
                    .min_length(3)
                    .prompt("¿Título de la nota?"),
            )
            .slot(SlotDefinition::string("color").default_value(json!("amarillo")))
            .step(StepDefinition::collect("ask", &["title", "color"]).then("confirm"))
            .step(
                StepDefinition::confirm(
                    "confirm",
                    Text::dynamic(|ctx| format!("¿Guardo «{}»?", ctx.slot_text("title"))),
                )
                .then("save"),
            )
            .step(
                StepDefinition::execute("save", "save_note", ToolArgs::dynamic(|ctx| json!({"title": ctx.slot_text("title")})))
                    .mutating()
                    .on_exit(|ctx| {
                        let id = ctx.tool_output("save_note").and_then(|o| o.first_id());
                        if let Some(id) = id {
                            ctx.set_slot("note_id", id);
                        }
                    })
                    .then("done"),
            )
            .step(StepDefinition::respond(
                "done",
                Text::dynamic(|ctx| format!("Guardada {}", ctx.slot_text("note_id"))),
            ))
            .requires_confirmation(true)
            .allow_cancel(allow_cancel)
            .build()
            .unwrap()
    }

    fn executor_with(defs: Vec<ProcessDefinition>, fail_times: usize) -> (ProcessExecutor, Arc<AtomicUsize>) {
        let mut registry = ProcessRegistry::new();
        for def in defs {
            registry.register(def).unwrap();
        }
        let calls = Arc::new(AtomicUsize::new(0));
        let mut tools = ToolRegistry::new();
        tools.register(FlakyTool {
            name: "save_note",
            fail_times,
            calls: calls.clone(),
            reply: json!({"id": "n-1", "title": "x"}),
        });
        let executor = ProcessExecutor::new(Arc::new(registry), Arc::new(ToolExecutor::new(tools, 5)));
        (executor, calls)
    }

    fn new_context(executor: &ProcessExecutor, process: &str, message: &str) -> ProcessContext {
        let def = executor.registry.get(process).unwrap();
        ProcessContext::new(&def, "s1", UserContext::new("u1"), message)
    }

    #[tokio::test]
    async fn test_collect_confirm_execute_respond() {
        let (executor, calls) = executor_with(vec![save_process()], 0);
        let mut ctx = new_context(&executor, "save-note", "nueva nota");

        let r = executor.start(&mut ctx).await;
        assert_eq!(r.status, TurnOutcome::AwaitingInput);
        assert_eq!(r.response, "¿Título de la nota?");
        assert_eq!(ctx.pending, Some(Pending::Slot("title".to_string())));

        let r = executor.resume(&mut ctx, "Compras").await;
        assert_eq!(r.response, "¿Guardo «Compras»?");
        assert_eq!(ctx.slot_str("color"), Some("amarillo"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let r = executor.resume(&mut ctx, "sí").await;
        assert!(r.completed);
        assert_eq!(r.status, TurnOutcome::Completed);
        assert_eq!(r.response, "Guardada n-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.history, vec!["ask", "confirm", "save", "done"]);
    }

    #[tokio::test]
    async fn test_negative_confirmation_cancels() {
        let (executor, calls) = executor_with(vec![save_process()], 0);
        let mut ctx = new_context(&executor, "save-note", "nota");
        executor.start(&mut ctx).await;
        executor.resume(&mut ctx, "Compras").await;

        let r = executor.resume(&mut ctx, "no").await;
        assert_eq!(r.status, TurnOutcome::Cancelled);
        assert_eq!(r.response, CANCELLED_ACK);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_while_collecting() {
        let (executor, _) = executor_with(vec![save_process()], 0);
        let mut ctx = new_context(&executor, "save-note", "nota");
        executor.start(&mut ctx).await;

        let r = executor.resume(&mut ctx, "Cancelar").await;
        assert_eq!(r.status, TurnOutcome::Cancelled);
        assert!(ctx.is_terminal());
    }

    #[tokio::test]
    async fn test_answer_starting_with_cancel_word_fills_slot() {
        let (executor, _) = executor_with(vec![save_process()], 0);
        let mut ctx = new_context(&executor, "save-note", "nota");
        executor.start(&mut ctx).await;

        let r = executor.resume(&mut ctx, "Cancelar suscripción de Adobe").await;
        assert_eq!(r.status, TurnOutcome::AwaitingInput);
        assert_eq!(ctx.slot_str("title"), Some("Cancelar suscripción de Adobe"));
        assert_eq!(r.response, "¿Guardo «Cancelar suscripción de Adobe»?");
    }

    #[tokio::test]
    async fn test_conditional_reply_does_not_confirm() {
        let (executor, calls) = executor_with(vec![save_process()], 0);
        let mut ctx = new_context(&executor, "save-note", "nota");
        executor.start(&mut ctx).await;
        executor.resume(&mut ctx, "Compras").await;

        let r = executor.resume(&mut ctx, "y si mejor lo dejamos para mañana?").await;
        assert_eq!(r.status, TurnOutcome::AwaitingInput);
        assert!(r.response.starts_with(CONFIRM_HINT));
        assert_eq!(ctx.step_id(), Some("confirm"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unclear_confirmation_reprompts_then_gives_up() {
        let (executor, _) = executor_with(vec![save_process()], 0);
        let mut ctx = new_context(&executor, "save-note", "nota");
        executor.start(&mut ctx).await;
        executor.resume(&mut ctx, "Compras").await;

        let r = executor.resume(&mut ctx, "quizás").await;
        assert_eq!(r.status, TurnOutcome::AwaitingInput);
        assert!(r.response.starts_with(CONFIRM_HINT));
        assert!(r.response.contains("¿Guardo «Compras»?"));

        let r = executor.resume(&mut ctx, "mmm").await;
        assert_eq!(r.status, TurnOutcome::Cancelled);
        assert_eq!(r.response, TOO_MANY_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_validation_failure_gives_corrective_prompt() {
        let (executor, _) = executor_with(vec![save_process()], 0);
        let mut ctx = new_context(&executor, "save-note", "nota");
        executor.start(&mut ctx).await;

        let r = executor.resume(&mut ctx, "ab").await;
        assert_eq!(r.status, TurnOutcome::AwaitingInput);
        assert_eq!(
            r.response,
            "El valor debe tener al menos 3 caracteres. ¿Título de la nota?"
        );
        assert!(!ctx.has_slot("title"));

        let r = executor.resume(&mut ctx, "Compras").await;
        assert_eq!(r.response, "¿Guardo «Compras»?");
        assert_eq!(ctx.retries, 0);
    }

    #[tokio::test]
    async fn test_tool_failure_retries_then_succeeds() {
        let (executor, calls) = executor_with(vec![save_process()], 1);
        let mut ctx = new_context(&executor, "save-note", "nota");
        executor.start(&mut ctx).await;
        executor.resume(&mut ctx, "Compras").await;

        let r = executor.resume(&mut ctx, "sí").await;
        assert_eq!(r.status, TurnOutcome::AwaitingInput);
        assert_eq!(r.response, RETRY_PROMPT);
        assert_eq!(ctx.step_id(), Some("save"));

        let r = executor.resume(&mut ctx, "sí").await;
        assert_eq!(r.status, TurnOutcome::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(ctx.slot_str("title"), Some("Compras"));
    }

    #[tokio::test]
    async fn test_retry_refusal_cancels_only_when_allowed() {
        let (executor, calls) = executor_with(vec![save_process()], 1);
        let mut ctx = new_context(&executor, "save-note", "nota");
        executor.start(&mut ctx).await;
        executor.resume(&mut ctx, "Compras").await;
        executor.resume(&mut ctx, "sí").await;
        let r = executor.resume(&mut ctx, "no").await;
        assert_eq!(r.status, TurnOutcome::Cancelled);
        assert_eq!(r.response, CANCELLED_ACK);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let (executor, calls) = executor_with(vec![save_process_with(false)], 1);
        let mut ctx = new_context(&executor, "save-note", "nota");
        executor.start(&mut ctx).await;
        executor.resume(&mut ctx, "Compras").await;
        let r = executor.resume(&mut ctx, "sí").await;
        assert_eq!(r.response, RETRY_PROMPT);

        let r = executor.resume(&mut ctx, "no").await;
        assert_eq!(r.status, TurnOutcome::Completed);
        assert_eq!(r.response, "Guardada n-1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_tool_failure_exhausted_hides_details() {
        let (executor, calls) = executor_with(vec![save_process()], 10);
        let mut ctx = new_context(&executor, "save-note", "nota");
        executor.start(&mut ctx).await;
        executor.resume(&mut ctx, "Compras").await;
        executor.resume(&mut ctx, "sí").await;

        let r = executor.resume(&mut ctx, "otra vez").await;
        assert_eq!(r.status, TurnOutcome::Cancelled);
        assert_eq!(r.response, GENERIC_FAILURE);
        assert!(!r.response.contains("10.1.2.3"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_slots_filled_from_tool_result() {
        let def = ProcessBuilder::new("lookup", "Lookup")
            .slot(SlotDefinition::string("owner").required().from_tool("find_tasks", "/owner/name"))
            .slot(SlotDefinition::reference("first_task").required().from_tool("find_tasks", "/id"))
            .slot(SlotDefinition::string("reviewer").from_tool("find_tasks", "/reviewer"))
            .step(StepDefinition::execute("find", "find_tasks", ToolArgs::Static(json!({}))).then("read"))
            .step(StepDefinition::collect("read", &["owner", "first_task", "reviewer"]).then("done"))
            .step(StepDefinition::respond(
                "done",
                Text::dynamic(|ctx| format!("{} {}", ctx.slot_text("owner"), ctx.slot_text("first_task"))),
            ))
            .build()
            .unwrap();
        let mut registry = ProcessRegistry::new();
        registry.register(def).unwrap();
        let mut tools = ToolRegistry::new();
        tools.register(FlakyTool {
            name: "find_tasks",
            fail_times: 0,
            calls: Arc::new(AtomicUsize::new(0)),
            reply: json!({
                "owner": {"name": "Ana"},
                "tasks": [{"id": "t-9"}, {"id": "t-10"}]
            }),
        });
        let executor = ProcessExecutor::new(Arc::new(registry), Arc::new(ToolExecutor::new(tools, 5)));
        let mut ctx = new_context(&executor, "lookup", "x");

        let r = executor.start(&mut ctx).await;
        assert_eq!(r.status, TurnOutcome::Completed);
        // /owner/name 命中原始返回；/id 回退到第一个实体
        assert_eq!(r.response, "Ana t-9");
        assert!(!ctx.has_slot("reviewer"));
    }

    #[tokio::test]
    async fn test_branch_short_circuits() {
        let evaluated = Arc::new(AtomicUsize::new(0));
        let counter = evaluated.clone();
        let def = ProcessBuilder::new("route", "Route")
            .step(StepDefinition::branch(
                "pick",
                vec![
                    Branch::when(|ctx| {
                        ctx.set_slot("picked", "first");
                        true
                    }, "first"),
                    Branch::when(move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        true
                    }, "second"),
                    Branch::otherwise("second"),
                ],
            ))
            .step(StepDefinition::respond("first", Text::from("uno")))
            .step(StepDefinition::respond("second", Text::from("dos")))
            .build()
            .unwrap();
        let (executor, _) = executor_with(vec![def], 0);
        let mut ctx = new_context(&executor, "route", "x");

        let r = executor.start(&mut ctx).await;
        assert_eq!(r.response, "uno");
        assert_eq!(evaluated.load(Ordering::SeqCst), 0);
        assert_eq!(ctx.slot_str("picked"), Some("first"));
    }

    #[tokio::test]
    async fn test_intermediate_responses_are_joined() {
        let def = ProcessBuilder::new("chain", "Chain")
            .step(StepDefinition::respond("a", Text::from("uno")).then("b"))
            .step(StepDefinition::respond("b", Text::from("dos")))
            .build()
            .unwrap();
        let (executor, _) = executor_with(vec![def], 0);
        let mut ctx = new_context(&executor, "chain", "x");
        let r = executor.start(&mut ctx).await;
        assert_eq!(r.response, "uno\n\ndos");
        assert!(r.completed);
    }

    #[tokio::test]
    async fn test_step_budget_cancels_with_generic_reply() {
        let def = ProcessBuilder::new("long", "Long")
            .step(StepDefinition::respond("a", Text::from("1")).then("b"))
            .step(StepDefinition::respond("b", Text::from("2")).then("c"))
            .step(StepDefinition::respond("c", Text::from("3")))
            .build()
            .unwrap();
        let (executor, _) = executor_with(vec![def], 0);
        let executor = executor.with_step_budget(2);
        let mut ctx = new_context(&executor, "long", "x");

        let r = executor.start(&mut ctx).await;
        assert_eq!(r.status, TurnOutcome::Cancelled);
        assert!(r.response.ends_with(GENERIC_FAILURE));
    }

    #[tokio::test]
    async fn test_unknown_tool_cancels() {
        let def = ProcessBuilder::new("ghost", "Ghost")
            .step(StepDefinition::execute("call", "missing_tool", ToolArgs::Static(json!({}))).then("done"))
            .step(StepDefinition::respond("done", Text::from("ok")))
            .build()
            .unwrap();
        let (executor, _) = executor_with(vec![def], 0);
        let mut ctx = new_context(&executor, "ghost", "x");
        let r = executor.start(&mut ctx).await;
        assert_eq!(r.status, TurnOutcome::Cancelled);
        assert_eq!(r.response, GENERIC_FAILURE);
    }
}
