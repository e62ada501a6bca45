//! 流程构建器
//!
//! 提供流畅的 API 来声明流程：触发器、槽位、步骤、配置；build() 时编译正则并做结构校验

use std::collections::HashMap;
use std::sync::Arc;

use regex::RegexBuilder;

use crate::core::ProcessError;
use crate::process::context::UserContext;
use crate::process::graph;
use crate::process::types::*;

/// 尚未编译的触发器
enum TriggerSpec {
    Pattern(Vec<String>),
    Keyword(Vec<String>),
    Intent(Vec<String>),
}

/// 流程构建器
pub struct ProcessBuilder {
    id: ProcessId,
    name: String,
    description: Option<String>,
    version: String,
    triggers: Vec<(TriggerSpec, i32, Option<TriggerCondition>)>,
    slots: Vec<SlotDefinition>,
    steps: Vec<StepDefinition>,
    initial_step: Option<StepId>,
    config: ProcessConfig,
}

impl ProcessBuilder {
    pub fn new(id: impl Into<ProcessId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            version: "1.0.0".to_string(),
            triggers: Vec::new(),
            slots: Vec::new(),
            steps: Vec::new(),
            initial_step: None,
            config: ProcessConfig::default(),
        }
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// 正则触发器（大小写不敏感）
    pub fn pattern_trigger(mut self, patterns: &[&str], priority: i32) -> Self {
        let list = patterns.iter().map(|p| p.to_string()).collect();
        self.triggers.push((TriggerSpec::Pattern(list), priority, None));
        self
    }

    /// 关键词触发器（大小写不敏感的子串匹配）
    pub fn keyword_trigger(mut self, keywords: &[&str], priority: i32) -> Self {
        let list = keywords.iter().map(|k| k.to_lowercase()).collect();
        self.triggers.push((TriggerSpec::Keyword(list), priority, None));
        self
    }

    /// 意图标签触发器
    pub fn intent_trigger(mut self, tags: &[&str], priority: i32) -> Self {
        let list = tags.iter().map(|t| t.to_string()).collect();
        self.triggers.push((TriggerSpec::Intent(list), priority, None));
        self
    }

    /// 为最近添加的触发器设置前置条件
    pub fn only_if<F>(mut self, condition: F) -> Self
    where
        F: Fn(&UserContext) -> bool + Send + Sync + 'static,
    {
        if let Some(last) = self.triggers.last_mut() {
            last.2 = Some(Arc::new(condition));
        }
        self
    }

    pub fn slot(mut self, slot: SlotDefinition) -> Self {
        self.slots.push(slot);
        self
    }

    pub fn step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    /// 入口步骤；未设置时为第一个步骤
    pub fn initial_step(mut self, id: impl Into<StepId>) -> Self {
        self.initial_step = Some(id.into());
        self
    }

    pub fn config(mut self, config: ProcessConfig) -> Self {
        self.config = config;
        self
    }

    pub fn requires_confirmation(mut self, value: bool) -> Self {
        self.config.requires_confirmation = value;
        self
    }

    pub fn max_retries(mut self, value: u32) -> Self {
        self.config.max_retries = value;
        self
    }

    pub fn timeout_ms(mut self, value: u64) -> Self {
        self.config.timeout_ms = value;
        self
    }

    pub fn allow_cancel(mut self, value: bool) -> Self {
        self.config.allow_cancel = value;
        self
    }

    pub fn track_in_history(mut self, value: bool) -> Self {
        self.config.track_in_history = value;
        self
    }

    /// 构建并校验流程
    pub fn build(self) -> Result<ProcessDefinition, ProcessError> {
        if self.id.trim().is_empty() {
            return Err(ProcessError::invalid("<unnamed>", "id is required"));
        }

        let mut triggers = Vec::with_capacity(self.triggers.len());
        for (spec, priority, condition) in self.triggers {
            let kind = match spec {
                TriggerSpec::Pattern(patterns) => TriggerKind::Pattern(
                    patterns
                        .iter()
                        .map(|p| RegexBuilder::new(p).case_insensitive(true).build())
                        .collect::<Result<Vec<_>, _>>()?,
                ),
                TriggerSpec::Keyword(keywords) => TriggerKind::Keyword(keywords),
                TriggerSpec::Intent(tags) => TriggerKind::Intent(tags),
            };
            triggers.push(Trigger {
                kind,
                priority,
                condition,
            });
        }

        let step_index: HashMap<StepId, usize> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();

        let initial_step = match self.initial_step {
            Some(id) => id,
            None => self
                .steps
                .first()
                .map(|s| s.id.clone())
                .ok_or_else(|| ProcessError::invalid(&self.id, "process has no steps"))?,
        };

        let definition = ProcessDefinition {
            id: self.id,
            name: self.name,
            description: self.description,
            version: self.version,
            triggers,
            slots: self.slots,
            steps: self.steps,
            initial_step,
            config: self.config,
            step_index,
        };

        graph::validate(&definition)?;
        Ok(definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn linear() -> ProcessBuilder {
        ProcessBuilder::new("demo", "Demo")
            .keyword_trigger(&["demo"], 1)
            .slot(SlotDefinition::string("name").required().prompt("¿Nombre?"))
            .step(StepDefinition::collect("ask", &["name"]).then("confirm"))
            .step(StepDefinition::confirm("confirm", Text::from("¿Seguro?")).then("save"))
            .step(
                StepDefinition::execute("save", "create_thing", ToolArgs::Static(json!({})))
                    .mutating()
                    .then("done"),
            )
            .step(StepDefinition::respond("done", Text::from("Listo")))
            .requires_confirmation(true)
    }

    #[test]
    fn test_build_linear_process() {
        let def = linear().build().expect("valid definition");
        assert_eq!(def.initial_step, "ask");
        assert_eq!(def.step_ids().count(), 4);
        assert!(def.step("save").is_some());
    }

    #[test]
    fn test_unknown_next_step_rejected() {
        let err = ProcessBuilder::new("bad", "Bad")
            .step(StepDefinition::respond("a", Text::from("x")).then("missing"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("unknown step 'missing'"));
    }

    #[test]
    fn test_mutation_without_confirmation_rejected() {
        let err = ProcessBuilder::new("unsafe", "Unsafe")
            .step(
                StepDefinition::execute("save", "create_thing", ToolArgs::Static(json!({})))
                    .mutating()
                    .then("done"),
            )
            .step(StepDefinition::respond("done", Text::from("ok")))
            .requires_confirmation(true)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("without confirmation"));
    }

    #[test]
    fn test_branch_bypassing_confirm_rejected() {
        let err = ProcessBuilder::new("bypass", "Bypass")
            .step(StepDefinition::branch(
                "route",
                vec![
                    Branch::when(|ctx| ctx.user_context.is_admin, "save"),
                    Branch::otherwise("confirm"),
                ],
            ))
            .step(StepDefinition::confirm("confirm", Text::from("?")).then("save"))
            .step(
                StepDefinition::execute("save", "t", ToolArgs::Static(json!({})))
                    .mutating()
                    .then("done"),
            )
            .step(StepDefinition::respond("done", Text::from("ok")))
            .requires_confirmation(true)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("'save'"));
    }

    #[test]
    fn test_non_blocking_cycle_rejected() {
        let err = ProcessBuilder::new("loop", "Loop")
            .step(StepDefinition::execute("a", "t", ToolArgs::Static(json!({}))).then("b"))
            .step(StepDefinition::branch("b", vec![Branch::otherwise("a")]))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_cycle_through_collect_is_allowed() {
        let def = ProcessBuilder::new("retry", "Retry")
            .slot(SlotDefinition::string("answer").required())
            .step(StepDefinition::collect("ask", &["answer"]).then("check"))
            .step(StepDefinition::branch(
                "check",
                vec![
                    Branch::when(|ctx| ctx.slot_str("answer") == Some("42"), "done"),
                    Branch::otherwise("ask"),
                ],
            ))
            .step(StepDefinition::respond("done", Text::from("ok")))
            .build();
        assert!(def.is_ok());
    }

    #[test]
    fn test_default_branch_must_be_last() {
        let err = ProcessBuilder::new("order", "Order")
            .step(StepDefinition::branch(
                "b",
                vec![Branch::otherwise("x"), Branch::when(|_| true, "x")],
            ))
            .step(StepDefinition::respond("x", Text::from("x")))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("must be last"));
    }

    #[test]
    fn test_invalid_pattern_and_undeclared_slot() {
        let err = ProcessBuilder::new("re", "Re")
            .pattern_trigger(&["(unclosed"], 1)
            .step(StepDefinition::respond("x", Text::from("x")))
            .build()
            .unwrap_err();
        assert!(matches!(err, ProcessError::InvalidPattern(_)));

        let err = ProcessBuilder::new("slots", "Slots")
            .step(StepDefinition::collect("ask", &["ghost"]).then("x"))
            .step(StepDefinition::respond("x", Text::from("x")))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("undeclared slot 'ghost'"));
    }
}
