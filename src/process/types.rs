//! 流程定义类型
//!
//! 流程（ProcessDefinition）是静态注册的声明式对话图：触发器、槽位、步骤与配置。
//! 条件、回复模板、工具参数都是编译期闭包，不做任何动态求值。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::process::context::{ProcessContext, UserContext};
use crate::process::extract::SlotExtractor;

pub type ProcessId = String;
pub type StepId = String;

/// 槽位名 -> 当前值
pub type SlotMap = HashMap<String, Value>;

/// 触发器前置条件（例如仅管理员）
pub type TriggerCondition = Arc<dyn Fn(&UserContext) -> bool + Send + Sync>;
/// 分支条件；允许写入槽位（需幂等）
pub type BranchCondition = Arc<dyn Fn(&mut ProcessContext) -> bool + Send + Sync>;
pub type TextFn = Arc<dyn Fn(&ProcessContext) -> String + Send + Sync>;
pub type ArgsFn = Arc<dyn Fn(&ProcessContext) -> Value + Send + Sync>;
pub type StepHook = Arc<dyn Fn(&mut ProcessContext) + Send + Sync>;
/// 从一段文本中抽取单个槽位值
pub type ValueExtractor = Arc<dyn Fn(&str) -> Option<Value> + Send + Sync>;

/// 触发器类型
pub enum TriggerKind {
    /// 正则列表（编译时已设为大小写不敏感）
    Pattern(Vec<Regex>),
    /// 字面短语列表（小写，子串匹配）
    Keyword(Vec<String>),
    /// 外部分类器给出的意图标签
    Intent(Vec<String>),
}

impl TriggerKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pattern(_) => "pattern",
            Self::Keyword(_) => "keyword",
            Self::Intent(_) => "intent",
        }
    }
}

/// 触发规则：匹配方式 + 优先级 + 可选条件
pub struct Trigger {
    pub kind: TriggerKind,
    pub priority: i32,
    pub condition: Option<TriggerCondition>,
}

impl Trigger {
    /// 条件不满足的触发器完全不参与候选
    pub fn applies_to(&self, user: &UserContext) -> bool {
        self.condition.as_ref().map_or(true, |cond| cond(user))
    }

    /// message_lower 为预先转小写的消息；intent 为分类器结果
    pub fn matches(&self, message: &str, message_lower: &str, intent: Option<&str>) -> bool {
        match &self.kind {
            TriggerKind::Pattern(patterns) => patterns.iter().any(|re| re.is_match(message)),
            TriggerKind::Keyword(keywords) => keywords
                .iter()
                .any(|kw| message_lower.contains(kw.as_str())),
            TriggerKind::Intent(tags) => {
                intent.is_some_and(|tag| tags.iter().any(|t| t == tag))
            }
        }
    }
}

/// 槽位值类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotType {
    String,
    Number,
    Boolean,
    /// 不透明的实体引用 id
    Reference,
}

/// 槽位校验规则
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotValidation {
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    /// 允许值（大小写不敏感）
    pub allowed: Option<Vec<String>>,
}

/// 槽位值来源
pub enum ExtractFrom {
    /// 用户消息：可选抽取器作用于消息文本；被追问时用户的回复即答案
    Message(Option<ValueExtractor>),
    /// 工具结果：工具名 + JSON Pointer
    ToolResult { tool: String, pointer: String },
    /// 由前序步骤的钩子或分支写入
    PreviousStep,
}

pub struct SlotDefinition {
    pub name: String,
    pub slot_type: SlotType,
    pub required: bool,
    pub default_value: Option<Value>,
    pub validation: Option<SlotValidation>,
    pub prompt_if_missing: Option<String>,
    pub extract_from: ExtractFrom,
}

impl SlotDefinition {
    fn new(name: &str, slot_type: SlotType) -> Self {
        Self {
            name: name.to_string(),
            slot_type,
            required: false,
            default_value: None,
            validation: None,
            prompt_if_missing: None,
            extract_from: ExtractFrom::Message(None),
        }
    }

    pub fn string(name: &str) -> Self {
        Self::new(name, SlotType::String)
    }

    pub fn number(name: &str) -> Self {
        Self::new(name, SlotType::Number)
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, SlotType::Boolean)
    }

    pub fn reference(name: &str) -> Self {
        Self::new(name, SlotType::Reference)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn prompt(mut self, text: impl Into<String>) -> Self {
        self.prompt_if_missing = Some(text.into());
        self
    }

    pub fn min_length(mut self, n: usize) -> Self {
        self.validation.get_or_insert_with(SlotValidation::default).min_length = Some(n);
        self
    }

    pub fn max_length(mut self, n: usize) -> Self {
        self.validation.get_or_insert_with(SlotValidation::default).max_length = Some(n);
        self
    }

    pub fn allowed(mut self, values: &[&str]) -> Self {
        self.validation.get_or_insert_with(SlotValidation::default).allowed =
            Some(values.iter().map(|v| v.to_string()).collect());
        self
    }

    pub fn extract_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> Option<Value> + Send + Sync + 'static,
    {
        self.extract_from = ExtractFrom::Message(Some(Arc::new(f)));
        self
    }

    pub fn from_tool(mut self, tool: &str, pointer: &str) -> Self {
        self.extract_from = ExtractFrom::ToolResult {
            tool: tool.to_string(),
            pointer: pointer.to_string(),
        };
        self
    }

    pub fn from_previous_step(mut self) -> Self {
        self.extract_from = ExtractFrom::PreviousStep;
        self
    }
}

/// 静态文本或基于上下文渲染的文本
pub enum Text {
    Static(String),
    Dynamic(TextFn),
}

impl Text {
    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn(&ProcessContext) -> String + Send + Sync + 'static,
    {
        Self::Dynamic(Arc::new(f))
    }

    pub fn render(&self, ctx: &ProcessContext) -> String {
        match self {
            Self::Static(s) => s.clone(),
            Self::Dynamic(f) => f(ctx),
        }
    }
}

impl From<&str> for Text {
    fn from(s: &str) -> Self {
        Self::Static(s.to_string())
    }
}

/// 工具参数：静态对象或按上下文计算
pub enum ToolArgs {
    Static(Value),
    Dynamic(ArgsFn),
}

impl ToolArgs {
    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn(&ProcessContext) -> Value + Send + Sync + 'static,
    {
        Self::Dynamic(Arc::new(f))
    }

    pub fn resolve(&self, ctx: &ProcessContext) -> Value {
        match self {
            Self::Static(v) => v.clone(),
            Self::Dynamic(f) => f(ctx),
        }
    }
}

/// 分支：条件 + 目标步骤；otherwise 为无条件默认分支，必须放在最后
pub struct Branch {
    pub condition: BranchCondition,
    pub next_step: StepId,
    pub is_default: bool,
}

impl Branch {
    pub fn when<F>(condition: F, next_step: &str) -> Self
    where
        F: Fn(&mut ProcessContext) -> bool + Send + Sync + 'static,
    {
        Self {
            condition: Arc::new(condition),
            next_step: next_step.to_string(),
            is_default: false,
        }
    }

    pub fn otherwise(next_step: &str) -> Self {
        Self {
            condition: Arc::new(|_: &mut ProcessContext| true),
            next_step: next_step.to_string(),
            is_default: true,
        }
    }
}

/// 步骤类型
pub enum StepKind {
    /// 阻塞直到列出的槽位都已填充
    Collect { slots: Vec<String> },
    /// 调用外部工具；mutates 标记会改变外部状态的调用
    Execute {
        tool: String,
        args: ToolArgs,
        mutates: bool,
    },
    /// 按顺序求值，第一个为真的分支决定下一步
    Branch { branches: Vec<Branch> },
    /// 渲染是/否确认并阻塞
    Confirm { message: Text },
    /// 输出文本；无 next_step 时流程完成
    Respond { response: Text },
}

impl StepKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Collect { .. } => "collect",
            Self::Execute { .. } => "execute",
            Self::Branch { .. } => "branch",
            Self::Confirm { .. } => "confirm",
            Self::Respond { .. } => "respond",
        }
    }

    /// 可能等待用户输入的步骤
    pub fn may_block(&self) -> bool {
        matches!(self, Self::Collect { .. } | Self::Confirm { .. })
    }
}

pub struct StepDefinition {
    pub id: StepId,
    pub kind: StepKind,
    pub next_step: Option<StepId>,
    /// 进入步骤前运行，可从最新消息中预填槽位（只补缺，不覆盖）
    pub on_enter: Option<Arc<dyn SlotExtractor>>,
    /// 步骤主体完成后、前进之前运行
    pub on_exit: Option<StepHook>,
}

impl StepDefinition {
    fn new(id: &str, kind: StepKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            next_step: None,
            on_enter: None,
            on_exit: None,
        }
    }

    pub fn collect(id: &str, slots: &[&str]) -> Self {
        Self::new(
            id,
            StepKind::Collect {
                slots: slots.iter().map(|s| s.to_string()).collect(),
            },
        )
    }

    pub fn execute(id: &str, tool: &str, args: ToolArgs) -> Self {
        Self::new(
            id,
            StepKind::Execute {
                tool: tool.to_string(),
                args,
                mutates: false,
            },
        )
    }

    pub fn branch(id: &str, branches: Vec<Branch>) -> Self {
        Self::new(id, StepKind::Branch { branches })
    }

    pub fn confirm(id: &str, message: Text) -> Self {
        Self::new(id, StepKind::Confirm { message })
    }

    pub fn respond(id: &str, response: Text) -> Self {
        Self::new(id, StepKind::Respond { response })
    }

    pub fn then(mut self, next_step: &str) -> Self {
        self.next_step = Some(next_step.to_string());
        self
    }

    /// 标记 execute 步骤会修改外部状态
    pub fn mutating(mut self) -> Self {
        if let StepKind::Execute { mutates, .. } = &mut self.kind {
            *mutates = true;
        }
        self
    }

    pub fn on_enter<F>(mut self, extractor: F) -> Self
    where
        F: Fn(&str, &ProcessContext) -> SlotMap + Send + Sync + 'static,
    {
        self.on_enter = Some(Arc::new(extractor));
        self
    }

    pub fn on_exit<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut ProcessContext) + Send + Sync + 'static,
    {
        self.on_exit = Some(Arc::new(hook));
        self
    }

    /// 所有出边（next_step + 分支目标）
    pub fn successors(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        if let StepKind::Branch { branches } = &self.kind {
            out.extend(branches.iter().map(|b| b.next_step.as_str()));
        }
        if let Some(next) = &self.next_step {
            out.push(next.as_str());
        }
        out
    }
}

/// 流程级配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessConfig {
    pub requires_confirmation: bool,
    pub max_retries: u32,
    /// 自最后一次用户输入起的过期时间（毫秒）
    pub timeout_ms: u64,
    pub allow_cancel: bool,
    pub track_in_history: bool,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            requires_confirmation: false,
            max_retries: 2,
            timeout_ms: 600_000,
            allow_cancel: true,
            track_in_history: true,
        }
    }
}

/// 已校验的流程定义（只能通过 ProcessBuilder 构建）
pub struct ProcessDefinition {
    pub id: ProcessId,
    pub name: String,
    pub description: Option<String>,
    pub version: String,
    pub triggers: Vec<Trigger>,
    pub slots: Vec<SlotDefinition>,
    pub steps: Vec<StepDefinition>,
    pub initial_step: StepId,
    pub config: ProcessConfig,
    pub(crate) step_index: HashMap<StepId, usize>,
}

impl ProcessDefinition {
    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.step_index.get(id).and_then(|i| self.steps.get(*i))
    }

    pub fn slot(&self, name: &str) -> Option<&SlotDefinition> {
        self.slots.iter().find(|s| s.name == name)
    }

    pub fn step_ids(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.id.as_str())
    }
}

impl fmt::Debug for ProcessDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("initial_step", &self.initial_step)
            .field("steps", &self.step_ids().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}
