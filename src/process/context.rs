//! 流程运行上下文
//!
//! 每个会话至多一个 ProcessContext；current_step 即状态机状态，只由 ProcessExecutor 修改。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::process::types::{ProcessDefinition, ProcessId, SlotMap, StepId};
use crate::tools::ToolOutput;

/// 调用方注入的授权相关信息，流程内只读
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    pub user_id: String,
    pub is_admin: bool,
    pub user_name: Option<String>,
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn admin(mut self, is_admin: bool) -> Self {
        self.is_admin = is_admin;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.user_name = Some(name.into());
        self
    }
}

/// 状态机指针：某个步骤，或两个终态之一
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepPointer {
    Step(StepId),
    Completed,
    Cancelled,
}

/// 流程阻塞时等待的输入类型
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pending {
    /// 等待某个槽位的回答
    Slot(String),
    /// 等待是/否确认
    Confirmation,
    /// 工具失败后等待是否重试
    Retry,
}

#[derive(Debug, Clone)]
pub struct ProcessContext {
    /// 本次运行的唯一 id（日志关联用）
    pub run_id: String,
    pub process_id: ProcessId,
    pub session_id: String,
    pub user_id: String,
    pub original_message: String,
    /// 最近一次用户输入（首轮等于 original_message）
    pub latest_message: String,
    pub slots: SlotMap,
    /// 工具名 -> 最近一次（已归一化的）结果
    pub tool_results: HashMap<String, ToolOutput>,
    pub user_context: UserContext,
    pub current_step: StepPointer,
    pub pending: Option<Pending>,
    /// 当前步骤连续失败 / 无效回答次数
    pub retries: u32,
    /// 已处理的用户轮数
    pub turns: u32,
    /// 访问过的步骤（track_in_history 时记录）
    pub history: Vec<StepId>,
    pub created_at: DateTime<Utc>,
    pub last_activity: Instant,
    pub timeout: Duration,
}

impl ProcessContext {
    pub fn new(
        definition: &ProcessDefinition,
        session_id: &str,
        user_context: UserContext,
        message: &str,
    ) -> Self {
        Self {
            run_id: format!("run_{}", uuid::Uuid::new_v4()),
            process_id: definition.id.clone(),
            session_id: session_id.to_string(),
            user_id: user_context.user_id.clone(),
            original_message: message.to_string(),
            latest_message: message.to_string(),
            slots: SlotMap::new(),
            tool_results: HashMap::new(),
            user_context,
            current_step: StepPointer::Step(definition.initial_step.clone()),
            pending: None,
            retries: 0,
            turns: 1,
            history: Vec::new(),
            created_at: Utc::now(),
            last_activity: Instant::now(),
            timeout: Duration::from_millis(definition.config.timeout_ms),
        }
    }

    pub fn step_id(&self) -> Option<&str> {
        match &self.current_step {
            StepPointer::Step(id) => Some(id.as_str()),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.current_step, StepPointer::Step(_))
    }

    /// 自最后一次用户输入起是否已超时
    pub fn is_expired(&self) -> bool {
        self.last_activity.elapsed() > self.timeout
    }

    /// 记录一次新的用户输入
    pub fn touch(&mut self, message: &str) {
        self.latest_message = message.to_string();
        self.turns += 1;
        self.last_activity = Instant::now();
    }

    pub fn slot(&self, name: &str) -> Option<&Value> {
        self.slots.get(name).filter(|v| !v.is_null())
    }

    pub fn has_slot(&self, name: &str) -> bool {
        self.slot(name).is_some()
    }

    pub fn slot_str(&self, name: &str) -> Option<&str> {
        self.slot(name).and_then(Value::as_str)
    }

    /// 字符串形式的槽位值（数字 / 布尔也转为文本），缺失时为空串
    pub fn slot_text(&self, name: &str) -> String {
        match self.slot(name) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }

    pub fn slot_bool(&self, name: &str) -> bool {
        self.slot(name).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn set_slot(&mut self, name: &str, value: impl Into<Value>) {
        self.slots.insert(name.to_string(), value.into());
    }

    /// 只填充尚未存在的槽位，返回实际写入的数量
    pub fn merge_missing(&mut self, found: SlotMap) -> usize {
        let mut written = 0;
        for (name, value) in found {
            if !self.has_slot(&name) && !value.is_null() {
                self.slots.insert(name, value);
                written += 1;
            }
        }
        written
    }

    pub fn tool_output(&self, tool: &str) -> Option<&ToolOutput> {
        self.tool_results.get(tool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bare_context() -> ProcessContext {
        ProcessContext {
            run_id: "run_test".to_string(),
            process_id: "p".to_string(),
            session_id: "s".to_string(),
            user_id: "u".to_string(),
            original_message: "hola".to_string(),
            latest_message: "hola".to_string(),
            slots: SlotMap::new(),
            tool_results: HashMap::new(),
            user_context: UserContext::new("u"),
            current_step: StepPointer::Step("start".to_string()),
            pending: None,
            retries: 0,
            turns: 1,
            history: Vec::new(),
            created_at: Utc::now(),
            last_activity: Instant::now(),
            timeout: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_merge_missing_never_overwrites() {
        let mut ctx = bare_context();
        ctx.set_slot("status", "completed");
        let mut found = SlotMap::new();
        found.insert("status".to_string(), json!("pending"));
        found.insert("priority".to_string(), json!("high"));
        assert_eq!(ctx.merge_missing(found), 1);
        assert_eq!(ctx.slot_str("status"), Some("completed"));
        assert_eq!(ctx.slot_str("priority"), Some("high"));
    }

    #[test]
    fn test_null_slot_counts_as_missing() {
        let mut ctx = bare_context();
        ctx.set_slot("client_id", Value::Null);
        assert!(!ctx.has_slot("client_id"));
        assert_eq!(ctx.slot_text("client_id"), "");
    }

    #[test]
    fn test_touch_updates_turn_state() {
        let mut ctx = bare_context();
        ctx.touch("sí");
        assert_eq!(ctx.latest_message, "sí");
        assert_eq!(ctx.original_message, "hola");
        assert_eq!(ctx.turns, 2);
        assert!(!ctx.is_terminal());
    }
}
