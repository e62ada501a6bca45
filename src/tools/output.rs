//! 工具结果归一化
//!
//! 外部工具返回的形状不统一：裸数组、`{ "tasks": [...] }`、`{ "data": [...] }`、单个对象或 null。
//! 在调用边界统一转成 ToolOutput，后续步骤 / 分支 / 回复模板不再各自拆包。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 识别为「列表包装」的键，按顺序尝试
const WRAPPER_KEYS: [&str; 6] = ["tasks", "clients", "data", "items", "results", "members"];

/// 统一后的工具结果：items 为实体列表，raw 保留原始返回
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub items: Vec<Value>,
    pub raw: Value,
}

impl ToolOutput {
    pub fn normalize(raw: Value) -> Self {
        let items = match &raw {
            Value::Null => Vec::new(),
            Value::Array(list) => list.clone(),
            Value::Object(map) => WRAPPER_KEYS
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_array).cloned())
                .unwrap_or_else(|| vec![raw.clone()]),
            other => vec![other.clone()],
        };
        Self { items, raw }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn first(&self) -> Option<&Value> {
        self.items.first()
    }

    /// 第一个实体的 id（字符串或数字）
    pub fn first_id(&self) -> Option<String> {
        self.first().and_then(value_id)
    }
}

/// 读取实体的 id 字段；数字 id 转为字符串
pub fn value_id(item: &Value) -> Option<String> {
    match item.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// 读取实体的显示名：依次尝试 name / title
pub fn value_label(item: &Value) -> Option<String> {
    ["name", "title"]
        .iter()
        .find_map(|key| item.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}
