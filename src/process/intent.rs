//! 意图识别模块
//!
//! 分析用户输入，在所有已注册流程的触发器中找出优先级最高的匹配；没有匹配时交给兜底对话。
//! 纯函数：只依赖 (消息, 用户上下文, 注册表)，没有副作用。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::process::context::UserContext;
use crate::process::registry::ProcessRegistry;

/// 外部意图分类器：给消息打一个符号标签（可能没有）
pub trait IntentClassifier: Send + Sync {
    fn classify(&self, message: &str) -> Option<String>;
}

/// 永远不给标签的分类器
#[derive(Debug, Default)]
pub struct NoopClassifier;

impl IntentClassifier for NoopClassifier {
    fn classify(&self, _message: &str) -> Option<String> {
        None
    }
}

/// 快速规则分类器（不调用 LLM）：按前缀 / 关键词给出任务类意图标签
#[derive(Debug, Default)]
pub struct RuleIntentClassifier;

impl IntentClassifier for RuleIntentClassifier {
    fn classify(&self, message: &str) -> Option<String> {
        let input = message.trim().to_lowercase();

        if input.starts_with("todo:")
            || input.starts_with("new task")
            || input.starts_with("nueva tarea")
            || input.starts_with("apunta")
        {
            return Some("task_create".to_string());
        }

        if input.starts_with("archive")
            || input.contains("mandar al archivo")
            || input.contains("enviar al archivo")
        {
            return Some("task_archive".to_string());
        }

        if input.starts_with("update")
            || input.starts_with("ya terminé")
            || input.starts_with("ya termine")
        {
            return Some("task_update".to_string());
        }

        if input.starts_with("todos")
            || input.starts_with("qué tengo pendiente")
            || input.starts_with("que tengo pendiente")
            || input.contains("en qué estoy trabajando")
        {
            return Some("task_list".to_string());
        }

        None
    }
}

/// 匹配到的触发器信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentMatch {
    pub process_id: String,
    pub priority: i32,
    /// pattern / keyword / intent
    pub trigger: String,
}

/// 意图识别器
pub struct IntentDetector {
    classifier: Arc<dyn IntentClassifier>,
}

impl Default for IntentDetector {
    fn default() -> Self {
        Self::new(Arc::new(NoopClassifier))
    }
}

impl IntentDetector {
    pub fn new(classifier: Arc<dyn IntentClassifier>) -> Self {
        Self { classifier }
    }

    /// 识别消息对应的流程。
    ///
    /// 优先级最高者胜；同优先级时按注册顺序、再按流程内触发器顺序取第一个（严格大于才替换），结果确定。
    pub fn detect(
        &self,
        message: &str,
        user: &UserContext,
        registry: &ProcessRegistry,
    ) -> Option<IntentMatch> {
        let message = message.trim();
        if message.is_empty() {
            return None;
        }
        let lower = message.to_lowercase();
        let intent = self.classifier.classify(message);

        let mut best: Option<IntentMatch> = None;
        for process in registry.iter() {
            for trigger in &process.triggers {
                if !trigger.applies_to(user) {
                    continue;
                }
                if !trigger.matches(message, &lower, intent.as_deref()) {
                    continue;
                }
                let better = best
                    .as_ref()
                    .map_or(true, |current| trigger.priority > current.priority);
                if better {
                    best = Some(IntentMatch {
                        process_id: process.id.clone(),
                        priority: trigger.priority,
                        trigger: trigger.kind.label().to_string(),
                    });
                }
            }
        }

        if let Some(m) = &best {
            tracing::debug!(process = %m.process_id, priority = m.priority, trigger = %m.trigger, "Intent matched");
        }
        best
    }
}
