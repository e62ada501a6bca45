//! 内置任务流程：创建 / 查询 / 更新 / 归档

pub mod common;
pub mod task_archive;
pub mod task_creation;
pub mod task_query;
pub mod task_update;

use serde::{Deserialize, Serialize};

use crate::core::ProcessError;
use crate::process::registry::ProcessRegistry;

/// 通用的无权限回复（不暴露内部结构）
pub const NOT_AUTHORIZED: &str = "Lo siento, no tienes permisos para realizar esta acción.";

/// 所有内置流程共用的配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowSettings {
    pub timeout_ms: u64,
    pub max_retries: u32,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 600_000,
            max_retries: 2,
        }
    }
}

/// 按固定顺序注册四个流程（意图同优先级时按此顺序决胜）
pub fn build_registry(settings: &FlowSettings) -> Result<ProcessRegistry, ProcessError> {
    let mut registry = ProcessRegistry::new();
    registry.register(task_creation::definition(settings)?)?;
    registry.register(task_query::definition(settings)?)?;
    registry.register(task_update::definition(settings)?)?;
    registry.register(task_archive::definition(settings)?)?;
    tracing::info!(processes = ?registry.ids(), "Process registry ready");
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::context::UserContext;
    use crate::process::intent::{IntentDetector, RuleIntentClassifier};
    use std::sync::Arc;

    fn detect(message: &str, admin: bool) -> Option<String> {
        let registry = build_registry(&FlowSettings::default()).unwrap();
        let detector = IntentDetector::new(Arc::new(RuleIntentClassifier));
        let user = UserContext::new("u1").admin(admin);
        detector
            .detect(message, &user, &registry)
            .map(|m| m.process_id)
    }

    #[test]
    fn test_registry_contains_all_flows() {
        let registry = build_registry(&FlowSettings::default()).unwrap();
        assert_eq!(
            registry.ids(),
            vec!["task-creation", "task-query", "task-update", "task-archive"]
        );
    }

    #[test]
    fn test_routing_of_typical_messages() {
        assert_eq!(
            detect("crear tarea Revisión de diseño para cliente Acme", false).as_deref(),
            Some("task-creation")
        );
        assert_eq!(detect("tareas activas", false).as_deref(), Some("task-query"));
        assert_eq!(
            detect("marcar tarea Informe como completada", false).as_deref(),
            Some("task-update")
        );
        assert_eq!(detect("archivar tarea Informe", false).as_deref(), Some("task-archive"));
        assert_eq!(detect("TODO: llamar a Acme", false).as_deref(), Some("task-creation"));
        assert_eq!(detect("¿qué tiempo hace?", false), None);
    }

    #[test]
    fn test_settings_flow_into_definitions() {
        let settings = FlowSettings {
            timeout_ms: 1_000,
            max_retries: 4,
        };
        let registry = build_registry(&settings).unwrap();
        for process in registry.iter() {
            assert_eq!(process.config.timeout_ms, 1_000);
            assert_eq!(process.config.max_retries, 4);
        }
    }
}
