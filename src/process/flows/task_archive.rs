//! 任务归档流程（仅管理员）
//!
//! 非管理员在任何工具调用之前就得到「无权限」回复。

use regex::Regex;
use serde_json::json;

use crate::core::ProcessError;
use crate::process::flows::common::{capture_text, task_lookup_steps};
use crate::process::flows::FlowSettings;
use crate::process::types::*;
use crate::process::ProcessBuilder;

pub const PROCESS_ID: &str = "task-archive";

pub const ARCHIVE_NOT_AUTHORIZED: &str = "Lo siento, no tienes permisos para archivar tareas.";

const TASK_NAME_PATTERN: &str = r#"(?i)(?:archivar|archiva)\s+(?:la\s+)?tarea\s+["'«]?(.+?)["'»]?\s*$"#;

pub fn definition(settings: &FlowSettings) -> Result<ProcessDefinition, ProcessError> {
    let task_name_re = Regex::new(TASK_NAME_PATTERN)?;

    let mut builder = ProcessBuilder::new(PROCESS_ID, "Archivar tarea")
        .description("Archiva una tarea existente; requiere permisos de administrador")
        .pattern_trigger(&[r"\b(archivar|archiva)\b.*\btarea\b"], 12)
        .keyword_trigger(&["archive task"], 8)
        .intent_trigger(&["task_archive"], 5)
        .slot(
            SlotDefinition::string("task_name")
                .required()
                .min_length(2)
                .prompt("¿Qué tarea quieres archivar?")
                .extract_with(move |msg| capture_text(&task_name_re, msg)),
        )
        .slot(SlotDefinition::reference("task_id").from_previous_step())
        .slot(SlotDefinition::string("task_title").from_previous_step())
        .step(StepDefinition::branch(
            "check_permissions",
            vec![
                Branch::when(|ctx| ctx.user_context.is_admin, "collect_task"),
                Branch::otherwise("not_authorized"),
            ],
        ))
        .step(StepDefinition::respond("not_authorized", Text::from(ARCHIVE_NOT_AUTHORIZED)))
        .step(StepDefinition::collect("collect_task", &["task_name"]).then("search_task"));

    for step in task_lookup_steps("confirm_archive") {
        builder = builder.step(step);
    }

    builder
        .step(
            StepDefinition::confirm(
                "confirm_archive",
                Text::dynamic(|ctx| {
                    format!(
                        "¿Seguro que quieres archivar la tarea \"{}\"? Dejará de aparecer en los listados.",
                        ctx.slot_text("task_title")
                    )
                }),
            )
            .then("execute_archive"),
        )
        .step(
            StepDefinition::execute(
                "execute_archive",
                "archive_task",
                ToolArgs::dynamic(|ctx| {
                    json!({
                        "taskId": ctx.slot_text("task_id"),
                        "archivedBy": ctx.user_id,
                    })
                }),
            )
            .mutating()
            .then("archive_done"),
        )
        .step(StepDefinition::respond(
            "archive_done",
            Text::dynamic(|ctx| format!("📦 Tarea \"{}\" archivada.", ctx.slot_text("task_title"))),
        ))
        .initial_step("check_permissions")
        .requires_confirmation(true)
        .max_retries(settings.max_retries)
        .timeout_ms(settings.timeout_ms)
        .build()
}
