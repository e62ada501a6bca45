//! 任务更新流程
//!
//! 定位任务 -> 从消息识别新状态 / 新优先级（识别不到再问一次）-> 确认 -> update_task。

use regex::Regex;
use serde_json::{json, Map, Value};

use crate::core::ProcessError;
use crate::process::context::ProcessContext;
use crate::process::flows::common::{
    capture_text, priority_label, sniff_priority, sniff_status, status_label, task_lookup_steps,
};
use crate::process::flows::FlowSettings;
use crate::process::types::*;
use crate::process::ProcessBuilder;

pub const PROCESS_ID: &str = "task-update";

const TASK_NAME_PATTERN: &str = r#"(?i)(?:actualizar|actualiza|cambiar|cambia|marcar|marca|modificar|modifica|mover|mueve)\s+(?:la\s+)?tarea\s+["'«]?(.+?)["'»]?(?:\s+(?:a|como|con)\s+.*)?$"#;

/// 从消息中识别的变更
fn sniff_changes(message: &str) -> SlotMap {
    let mut found = SlotMap::new();
    if let Some(status) = sniff_status(message) {
        found.insert("new_status".to_string(), json!(status));
    }
    if let Some(priority) = sniff_priority(message) {
        found.insert("new_priority".to_string(), json!(priority));
    }
    found
}

fn has_changes(ctx: &ProcessContext) -> bool {
    ctx.has_slot("new_status") || ctx.has_slot("new_priority")
}

fn update_args(ctx: &ProcessContext) -> Value {
    let mut args = Map::new();
    args.insert("taskId".to_string(), json!(ctx.slot_text("task_id")));
    if let Some(status) = ctx.slot_str("new_status") {
        args.insert("status".to_string(), json!(status));
    }
    if let Some(priority) = ctx.slot_str("new_priority") {
        args.insert("priority".to_string(), json!(priority));
    }
    Value::Object(args)
}

fn change_summary(ctx: &ProcessContext) -> String {
    let mut lines = Vec::new();
    if let Some(status) = ctx.slot_str("new_status") {
        lines.push(format!("• Estado: {}", status_label(status)));
    }
    if let Some(priority) = ctx.slot_str("new_priority") {
        lines.push(format!("• Prioridad: {}", priority_label(priority)));
    }
    lines.join("\n")
}

pub fn definition(settings: &FlowSettings) -> Result<ProcessDefinition, ProcessError> {
    let task_name_re = Regex::new(TASK_NAME_PATTERN)?;

    let mut builder = ProcessBuilder::new(PROCESS_ID, "Actualizar tarea")
        .description("Cambia el estado o la prioridad de una tarea existente")
        .pattern_trigger(
            &[r"\b(actualizar|actualiza|cambiar|cambia|marcar|marca|modificar|modifica|mover|mueve)\s+(la\s+)?tarea\b"],
            10,
        )
        .keyword_trigger(&["update task"], 8)
        .intent_trigger(&["task_update"], 5)
        .slot(
            SlotDefinition::string("task_name")
                .required()
                .min_length(2)
                .prompt("¿Qué tarea quieres actualizar?")
                .extract_with(move |msg| capture_text(&task_name_re, msg)),
        )
        .slot(SlotDefinition::reference("task_id").from_previous_step())
        .slot(SlotDefinition::string("task_title").from_previous_step())
        .slot(SlotDefinition::string("new_status").allowed(&["pending", "in_progress", "completed"]))
        .slot(SlotDefinition::string("new_priority").allowed(&["high", "medium", "low"]))
        .slot(
            SlotDefinition::string("change_request")
                .required()
                .prompt("¿Qué quieres cambiar? Puedes indicar un estado (pendiente, en progreso, completada) o una prioridad (alta, media, baja)."),
        )
        .step(
            StepDefinition::collect("collect_task", &["task_name"])
                .on_enter(|msg, _ctx| sniff_changes(msg))
                .then("search_task"),
        );

    for step in task_lookup_steps("check_changes") {
        builder = builder.step(step);
    }

    builder
        .step(StepDefinition::branch(
            "check_changes",
            vec![
                Branch::when(|ctx| has_changes(ctx), "confirm_update"),
                Branch::otherwise("collect_change"),
            ],
        ))
        .step(
            StepDefinition::collect("collect_change", &["change_request"])
                .on_exit(|ctx| {
                    let request = ctx.slot_text("change_request");
                    let found = sniff_changes(&request);
                    ctx.merge_missing(found);
                    // 「alta / media / baja」单独出现时按优先级理解
                    if !has_changes(ctx) {
                        let word = request.trim().to_lowercase();
                        let priority = match word.as_str() {
                            "alta" => Some("high"),
                            "media" => Some("medium"),
                            "baja" => Some("low"),
                            _ => None,
                        };
                        if let Some(priority) = priority {
                            ctx.set_slot("new_priority", priority);
                        }
                    }
                })
                .then("check_changes_after"),
        )
        .step(StepDefinition::branch(
            "check_changes_after",
            vec![
                Branch::when(|ctx| has_changes(ctx), "confirm_update"),
                Branch::otherwise("change_not_understood"),
            ],
        ))
        .step(StepDefinition::respond(
            "change_not_understood",
            Text::from("No entendí qué cambio quieres hacer. Vuelve a intentarlo indicando el nuevo estado o la nueva prioridad."),
        ))
        .step(
            StepDefinition::confirm(
                "confirm_update",
                Text::dynamic(|ctx| {
                    format!(
                        "Voy a actualizar la tarea \"{}\":\n{}\n¿Confirmas?",
                        ctx.slot_text("task_title"),
                        change_summary(ctx)
                    )
                }),
            )
            .then("execute_update"),
        )
        .step(
            StepDefinition::execute("execute_update", "update_task", ToolArgs::dynamic(update_args))
                .mutating()
                .then("update_done"),
        )
        .step(StepDefinition::respond(
            "update_done",
            Text::dynamic(|ctx| {
                format!(
                    "✅ Tarea \"{}\" actualizada.\n{}",
                    ctx.slot_text("task_title"),
                    change_summary(ctx)
                )
            }),
        ))
        .requires_confirmation(true)
        .max_retries(settings.max_retries)
        .timeout_ms(settings.timeout_ms)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_name_stops_before_change() {
        let re = Regex::new(TASK_NAME_PATTERN).unwrap();
        assert_eq!(
            capture_text(&re, "marcar tarea Informe trimestral como completada"),
            Some(json!("Informe trimestral"))
        );
        assert_eq!(
            capture_text(&re, "cambia la tarea \"Diseño de landing\" a prioridad alta"),
            Some(json!("Diseño de landing"))
        );
        assert_eq!(capture_text(&re, "actualizar tarea Informe"), Some(json!("Informe")));
    }

    #[test]
    fn test_sniff_changes() {
        let found = sniff_changes("marcar tarea X como terminada con prioridad baja");
        assert_eq!(found.get("new_status"), Some(&json!("completed")));
        assert_eq!(found.get("new_priority"), Some(&json!("low")));
        assert!(sniff_changes("actualizar tarea X").is_empty());
    }

    #[test]
    fn test_definition_is_valid() {
        let def = definition(&FlowSettings::default()).unwrap();
        assert!(def.step("task_ambiguous").is_some());
        assert!(def.step("execute_update").is_some());
    }
}
