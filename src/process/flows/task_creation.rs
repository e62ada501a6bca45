//! 任务创建流程
//!
//! 收集任务名与客户名 -> 按名称查找客户（找不到时可先创建）-> 确认 -> create_task。

use regex::Regex;
use serde_json::{json, Value};

use crate::core::ProcessError;
use crate::process::flows::common::{
    capture_text, no_results, numbered_labels, priority_label, resolve_single, sniff_priority,
    LOOKUP_LIMIT,
};
use crate::process::flows::FlowSettings;
use crate::process::types::*;
use crate::process::ProcessBuilder;
use crate::tools::{value_id, value_label};

pub const PROCESS_ID: &str = "task-creation";

const TASK_NAME_PATTERN: &str = r"(?i)(?:crear|crea|nueva|agregar|agrega|añadir|añade)\s+(?:una\s+)?(?:nueva\s+)?tarea(?:\s+(?:llamada\s+|de nombre\s+)?(.+?))??(?:\s+para\s+(?:el\s+)?cliente\s+.+)?$";
const CLIENT_NAME_PATTERN: &str = r"(?i)para\s+(?:el\s+)?cliente\s+(.+?)\s*$";

pub fn definition(settings: &FlowSettings) -> Result<ProcessDefinition, ProcessError> {
    let task_name_re = Regex::new(TASK_NAME_PATTERN)?;
    let client_name_re = Regex::new(CLIENT_NAME_PATTERN)?;

    ProcessBuilder::new(PROCESS_ID, "Crear tarea")
        .description("Crea una tarea para un cliente, creando el cliente si no existe")
        .pattern_trigger(&[r"\b(crear|crea|nueva|agregar|agrega|añadir|añade)\s+(una\s+)?(nueva\s+)?tarea\b"], 10)
        .keyword_trigger(&["nueva tarea", "create task"], 8)
        .intent_trigger(&["task_create"], 5)
        .slot(
            SlotDefinition::string("task_name")
                .required()
                .min_length(2)
                .max_length(120)
                .prompt("¿Cuál es el nombre de la tarea?")
                .extract_with(move |msg| capture_text(&task_name_re, msg)),
        )
        .slot(
            SlotDefinition::string("client_name")
                .required()
                .min_length(2)
                .prompt("¿Para qué cliente es la tarea?")
                .extract_with(move |msg| capture_text(&client_name_re, msg)),
        )
        .slot(
            SlotDefinition::string("priority")
                .allowed(&["high", "medium", "low"])
                .default_value(json!("medium")),
        )
        .slot(SlotDefinition::reference("client_id").from_previous_step())
        .step(
            StepDefinition::collect("collect_task_name", &["task_name"])
                .on_enter(|msg, _ctx| {
                    let mut found = SlotMap::new();
                    if let Some(priority) = sniff_priority(msg) {
                        found.insert("priority".to_string(), json!(priority));
                    }
                    found
                })
                .then("collect_client_name"),
        )
        .step(StepDefinition::collect("collect_client_name", &["client_name", "priority"]).then("search_client"))
        .step(
            StepDefinition::execute(
                "search_client",
                "search_clients",
                ToolArgs::dynamic(|ctx| json!({ "query": ctx.slot_text("client_name"), "limit": LOOKUP_LIMIT })),
            )
            .then("check_client"),
        )
        .step(StepDefinition::branch(
            "check_client",
            vec![
                Branch::when(
                    |ctx| resolve_single(ctx, "search_clients", "client_name", "client_id", "client_name"),
                    "confirm_task",
                ),
                Branch::when(|ctx| no_results(ctx, "search_clients"), "client_not_found"),
                Branch::otherwise("client_ambiguous"),
            ],
        ))
        .step(
            StepDefinition::confirm(
                "client_not_found",
                Text::dynamic(|ctx| {
                    format!(
                        "No encontré el cliente \"{}\". ¿Deseas que lo cree?",
                        ctx.slot_text("client_name")
                    )
                }),
            )
            .then("create_client"),
        )
        .step(
            StepDefinition::execute(
                "create_client",
                "create_client",
                ToolArgs::dynamic(|ctx| json!({ "name": ctx.slot_text("client_name") })),
            )
            .mutating()
            .on_exit(|ctx| {
                let created = ctx.tool_output("create_client").and_then(|o| o.first()).cloned();
                if let Some(client) = created {
                    if let Some(id) = value_id(&client) {
                        ctx.set_slot("client_id", id);
                    }
                    if let Some(name) = value_label(&client) {
                        ctx.set_slot("client_name", name);
                    }
                }
            })
            .then("confirm_task"),
        )
        .step(
            StepDefinition::confirm(
                "confirm_task",
                Text::dynamic(|ctx| {
                    format!(
                        "Voy a crear esta tarea:\n• Tarea: {}\n• Cliente: {}\n• Prioridad: {}\n¿Confirmas?",
                        ctx.slot_text("task_name"),
                        ctx.slot_text("client_name"),
                        priority_label(&ctx.slot_text("priority")),
                    )
                }),
            )
            .then("create_task"),
        )
        .step(
            StepDefinition::execute(
                "create_task",
                "create_task",
                ToolArgs::dynamic(|ctx| {
                    json!({
                        "title": ctx.slot_text("task_name"),
                        "clientId": ctx.slot("client_id").cloned().unwrap_or(Value::Null),
                        "priority": ctx.slot_text("priority"),
                        "createdBy": ctx.user_id,
                    })
                }),
            )
            .mutating()
            .then("task_created"),
        )
        .step(StepDefinition::respond(
            "task_created",
            Text::dynamic(|ctx| {
                format!(
                    "✅ Tarea \"{}\" creada para el cliente {} (prioridad {}).",
                    ctx.slot_text("task_name"),
                    ctx.slot_text("client_name"),
                    priority_label(&ctx.slot_text("priority")).to_lowercase(),
                )
            }),
        ))
        .step(StepDefinition::respond(
            "client_ambiguous",
            Text::dynamic(|ctx| {
                let list = ctx
                    .tool_output("search_clients")
                    .map(|output| numbered_labels(&output.items, None))
                    .unwrap_or_default();
                format!(
                    "Encontré varios clientes que coinciden con \"{}\":\n{list}\nVuelve a pedirme la tarea indicando el nombre exacto del cliente.",
                    ctx.slot_text("client_name")
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
    fn test_name_and_client_extraction() {
        let name = Regex::new(TASK_NAME_PATTERN).unwrap();
        let client = Regex::new(CLIENT_NAME_PATTERN).unwrap();
        let msg = "crear tarea Revisión de diseño para cliente Acme";
        assert_eq!(capture_text(&name, msg), Some(json!("Revisión de diseño")));
        assert_eq!(capture_text(&client, msg), Some(json!("Acme")));

        let msg = "Añade una nueva tarea llamada \"Llamar a soporte\"";
        assert_eq!(capture_text(&name, msg), Some(json!("Llamar a soporte")));
        assert_eq!(capture_text(&client, msg), None);

        assert_eq!(capture_text(&name, "crear una nueva tarea"), None);

        let msg = "crear tarea para cliente Acme";
        assert_eq!(capture_text(&name, msg), None);
        assert_eq!(capture_text(&client, msg), Some(json!("Acme")));
        assert_eq!(
            capture_text(&name, "nueva tarea para el cliente Globex"),
            None
        );
    }

    #[test]
    fn test_definition_is_valid() {
        let def = definition(&FlowSettings::default()).unwrap();
        assert_eq!(def.initial_step, "collect_task_name");
        assert!(def.config.requires_confirmation);
        assert!(def.step("client_not_found").is_some());
    }
}
