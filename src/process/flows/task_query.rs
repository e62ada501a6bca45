//! 任务查询流程
//!
//! 只从消息文本推断筛选条件（活跃 / 优先级 / 客户 / 数量），不追问用户；
//! 管理员可查看团队负载。

use regex::Regex;
use serde_json::{json, Map, Value};

use crate::core::ProcessError;
use crate::process::context::ProcessContext;
use crate::process::flows::common::{capture_text, priority_emoji, sniff_priority, status_label};
use crate::process::flows::{FlowSettings, NOT_AUTHORIZED};
use crate::process::extract::normalize;
use crate::process::types::*;
use crate::process::ProcessBuilder;

pub const PROCESS_ID: &str = "task-query";

/// 查询结果为空时的固定回复
pub const NO_TASKS_FOUND: &str = "No encontré tareas que coincidan con tu búsqueda.";

const DEFAULT_LIMIT: u64 = 20;

const CLIENT_FILTER_PATTERN: &str = r"(?i)(?:del|de|para)\s+(?:el\s+)?cliente\s+(.+?)\s*$";
const LIMIT_PATTERN: &str = r"(?i)\b(?:primeras|últimas|ultimas|top)\s+(\d{1,3})\b";

/// 消息中的筛选条件
fn detect_filters(message: &str, client_re: &Regex, limit_re: &Regex) -> SlotMap {
    let text = normalize(message);
    let mut found = SlotMap::new();
    if ["activas", "activos", "pendientes", "en progreso", "abiertas"]
        .iter()
        .any(|k| text.contains(k))
    {
        found.insert("only_active".to_string(), json!(true));
    }
    if ["carga de trabajo", "workload", "carga del equipo"]
        .iter()
        .any(|k| text.contains(k))
    {
        found.insert("workload".to_string(), json!(true));
    }
    if let Some(priority) = sniff_priority(message) {
        found.insert("priority".to_string(), json!(priority));
    }
    if let Some(client) = capture_text(client_re, message) {
        found.insert("client_name".to_string(), client);
    }
    if let Some(limit) = limit_re
        .captures(message)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .filter(|n| *n > 0)
    {
        found.insert("limit".to_string(), json!(limit));
    }
    found
}

/// search_tasks 参数：onlyActive 与 limit 总是存在，其余只在识别到时加入
fn search_args(ctx: &ProcessContext) -> Value {
    let mut args = Map::new();
    args.insert("onlyActive".to_string(), json!(ctx.slot_bool("only_active")));
    args.insert(
        "limit".to_string(),
        ctx.slot("limit").cloned().unwrap_or_else(|| json!(DEFAULT_LIMIT)),
    );
    if let Some(priority) = ctx.slot_str("priority") {
        args.insert("priority".to_string(), json!(priority));
    }
    if let Some(client) = ctx.slot_str("client_name") {
        args.insert("clientName".to_string(), json!(client));
    }
    Value::Object(args)
}

fn format_task_list(ctx: &ProcessContext) -> String {
    let Some(output) = ctx.tool_output("search_tasks") else {
        return NO_TASKS_FOUND.to_string();
    };
    let header = if ctx.slot_bool("only_active") {
        format!("Tienes {} tareas activas:", output.len())
    } else {
        format!("Encontré {} tareas:", output.len())
    };
    let lines: Vec<String> = output
        .items
        .iter()
        .enumerate()
        .map(|(i, task)| {
            let title = task.get("title").and_then(Value::as_str).unwrap_or("(sin título)");
            let priority = task.get("priority").and_then(Value::as_str).unwrap_or_default();
            let mut line = format!("{}. {} {title}", i + 1, priority_emoji(priority));
            if let Some(client) = task.get("clientName").and_then(Value::as_str) {
                line.push_str(&format!(" · {client}"));
            }
            if let Some(status) = task.get("status").and_then(Value::as_str) {
                line.push_str(&format!(" · {}", status_label(status)));
            }
            line
        })
        .collect();
    format!("{header}\n{}", lines.join("\n"))
}

fn format_workload(ctx: &ProcessContext) -> String {
    let Some(output) = ctx.tool_output("get_team_workload").filter(|o| !o.is_empty()) else {
        return "No hay miembros en el equipo todavía.".to_string();
    };
    let lines: Vec<String> = output
        .items
        .iter()
        .map(|member| {
            let name = member.get("name").and_then(Value::as_str).unwrap_or("(sin nombre)");
            let active = member.get("activeTasks").and_then(Value::as_u64).unwrap_or(0);
            let done = member.get("completedTasks").and_then(Value::as_u64).unwrap_or(0);
            format!("• {name}: {active} activas, {done} completadas")
        })
        .collect();
    format!("Carga de trabajo del equipo:\n{}", lines.join("\n"))
}

pub fn definition(settings: &FlowSettings) -> Result<ProcessDefinition, ProcessError> {
    let client_re = Regex::new(CLIENT_FILTER_PATTERN)?;
    let limit_re = Regex::new(LIMIT_PATTERN)?;

    ProcessBuilder::new(PROCESS_ID, "Consultar tareas")
        .description("Lista tareas con filtros deducidos del mensaje")
        .pattern_trigger(
            &[
                r"\btareas\s+(activas|pendientes|abiertas|en progreso)\b",
                r"\b(mostrar|muestra|muéstrame|ver|listar|lista|consultar)\s+(mis\s+|las\s+)?tareas\b",
                r"\b(carga de trabajo|workload)\b",
            ],
            10,
        )
        .keyword_trigger(&["mis tareas", "qué tareas", "que tareas", "list tasks"], 7)
        .intent_trigger(&["task_list"], 5)
        .slot(SlotDefinition::boolean("only_active").default_value(json!(false)))
        .slot(SlotDefinition::number("limit").default_value(json!(DEFAULT_LIMIT)))
        .slot(SlotDefinition::string("priority").allowed(&["high", "medium", "low"]))
        .slot(SlotDefinition::string("client_name"))
        .slot(SlotDefinition::boolean("workload").default_value(json!(false)))
        .step(
            StepDefinition::collect(
                "detect_filters",
                &["only_active", "limit", "priority", "client_name", "workload"],
            )
            .on_enter(move |msg, _ctx| detect_filters(msg, &client_re, &limit_re))
            .then("route_query"),
        )
        .step(StepDefinition::branch(
            "route_query",
            vec![
                Branch::when(
                    |ctx| ctx.slot_bool("workload") && ctx.user_context.is_admin,
                    "get_workload",
                ),
                Branch::when(|ctx| ctx.slot_bool("workload"), "not_authorized"),
                Branch::otherwise("search_tasks"),
            ],
        ))
        .step(
            StepDefinition::execute("search_tasks", "search_tasks", ToolArgs::dynamic(search_args))
                .then("check_results"),
        )
        .step(StepDefinition::branch(
            "check_results",
            vec![
                Branch::when(
                    |ctx| ctx.tool_output("search_tasks").map_or(true, |o| o.is_empty()),
                    "no_tasks",
                ),
                Branch::otherwise("list_tasks"),
            ],
        ))
        .step(StepDefinition::respond("no_tasks", Text::from(NO_TASKS_FOUND)))
        .step(StepDefinition::respond("list_tasks", Text::dynamic(format_task_list)))
        .step(
            StepDefinition::execute("get_workload", "get_team_workload", ToolArgs::Static(json!({})))
                .then("list_workload"),
        )
        .step(StepDefinition::respond("list_workload", Text::dynamic(format_workload)))
        .step(StepDefinition::respond("not_authorized", Text::from(NOT_AUTHORIZED)))
        .max_retries(settings.max_retries)
        .timeout_ms(settings.timeout_ms)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filters(message: &str) -> SlotMap {
        detect_filters(
            message,
            &Regex::new(CLIENT_FILTER_PATTERN).unwrap(),
            &Regex::new(LIMIT_PATTERN).unwrap(),
        )
    }

    #[test]
    fn test_active_filter_from_text() {
        let found = filters("tareas activas");
        assert_eq!(found.get("only_active"), Some(&json!(true)));
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_priority_client_and_limit() {
        let found = filters("muéstrame las primeras 5 tareas urgentes del cliente Acme");
        assert_eq!(found.get("priority"), Some(&json!("high")));
        assert_eq!(found.get("client_name"), Some(&json!("Acme")));
        assert_eq!(found.get("limit"), Some(&json!(5)));
        assert!(!found.contains_key("only_active"));
    }

    #[test]
    fn test_workload_request() {
        let found = filters("¿Cómo va la carga de trabajo?");
        assert_eq!(found.get("workload"), Some(&json!(true)));
    }

    #[test]
    fn test_definition_is_valid() {
        let def = definition(&FlowSettings::default()).unwrap();
        assert!(!def.config.requires_confirmation);
        assert_eq!(def.initial_step, "detect_filters");
    }
}
