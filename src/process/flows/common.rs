//! 流程共用的抽取、格式化与实体解析辅助

use regex::Regex;
use serde_json::{json, Value};

use crate::process::context::ProcessContext;
use crate::process::extract::normalize;
use crate::process::types::{Branch, StepDefinition, Text, ToolArgs};
use crate::tools::{value_id, value_label, ToolOutput};

/// 按名称查找实体时最多取回的候选数
pub const LOOKUP_LIMIT: u64 = 5;

/// 用正则第一个捕获组抽取文本，去掉首尾引号
pub fn capture_text(re: &Regex, message: &str) -> Option<Value> {
    re.captures(message.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| {
            m.as_str()
                .trim()
                .trim_matches(|c: char| matches!(c, '"' | '\'' | '«' | '»' | '“' | '”'))
                .trim()
                .to_string()
        })
        .filter(|s| !s.is_empty())
        .map(Value::String)
}

fn contains_any(text: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| text.contains(p))
}

/// 从自由文本中嗅探优先级
pub fn sniff_priority(message: &str) -> Option<&'static str> {
    let text = normalize(message);
    if contains_any(&text, &["urgente", "prioridad alta", "alta prioridad", "high priority"]) {
        Some("high")
    } else if contains_any(&text, &["prioridad media", "prioridad normal", "medium priority"]) {
        Some("medium")
    } else if contains_any(&text, &["prioridad baja", "baja prioridad", "sin prisa", "low priority"]) {
        Some("low")
    } else {
        None
    }
}

/// 从自由文本中嗅探目标状态
pub fn sniff_status(message: &str) -> Option<&'static str> {
    let text = normalize(message);
    if contains_any(
        &text,
        &["completada", "completado", "terminada", "terminado", "hecha", "finalizada", "done"],
    ) {
        Some("completed")
    } else if contains_any(&text, &["en progreso", "en curso", "empezada", "iniciada", "in progress"]) {
        Some("in_progress")
    } else if contains_any(&text, &["pendiente", "por hacer", "reabrir", "reabre"]) {
        Some("pending")
    } else {
        None
    }
}

pub fn priority_label(priority: &str) -> &'static str {
    match priority {
        "high" => "Alta",
        "medium" => "Media",
        "low" => "Baja",
        _ => "Sin prioridad",
    }
}

pub fn priority_emoji(priority: &str) -> &'static str {
    match priority {
        "high" => "🔴",
        "medium" => "🟡",
        "low" => "🟢",
        _ => "⚪",
    }
}

pub fn status_label(status: &str) -> &'static str {
    match status {
        "pending" => "Pendiente",
        "in_progress" => "En progreso",
        "completed" => "Completada",
        _ => "Desconocido",
    }
}

/// 名称完全一致（忽略大小写）的候选；没有时若只有一个候选则取它
pub fn pick_match<'a>(output: &'a ToolOutput, query: &str) -> Option<&'a Value> {
    let wanted = query.trim().to_lowercase();
    output
        .items
        .iter()
        .find(|item| value_label(item).is_some_and(|label| label.trim().to_lowercase() == wanted))
        .or_else(|| if output.len() == 1 { output.first() } else { None })
}

/// 分支条件：把唯一匹配的实体写入 id_slot / label_slot；重复求值结果相同
pub fn resolve_single(
    ctx: &mut ProcessContext,
    tool: &str,
    query_slot: &str,
    id_slot: &str,
    label_slot: &str,
) -> bool {
    let query = ctx.slot_text(query_slot);
    let Some(item) = ctx
        .tool_output(tool)
        .and_then(|output| pick_match(output, &query))
        .cloned()
    else {
        return false;
    };
    let Some(id) = value_id(&item) else {
        return false;
    };
    ctx.set_slot(id_slot, id);
    if let Some(label) = value_label(&item) {
        ctx.set_slot(label_slot, label);
    }
    true
}

pub fn no_results(ctx: &ProcessContext, tool: &str) -> bool {
    ctx.tool_output(tool).map_or(true, ToolOutput::is_empty)
}

/// 编号候选列表：「1. 名称 (附加信息)」
pub fn numbered_labels(items: &[Value], detail_key: Option<&str>) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let label = value_label(item).unwrap_or_else(|| "(sin nombre)".to_string());
            match detail_key.and_then(|key| item.get(key)).and_then(Value::as_str) {
                Some(detail) => format!("{}. {label} ({detail})", i + 1),
                None => format!("{}. {label}", i + 1),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// 按名称定位一个任务：search_task -> resolve_task，找到后进入 found_step；
/// 未找到或有多个候选时给出说明并结束流程。
pub fn task_lookup_steps(found_step: &str) -> Vec<StepDefinition> {
    vec![
        StepDefinition::execute(
            "search_task",
            "search_tasks",
            ToolArgs::dynamic(|ctx| json!({ "query": ctx.slot_text("task_name"), "limit": LOOKUP_LIMIT })),
        )
        .then("resolve_task"),
        StepDefinition::branch(
            "resolve_task",
            vec![
                Branch::when(
                    |ctx| resolve_single(ctx, "search_tasks", "task_name", "task_id", "task_title"),
                    found_step,
                ),
                Branch::when(|ctx| no_results(ctx, "search_tasks"), "task_not_found"),
                Branch::otherwise("task_ambiguous"),
            ],
        ),
        StepDefinition::respond(
            "task_not_found",
            Text::dynamic(|ctx| {
                format!(
                    "No encontré ninguna tarea que coincida con \"{}\".",
                    ctx.slot_text("task_name")
                )
            }),
        ),
        StepDefinition::respond(
            "task_ambiguous",
            Text::dynamic(|ctx| {
                let list = ctx
                    .tool_output("search_tasks")
                    .map(|output| numbered_labels(&output.items, Some("clientName")))
                    .unwrap_or_default();
                format!(
                    "Encontré varias tareas que coinciden con \"{}\":\n{list}\nIndica el nombre exacto de la tarea para continuar.",
                    ctx.slot_text("task_name")
                )
            }),
        ),
    ]
}
