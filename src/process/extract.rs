//! 槽位抽取与回答识别
//!
//! - SlotExtractor：步骤 on_enter 使用的「消息 -> 部分槽位」抽取接口，可独立单测
//! - 是 / 否 / 取消 识别（容忍重音与标点）
//! - 槽位值类型转换与校验，校验失败给出可直接展示的纠正提示

use serde_json::Value;

use crate::process::context::ProcessContext;
use crate::process::types::{SlotDefinition, SlotMap, SlotType, SlotValidation};

/// 从消息中抽取部分槽位；只返回识别到的键
pub trait SlotExtractor: Send + Sync {
    fn extract(&self, message: &str, context: &ProcessContext) -> SlotMap;
}

impl<F> SlotExtractor for F
where
    F: Fn(&str, &ProcessContext) -> SlotMap + Send + Sync,
{
    fn extract(&self, message: &str, context: &ProcessContext) -> SlotMap {
        self(message, context)
    }
}

const AFFIRMATIVE: [&str; 16] = [
    "si", "s", "yes", "y", "ok", "okay", "dale", "claro", "confirmo", "confirmar", "correcto",
    "adelante", "hazlo", "vale", "de acuerdo", "por supuesto",
];

const CANCEL: [&str; 8] = [
    "cancelar", "cancela", "cancel", "olvidalo", "mejor no", "detente", "salir", "stop",
];

const NEGATIVE: [&str; 4] = ["no", "n", "nop", "nope"];

/// 小写、去重音、去标点，合并空白
pub fn normalize(text: &str) -> String {
    let folded: String = text
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' => 'a',
            'é' | 'è' | 'ë' => 'e',
            'í' | 'ì' | 'ï' => 'i',
            'ó' | 'ò' | 'ö' => 'o',
            'ú' | 'ù' | 'ü' => 'u',
            c if c.is_alphanumeric() || c.is_whitespace() => c,
            _ => ' ',
        })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 分句标点：首个分句之前的部分才参与「开头」匹配
const CLAUSE_BREAKS: [char; 8] = [',', '.', '!', '?', ';', ':', '¡', '¿'];

/// 第一个分句（已规范化），忽略开头的标点
fn leading_clause(text: &str) -> String {
    let trimmed = text.trim_start_matches(|c: char| !c.is_alphanumeric());
    let end = trimmed.find(&CLAUSE_BREAKS[..]).unwrap_or(trimmed.len());
    normalize(&trimmed[..end])
}

/// 分句等于词表项；长度超过 short_max 的词表项也可以作为开头（后接空格）
fn opens_with(clause: &str, vocabulary: &[&str], short_max: usize) -> bool {
    vocabulary.iter().any(|word| {
        clause == *word
            || (word.len() > short_max
                && clause
                    .strip_prefix(word)
                    .is_some_and(|rest| rest.starts_with(' ')))
    })
}

/// 整句任意位置出现否定词或取消短语（按整词匹配）
fn mentions_refusal(text: &str) -> bool {
    let padded = format!(" {} ", normalize(text));
    NEGATIVE
        .iter()
        .chain(CANCEL.iter())
        .any(|word| padded.contains(&format!(" {word} ")))
}

/// 肯定回答：首个分句以肯定词开头，且整句没有任何否定 / 取消字眼。
/// si / s / y / ok 这类短词只能独立成句（「sí, por favor」可以，「y si mejor...」不行）
pub fn is_affirmative(text: &str) -> bool {
    opens_with(&leading_clause(text), &AFFIRMATIVE, 2) && !mentions_refusal(text)
}

/// 显式取消：整条回复就是一个取消短语。
/// 「Cancelar suscripción de Adobe」这类以取消词开头的内容不算，单独的「no」也不算。
pub fn is_cancel(text: &str) -> bool {
    let norm = normalize(text);
    CANCEL.iter().any(|word| norm == *word)
}

/// 否定或取消（用于确认 / 重试这类只等是非回答的场合）
pub fn is_negative(text: &str) -> bool {
    let clause = leading_clause(text);
    opens_with(&clause, &NEGATIVE, 1) || opens_with(&clause, &CANCEL, 1)
}

/// 把原始值转换为槽位声明的类型
pub fn coerce(slot: &SlotDefinition, raw: Value) -> Result<Value, String> {
    match (slot.slot_type, raw) {
        (_, Value::Null) => Err("Necesito un valor.".to_string()),
        (SlotType::String | SlotType::Reference, Value::String(s)) => {
            let s = s.trim().trim_matches(|c: char| c == '"' || c == '\'').trim();
            if s.is_empty() {
                Err("Necesito un valor.".to_string())
            } else {
                Ok(Value::String(s.to_string()))
            }
        }
        (SlotType::String | SlotType::Reference, Value::Number(n)) => Ok(Value::String(n.to_string())),
        (SlotType::Number, Value::Number(n)) => Ok(Value::Number(n)),
        (SlotType::Number, Value::String(s)) => {
            let cleaned = s.trim().replace(',', ".");
            if let Ok(i) = cleaned.parse::<i64>() {
                Ok(Value::from(i))
            } else {
                cleaned
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| "Debe ser un número.".to_string())
            }
        }
        (SlotType::Boolean, Value::Bool(b)) => Ok(Value::Bool(b)),
        (SlotType::Boolean, Value::String(s)) => {
            if is_affirmative(&s) {
                Ok(Value::Bool(true))
            } else if is_negative(&s) {
                Ok(Value::Bool(false))
            } else {
                Err("Responde sí o no.".to_string())
            }
        }
        (_, other) => Err(format!("Valor no válido: {other}")),
    }
}

/// 校验已转换的值；有候选列表时返回声明里的写法
pub fn validate(validation: &SlotValidation, value: Value) -> Result<Value, String> {
    let Some(text) = value.as_str() else {
        return Ok(value);
    };
    let len = text.chars().count();
    if let Some(min) = validation.min_length {
        if len < min {
            return Err(format!("El valor debe tener al menos {min} caracteres."));
        }
    }
    if let Some(max) = validation.max_length {
        if len > max {
            return Err(format!("El valor debe tener como máximo {max} caracteres."));
        }
    }
    if let Some(allowed) = &validation.allowed {
        return allowed
            .iter()
            .find(|a| a.eq_ignore_ascii_case(text))
            .map(|a| Value::String(a.clone()))
            .ok_or_else(|| format!("El valor debe ser uno de: {}.", allowed.join(", ")));
    }
    Ok(value)
}

/// 转换 + 校验
pub fn accept(slot: &SlotDefinition, raw: Value) -> Result<Value, String> {
    let value = coerce(slot, raw)?;
    match &slot.validation {
        Some(validation) => validate(validation, value),
        None => Ok(value),
    }
}
