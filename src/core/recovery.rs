//! 错误恢复引擎
//!
//! 根据 ProcessError 类型与剩余重试预算返回 RecoveryAction；
//! 面向用户的文案始终是通用模板，底层错误细节只写日志。

use crate::core::{ProcessError, RecoveryAction};

/// 工具失败且仍有重试额度时的提示
pub const RETRY_PROMPT: &str =
    "Tuve un problema al completar la operación. ¿Quieres que lo intente de nuevo?";

/// 重试耗尽或内部错误时的通用回复
pub const GENERIC_FAILURE: &str =
    "Lo siento, no pude completar la operación en este momento. Inténtalo de nuevo más tarde.";

/// 语义化错误恢复：将错误映射为「重试当前步骤」或「取消流程」
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// failures 为当前步骤已连续失败的次数（含本次），max_retries 为流程配置的上限
    pub fn handle(&self, err: &ProcessError, failures: u32, max_retries: u32) -> RecoveryAction {
        if err.is_transient() && failures < max_retries {
            return RecoveryAction::RetryStep(RETRY_PROMPT.to_string());
        }
        RecoveryAction::Cancel(GENERIC_FAILURE.to_string())
    }
}
