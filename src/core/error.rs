//! 流程引擎错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 ProcessError 决定 RetryStep（重新提示当前步骤）或 Cancel（终止流程）。

use thiserror::Error;

/// 流程定义与执行过程中可能出现的错误（定义校验、工具失败、图遍历等）
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Unknown step '{step}' in process '{process}'")]
    UnknownStep { process: String, step: String },

    #[error("Invalid process definition '{process}': {reason}")]
    InvalidDefinition { process: String, reason: String },

    #[error("Invalid trigger pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("No branch matched in step '{0}'")]
    NoBranchMatched(String),

    /// 单轮推进的步数超过上限（防止非阻塞步骤组成的死循环）
    #[error("Step budget exceeded: {0}")]
    StepBudgetExceeded(usize),
}

impl ProcessError {
    pub(crate) fn invalid(process: &str, reason: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            process: process.to_string(),
            reason: reason.into(),
        }
    }

    /// 是否为可重试的外部故障（工具失败 / 超时）
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ToolExecutionFailed(_) | Self::ToolTimeout(_))
    }
}

/// 恢复引擎根据错误类型与剩余重试次数给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 停在当前步骤，向用户展示提示，下一轮重新执行
    RetryStep(String),
    /// 终止流程，向用户展示通用错误信息
    Cancel(String),
}
