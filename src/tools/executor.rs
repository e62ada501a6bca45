//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时，execute(tool_name, args) 在超时内调用工具，
//! 成功时把结果归一化为 ToolOutput，超时或失败时转为 ProcessError；每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::core::ProcessError;
use crate::tools::{ToolOutput, ToolRegistry};

/// 工具执行器：对每次调用施加超时，并将结果映射为 ProcessError
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// 执行指定工具；未注册返回 UnknownTool，超时返回 ToolTimeout，工具返回 Err 则转为 ToolExecutionFailed
    pub async fn execute(&self, tool_name: &str, args: Value) -> Result<ToolOutput, ProcessError> {
        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| ProcessError::UnknownTool(tool_name.to_string()))?;

        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(self.timeout, tool.execute(args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(raw)) => Ok(ToolOutput::normalize(raw)),
            Ok(Err(e)) => Err(ProcessError::ToolExecutionFailed(e)),
            Err(_) => Err(ProcessError::ToolTimeout(tool_name.to_string())),
        }
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use serde_json::json;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "sleeps"
        }

        async fn execute(&self, _args: Value) -> Result<Value, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "broken"
        }

        fn description(&self) -> &str {
            "always fails"
        }

        async fn execute(&self, _args: Value) -> Result<Value, String> {
            Err("backend unavailable".to_string())
        }
    }

    struct WrappedTool;

    #[async_trait]
    impl Tool for WrappedTool {
        fn name(&self) -> &str {
            "wrapped"
        }

        fn description(&self) -> &str {
            "returns wrapped list"
        }

        async fn execute(&self, _args: Value) -> Result<Value, String> {
            Ok(json!({"tasks": [{"id": "t1"}]}))
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool);
        registry.register(FailingTool);
        registry.register(WrappedTool);
        ToolExecutor {
            registry,
            timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let err = executor().execute("nope", json!({})).await.unwrap_err();
        assert!(matches!(err, ProcessError::UnknownTool(name) if name == "nope"));
    }

    #[tokio::test]
    async fn test_timeout_maps_to_tool_timeout() {
        let err = executor().execute("slow", json!({})).await.unwrap_err();
        assert!(matches!(err, ProcessError::ToolTimeout(_)));
    }

    #[tokio::test]
    async fn test_failure_and_normalized_success() {
        let exec = executor();
        let err = exec.execute("broken", json!({})).await.unwrap_err();
        assert!(matches!(err, ProcessError::ToolExecutionFailed(_)));

        let out = exec.execute("wrapped", json!({})).await.unwrap();
        assert_eq!(out.first_id().as_deref(), Some("t1"));
    }
}
