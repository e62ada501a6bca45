//! Mock LLM 客户端（用于本地运行与测试，无需 API）

use async_trait::async_trait;

use crate::llm::LlmClient;
use crate::memory::{Message, Role};

/// Mock 客户端：对最后一条用户消息给出固定格式的回复
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(sin mensaje)");

        Ok(format!(
            "Puedo ayudarte a crear, consultar, actualizar o archivar tareas. (Recibido: {})",
            last_user
        ))
    }
}

/// 总是失败的客户端，用于测试兜底路径的错误处理
#[cfg(test)]
#[derive(Debug, Default)]
pub struct FailingLlmClient;

#[cfg(test)]
#[async_trait]
impl LlmClient for FailingLlmClient {
    async fn complete(&self, _messages: &[Message]) -> Result<String, String> {
        Err("connection refused".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_uses_last_user_message() {
        let client = MockLlmClient;
        let reply = client
            .complete(&[
                Message::system("sys"),
                Message::user("primero"),
                Message::assistant("ok"),
                Message::user("hola"),
            ])
            .await
            .unwrap();
        assert!(reply.contains("hola"));
        assert_eq!(client.token_usage(), (0, 0, 0));
    }
}
