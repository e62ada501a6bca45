//! LLM 层：兜底对话的客户端抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::LlmClient;

use crate::config::LlmSection;

/// 按 [llm] 配置创建客户端：openai（或 deepseek 等兼容端点）走 OpenAiClient，其余回落到 Mock
pub fn create_llm_from_config(section: &LlmSection) -> Arc<dyn LlmClient> {
    match section.provider.as_str() {
        "openai" | "deepseek" | "compatible" => {
            tracing::info!(provider = %section.provider, model = %section.model, "Using OpenAI-compatible LLM");
            Arc::new(OpenAiClient::new(
                section.base_url.as_deref(),
                &section.model,
                None,
            ))
        }
        "mock" => Arc::new(MockLlmClient),
        other => {
            tracing::warn!(provider = %other, "Unknown LLM provider, falling back to mock");
            Arc::new(MockLlmClient)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Message;

    #[tokio::test]
    async fn test_unknown_provider_falls_back_to_mock() {
        let section = LlmSection {
            provider: "nope".to_string(),
            ..LlmSection::default()
        };
        let client = create_llm_from_config(&section);
        let reply = client.complete(&[Message::user("hola")]).await.unwrap();
        assert!(reply.contains("hola"));
    }
}
