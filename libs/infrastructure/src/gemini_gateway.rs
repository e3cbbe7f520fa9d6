//! # Gemini Gateway — rig 経由の補完
//!
//! Gemini 経路は内部的に非ストリーミングで、全文を 1 チャンクとして流す。
//! 主モデルが落ちた場合はフォールバックモデルへ切り替える。

use crate::retry::retry_transient;
use async_trait::async_trait;
use futures_util::StreamExt;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::gemini;
use scribe_core::contracts::{ChatRequest, ClientConfig};
use scribe_core::error::ScribeError;
use scribe_core::traits::{ChunkStream, CompletionGateway};
use tracing::{info, warn};

/// Gemini 用ゲートウェイ
pub struct GeminiGateway;

impl Default for GeminiGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl GeminiGateway {
    pub fn new() -> Self {
        Self
    }

    async fn prompt_once(
        &self,
        config: &ClientConfig,
        request: &ChatRequest,
        model: &str,
    ) -> Result<String, ScribeError> {
        let client: gemini::Client = gemini::Client::new(&config.api_key).map_err(|e| {
            ScribeError::Gateway {
                reason: format!("Failed to build Gemini client: {}", e),
            }
        })?;

        let agent = client
            .agent(model)
            .preamble(&request.system_instruction)
            .temperature(request.temperature as f64)
            .build();

        let response: String = agent
            .prompt(request.prompt.clone())
            .await
            .map_err(|e| classify_provider_error(&e.to_string()))?;

        if response.trim().is_empty() {
            return Err(ScribeError::EmptyResponse {
                model: model.to_string(),
            });
        }
        Ok(response)
    }

    async fn complete_with_fallback(
        &self,
        config: &ClientConfig,
        request: &ChatRequest,
    ) -> Result<String, ScribeError> {
        match retry_transient(|| self.prompt_once(config, request, &config.model)).await {
            Ok(text) => Ok(text),
            Err(e) => {
                if let Some(fallback) = config.fallback_model.as_deref() {
                    if fallback != config.model {
                        warn!(
                            "⚠️ [Gemini] Primary model failed, switching to fallback {}: {}",
                            fallback, e
                        );
                        return retry_transient(|| self.prompt_once(config, request, fallback))
                            .await;
                    }
                }
                Err(e)
            }
        }
    }
}

/// プロバイダのエラーメッセージ文字列をドメイン分類へ写像する
pub fn classify_provider_error(message: &str) -> ScribeError {
    let lower = message.to_lowercase();
    if lower.contains("429") || lower.contains("quota") || lower.contains("resource_exhausted") {
        ScribeError::RateLimit {
            reason: message.to_string(),
        }
    } else if lower.contains("401")
        || lower.contains("403")
        || lower.contains("api key")
        || lower.contains("unauthorized")
        || lower.contains("permission")
    {
        ScribeError::Auth {
            reason: message.to_string(),
        }
    } else if lower.contains("500") || lower.contains("503") || lower.contains("overloaded") {
        ScribeError::Server {
            status: 500,
            reason: message.to_string(),
        }
    } else if lower.contains("network") || lower.contains("connect") || lower.contains("timeout") {
        ScribeError::Network {
            reason: message.to_string(),
        }
    } else {
        ScribeError::Gateway {
            reason: message.to_string(),
        }
    }
}

#[async_trait]
impl CompletionGateway for GeminiGateway {
    async fn stream_chat(
        &self,
        config: &ClientConfig,
        request: ChatRequest,
    ) -> Result<ChunkStream, ScribeError> {
        info!("📡 [Gemini] Prompting model {} (single-chunk delivery)", config.model);
        let text = self.complete_with_fallback(config, &request).await?;
        Ok(futures_util::stream::once(async move { Ok(text) }).boxed())
    }

    async fn complete(
        &self,
        config: &ClientConfig,
        request: ChatRequest,
    ) -> Result<String, ScribeError> {
        self.complete_with_fallback(config, &request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_provider_error() {
        assert!(matches!(
            classify_provider_error("HTTP 429: quota exceeded"),
            ScribeError::RateLimit { .. }
        ));
        assert!(matches!(
            classify_provider_error("API key not valid"),
            ScribeError::Auth { .. }
        ));
        assert!(matches!(
            classify_provider_error("model is overloaded"),
            ScribeError::Server { .. }
        ));
        assert!(matches!(
            classify_provider_error("connection refused"),
            ScribeError::Network { .. }
        ));
        assert!(matches!(
            classify_provider_error("unexpected schema"),
            ScribeError::Gateway { .. }
        ));
    }
}
