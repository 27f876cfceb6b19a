/// Ollama HTTP 客户端
///
/// 封装 `/api/tags` 与 `/api/generate` 两个接口
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{GenerateRequest, TextGenerator};
use crate::config::Config;
use crate::error::LlmError;

/// Ollama 客户端
pub struct OllamaClient {
    client: Client,
    base_url: String,
    health_timeout: Duration,
}

/// `/api/tags` 响应体
#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    #[serde(default)]
    name: String,
}

/// `/api/generate` 响应体
#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

impl OllamaClient {
    /// 创建新的客户端
    ///
    /// 生成请求的超时由调用方控制，这里只设置连接超时
    pub fn new(base_url: &str, health_timeout: Duration) -> Result<Self, LlmError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let client = Client::builder()
            .connect_timeout(health_timeout)
            .build()
            .map_err(|e| LlmError::transport(&base_url, &e))?;

        Ok(Self {
            client,
            base_url,
            health_timeout,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, LlmError> {
        Self::new(&config.ollama_url, config.health_timeout())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl TextGenerator for OllamaClient {
    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let url = self.endpoint("/api/tags");
        let response = self
            .client
            .get(&url)
            .timeout(self.health_timeout)
            .send()
            .await
            .map_err(|e| LlmError::ServiceUnavailable {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::ServiceUnavailable {
                url,
                reason: format!("HTTP {}", status.as_u16()),
            });
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidBody(e.to_string()))?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<String, LlmError> {
        let url = self.endpoint("/api/generate");
        debug!(
            "调用生成接口，模型: {}，提示词长度: {} 字符，温度: {:.2}",
            request.model,
            request.prompt.len(),
            request.temperature
        );

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| LlmError::transport(&url, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::BadStatus {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidBody(e.to_string()))?;

        Ok(parsed.response)
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}
