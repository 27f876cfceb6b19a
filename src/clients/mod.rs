pub mod ollama_client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

pub use ollama_client::OllamaClient;

/// `/api/generate` 请求体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    pub temperature: f64,
    pub max_output_tokens: u32,
    pub options: GenerateOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateOptions {
    pub num_predict: u32,
}

/// 文本生成服务的传输层接口
///
/// 生产环境由 `OllamaClient` 实现，测试中用内存实现替代
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// 列出服务端可用的模型名称
    async fn list_models(&self) -> Result<Vec<String>, LlmError>;

    /// 发送一次生成请求，返回 `response` 字段的原始文本
    async fn generate(&self, request: &GenerateRequest) -> Result<String, LlmError>;

    /// 服务地址（仅用于日志和错误信息）
    fn base_url(&self) -> &str;
}
