//! 生成服务 - 业务能力层
//!
//! 只负责"为一条记录生成一组问答"这一次往返：
//! 健康检查、构建请求、超时、指数退避重试、解析单条结果

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::clients::{GenerateOptions, GenerateRequest, TextGenerator};
use crate::config::Config;
use crate::error::LlmError;
use crate::models::GenerationResult;
use crate::services::response_parser::ResponseParser;

const PROMPT_TEMPLATE: &str = r#"
You are an expert scholar of Sanskrit literature, Ayurveda, and classical Indian knowledge traditions, fluent in English, Hindi (Devanagari), and Sanskrit (Devanagari).

Use ONLY the meaning contained in the provided shloka and its translation.
However, your questions MUST NOT indicate, suggest, or imply that the information comes from a verse, text, passage, or scripture.

Your questions must be:
- Fully standalone and natural
- Written as general knowledge or conceptual questions
- Using names/events directly, without referencing any verse/source
- Based only on the meaning conveyed
- NOT translations of each other across languages

Shloka (Sanskrit):
{source}

Translation (English):
{translation}

Task:
Generate a single, distinct question-answer pair for each language:
- English (q_en / a_en)
- Hindi in Devanagari (q_hi / a_hi)
- Sanskrit in Devanagari (q_sa / a_sa)

Rules:
- The answer must be concise (1-3 sentences) and based ONLY on the provided information.
- No external stories or commentary.

Return ONLY valid JSON with this exact structure and no other text:

{
  "q_en": ["question"],
  "a_en": ["answer"],
  "q_hi": ["प्रश्न"],
  "a_hi": ["उत्तर"],
  "q_sa": ["प्रश्न"],
  "a_sa": ["उत्तर"]
}
"#;

/// 温度随机范围，为并发的多次尝试增加差异
const TEMPERATURE_MIN: f64 = 0.1;
const TEMPERATURE_MAX: f64 = 0.5;

/// 构建单条问答的提示词
pub fn build_prompt(source: &str, translation: &str) -> String {
    PROMPT_TEMPLATE
        .replace("{source}", source.trim())
        .replace("{translation}", translation.trim())
}

/// 生成服务的重试与输出参数
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub model: String,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub timeout: Duration,
    pub max_output_tokens: u32,
}

impl GenerationSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.model_name.clone(),
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff(),
            timeout: config.gen_timeout(),
            max_output_tokens: config.max_output_tokens,
        }
    }
}

/// 生成服务
///
/// 职责：
/// - 在会话中第一次使用前检查服务和模型是否可用
/// - 发送单次生成请求并在失败时退避重试
/// - 只处理单条记录的单次尝试，不关心并发和批次
pub struct GenerationService {
    client: Arc<dyn TextGenerator>,
    settings: GenerationSettings,
    healthy: AtomicBool,
}

impl GenerationService {
    pub fn new(client: Arc<dyn TextGenerator>, settings: GenerationSettings) -> Self {
        Self {
            client,
            settings,
            healthy: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    /// 检查服务是否可达、目标模型是否存在
    ///
    /// 成功结果在服务生命周期内缓存，失败不缓存
    pub async fn ensure_healthy(&self) -> Result<(), LlmError> {
        if self.healthy.load(Ordering::Acquire) {
            return Ok(());
        }

        info!("🩺 检查生成服务: {}", self.client.base_url());
        let models = self.client.list_models().await.map_err(|e| match e {
            LlmError::ServiceUnavailable { .. } => e,
            other => LlmError::ServiceUnavailable {
                url: self.client.base_url().to_string(),
                reason: other.to_string(),
            },
        })?;
        debug!("可用模型: {}", models.join(", "));

        let target = &self.settings.model;
        if !models.iter().any(|name| name.contains(target.as_str())) {
            return Err(LlmError::ModelNotFound {
                model: target.clone(),
                available: models,
            });
        }

        info!("✓ 模型 {} 可用", target);
        self.healthy.store(true, Ordering::Release);
        Ok(())
    }

    /// 生成单条问答（每个键恰好 1 项）
    ///
    /// 请求、状态码、解析任一环节失败都会重试，耗尽后返回最后一次的错误
    pub async fn attempt(
        &self,
        source: &str,
        translation: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<GenerationResult, LlmError> {
        let prompt = build_prompt(source, translation);
        let max_retries = self.settings.max_retries.max(1);
        let mut last_err = None;

        for attempt in 1..=max_retries {
            let request = self.build_request(model, &prompt);
            match self.round_trip(&request, timeout).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    warn!("单次生成第 {}/{} 次尝试失败: {}", attempt, max_retries, e);
                    last_err = Some(e);
                    if attempt < max_retries {
                        tokio::time::sleep(backoff_delay(self.settings.retry_backoff, attempt)).await;
                    }
                }
            }
        }

        Err(last_err.unwrap_or(LlmError::InvalidBody("没有进行任何尝试".to_string())))
    }

    fn build_request(&self, model: &str, prompt: &str) -> GenerateRequest {
        let temperature = rand::thread_rng().gen_range(TEMPERATURE_MIN..TEMPERATURE_MAX);
        GenerateRequest {
            model: model.to_string(),
            prompt: prompt.to_string(),
            stream: false,
            temperature,
            max_output_tokens: self.settings.max_output_tokens,
            options: GenerateOptions {
                num_predict: self.settings.max_output_tokens,
            },
        }
    }

    async fn round_trip(
        &self,
        request: &GenerateRequest,
        timeout: Duration,
    ) -> Result<GenerationResult, LlmError> {
        let text = tokio::time::timeout(timeout, self.client.generate(request))
            .await
            .map_err(|_| LlmError::Timeout {
                secs: timeout.as_secs_f64(),
            })??;
        Ok(ResponseParser::parse(&text, 1)?)
    }
}

/// 第 `attempt` 次失败后的等待时间：`base * 2^(attempt-1)`
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::QaKey;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio_test::{assert_err, assert_ok};

    pub(crate) const SINGLE: &str = r#"{"q_en": ["Who?"], "a_en": ["Rama."], "q_hi": ["कौन?"], "a_hi": ["राम।"], "q_sa": ["कः?"], "a_sa": ["रामः।"]}"#;

    /// 按顺序返回预设响应的内存生成器
    pub(crate) struct ScriptedGenerator {
        pub models: Vec<String>,
        pub responses: Mutex<VecDeque<Result<String, LlmError>>>,
        pub requests: Mutex<Vec<GenerateRequest>>,
        pub list_calls: AtomicUsize,
    }

    impl ScriptedGenerator {
        pub(crate) fn new(responses: Vec<Result<String, LlmError>>) -> Self {
            Self {
                models: vec!["gpt-oss:120b".to_string()],
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
                list_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn list_models(&self) -> Result<Vec<String>, LlmError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.models.clone())
        }

        async fn generate(&self, request: &GenerateRequest) -> Result<String, LlmError> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::InvalidBody("没有更多预设响应".into())))
        }

        fn base_url(&self) -> &str {
            "mock://scripted"
        }
    }

    pub(crate) fn fast_settings() -> GenerationSettings {
        GenerationSettings {
            model: "gpt-oss".to_string(),
            max_retries: 3,
            retry_backoff: Duration::from_millis(1),
            timeout: Duration::from_millis(200),
            max_output_tokens: 4096,
        }
    }

    fn service_with(generator: Arc<ScriptedGenerator>) -> GenerationService {
        GenerationService::new(generator, fast_settings())
    }

    #[test]
    fn test_backoff_doubles() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(4));
    }

    #[test]
    fn test_prompt_interpolates_trimmed_texts() {
        let prompt = build_prompt("  धर्मो रक्षति रक्षितः \n", " Dharma protects. ");
        assert!(prompt.contains("Shloka (Sanskrit):\nधर्मो रक्षति रक्षितः\n"));
        assert!(prompt.contains("Translation (English):\nDharma protects.\n"));
        assert!(prompt.contains(r#""q_en": ["question"]"#));
    }

    #[tokio::test]
    async fn test_attempt_retries_until_success() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Err(LlmError::BadStatus {
                status: 500,
                body: "boom".into(),
            }),
            Ok("not json at all".into()),
            Ok(SINGLE.into()),
        ]));
        let service = service_with(generator.clone());

        let result = assert_ok!(
            service
                .attempt("src", "tr", "gpt-oss", Duration::from_millis(200))
                .await
        );

        assert_eq!(result.get(QaKey::ALL[0]), ["Who?"]);
        let requests = generator.requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        for request in requests.iter() {
            assert!(!request.stream);
            assert!((TEMPERATURE_MIN..TEMPERATURE_MAX).contains(&request.temperature));
            assert_eq!(request.options.num_predict, 4096);
        }
    }

    #[tokio::test]
    async fn test_attempt_returns_last_error_when_exhausted() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Ok("garbage".into()),
            Ok("garbage".into()),
            Err(LlmError::BadStatus {
                status: 503,
                body: "busy".into(),
            }),
        ]));
        let service = service_with(generator.clone());

        let err = assert_err!(
            service
                .attempt("src", "tr", "gpt-oss", Duration::from_millis(200))
                .await
        );
        assert!(matches!(err, LlmError::BadStatus { status: 503, .. }));
        assert_eq!(generator.requests.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_health_check_cached_after_success() {
        let generator = Arc::new(ScriptedGenerator::new(vec![]));
        let service = service_with(generator.clone());

        assert_ok!(service.ensure_healthy().await);
        assert_ok!(service.ensure_healthy().await);
        assert_eq!(generator.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_health_check_requires_model_substring() {
        let mut generator = ScriptedGenerator::new(vec![]);
        generator.models = vec!["llama3:8b".to_string(), "mistral:latest".to_string()];
        let service = service_with(Arc::new(generator));

        let err = assert_err!(service.ensure_healthy().await);
        assert!(matches!(err, LlmError::ModelNotFound { ref model, .. } if model == "gpt-oss"));
    }
}
