//! 并发扇出生成 - 业务能力层
//!
//! 一次让模型生成 N 组问答容易被截断或输出坏 JSON，
//! 这里改为并发发起 N 次单组生成，再把结果合并。

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{error, info};

use crate::error::AppResult;
use crate::models::GenerationResult;
use crate::services::generation_service::GenerationService;

/// 为一条记录生成 N 组问答的能力
///
/// 编排层只依赖这个接口，测试中可以替换为内存实现
#[async_trait]
pub trait RecordGenerator: Send + Sync {
    async fn generate_for_record(
        &self,
        source: &str,
        translation: &str,
        model: &str,
        n: usize,
    ) -> AppResult<GenerationResult>;
}

/// 扇出生成器
///
/// 职责：
/// - 为单条记录并发发起 n 次单组生成（并发度等于 n）
/// - 某次尝试失败只丢弃该槽位，不影响其他尝试
/// - 合并后补齐到 n 项
pub struct FanoutGenerator {
    service: Arc<GenerationService>,
}

impl FanoutGenerator {
    pub fn new(service: Arc<GenerationService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl RecordGenerator for FanoutGenerator {
    async fn generate_for_record(
        &self,
        source: &str,
        translation: &str,
        model: &str,
        n: usize,
    ) -> AppResult<GenerationResult> {
        info!("开始并发生成 {} 组问答", n);
        self.service.ensure_healthy().await?;

        let timeout = self.service.settings().timeout;
        let mut tasks: FuturesUnordered<_> = (0..n)
            .map(|_| {
                let service = Arc::clone(&self.service);
                let source = source.to_string();
                let translation = translation.to_string();
                let model = model.to_string();
                tokio::spawn(async move {
                    service
                        .attempt(&source, &translation, &model, timeout)
                        .await
                })
            })
            .collect();

        let mut merged = GenerationResult::empty();
        let mut succeeded = 0;
        while let Some(joined) = tasks.next().await {
            match joined {
                Ok(Ok(result)) => {
                    merged.extend_from(result);
                    succeeded += 1;
                }
                Ok(Err(e)) => error!("一个生成任务失败: {}", e),
                Err(e) => error!("生成任务执行失败: {}", e),
            }
        }

        merged.conform(n);
        info!("✓ 并发生成完成: 成功 {}/{}", succeeded, n);
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{GenerateRequest, TextGenerator};
    use crate::error::{AppError, LlmError};
    use crate::models::QaKey;
    use crate::services::generation_service::tests::{fast_settings, SINGLE};
    use crate::services::generation_service::GenerationSettings;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// 前 `slow` 次调用会超时，其余返回有效的单组结果
    struct SlowThenOk {
        calls: AtomicUsize,
        slow: usize,
        models: Vec<String>,
    }

    #[async_trait]
    impl TextGenerator for SlowThenOk {
        async fn list_models(&self) -> Result<Vec<String>, LlmError> {
            Ok(self.models.clone())
        }

        async fn generate(&self, _request: &GenerateRequest) -> Result<String, LlmError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.slow {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(SINGLE.to_string())
        }

        fn base_url(&self) -> &str {
            "mock://slow"
        }
    }

    fn fanout(slow: usize, settings: GenerationSettings) -> (FanoutGenerator, Arc<SlowThenOk>) {
        let client = Arc::new(SlowThenOk {
            calls: AtomicUsize::new(0),
            slow,
            models: vec!["gpt-oss:120b".to_string()],
        });
        let service = Arc::new(GenerationService::new(client.clone(), settings));
        (FanoutGenerator::new(service), client)
    }

    fn single_try() -> GenerationSettings {
        GenerationSettings {
            max_retries: 1,
            timeout: Duration::from_millis(100),
            ..fast_settings()
        }
    }

    #[tokio::test]
    async fn test_all_attempts_succeed() {
        let (generator, client) = fanout(0, single_try());

        let result = generator
            .generate_for_record("src", "tr", "gpt-oss", 4)
            .await
            .unwrap();

        assert_eq!(client.calls.load(Ordering::SeqCst), 4);
        for key in QaKey::ALL {
            assert_eq!(result.get(key).len(), 4);
            assert!(result.get(key).iter().all(|v| !v.is_empty()));
        }
    }

    #[tokio::test]
    async fn test_timed_out_attempt_is_padded_not_raised() {
        let (generator, _client) = fanout(1, single_try());

        let result = generator
            .generate_for_record("", "A teaches B that patience overcomes anger.", "gpt-oss", 2)
            .await
            .unwrap();

        for key in QaKey::ALL {
            let values = result.get(key);
            assert_eq!(values.len(), 2);
            assert_eq!(values.iter().filter(|v| v.is_empty()).count(), 1);
            assert_eq!(values.iter().filter(|v| !v.is_empty()).count(), 1);
        }
    }

    #[tokio::test]
    async fn test_all_attempts_failing_yields_empty_strings() {
        let (generator, _client) = fanout(3, single_try());

        let result = generator
            .generate_for_record("src", "tr", "gpt-oss", 3)
            .await
            .unwrap();

        assert_eq!(result.arity(), Some(3));
        assert!(!result.has_content());
    }

    #[tokio::test]
    async fn test_health_failure_is_raised_before_dispatch() {
        let (generator, client) = fanout(0, GenerationSettings {
            model: "missing-model".to_string(),
            ..single_try()
        });

        let err = generator
            .generate_for_record("src", "tr", "missing-model", 2)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Llm(LlmError::ModelNotFound { .. })));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_zero_items_dispatches_nothing() {
        let (generator, client) = fanout(0, single_try());

        let result = generator
            .generate_for_record("src", "tr", "gpt-oss", 0)
            .await
            .unwrap();

        assert_eq!(result.arity(), Some(0));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }
}
