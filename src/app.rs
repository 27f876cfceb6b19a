//! 命令行驱动
//!
//! 扫描数据目录 → 对所有文件运行一个批次 → 保存全部结果 → 输出统计

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::clients::OllamaClient;
use crate::config::Config;
use crate::infrastructure::{FileRegistry, StoreManager};
use crate::models::{BatchState, BatchStatus, SaveSummary};
use crate::orchestrator::BatchOrchestrator;
use crate::services::{FanoutGenerator, GenerationService, GenerationSettings, RecordGenerator};
use crate::utils::logging::{log_startup, print_final_stats};

/// 一次运行的结果
#[derive(Debug, Default)]
pub struct RunReport {
    /// 没有可处理的文件时为 None
    pub batch: Option<BatchState>,
    pub saved: SaveSummary,
}

/// 应用主结构
pub struct App {
    config: Config,
    orchestrator: BatchOrchestrator,
}

impl App {
    /// 初始化应用，生成器连接配置中的 Ollama 服务
    pub async fn initialize(config: Config) -> Result<Self> {
        let client = OllamaClient::from_config(&config).context("创建生成服务客户端失败")?;
        let service = Arc::new(GenerationService::new(
            Arc::new(client),
            GenerationSettings::from_config(&config),
        ));
        Self::with_generator(config, Arc::new(FanoutGenerator::new(service)))
    }

    /// 使用指定的生成器初始化应用
    pub fn with_generator(config: Config, generator: Arc<dyn RecordGenerator>) -> Result<Self> {
        log_startup(&config);

        let registry = Arc::new(FileRegistry::new(config.data_path()));
        let stores = Arc::new(StoreManager::new());
        info!("\n📁 正在扫描数据目录...");
        registry
            .scan(&stores)
            .with_context(|| format!("扫描数据目录失败: {}", config.data_dir))?;

        let orchestrator = BatchOrchestrator::new(registry, stores, generator, &config);
        Ok(Self {
            config,
            orchestrator,
        })
    }

    pub fn orchestrator(&self) -> &BatchOrchestrator {
        &self.orchestrator
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<RunReport> {
        let file_ids: Vec<String> = self
            .orchestrator
            .registry()
            .list()?
            .into_iter()
            .map(|record| record.file_id)
            .collect();

        if file_ids.is_empty() {
            warn!("⚠️ 没有找到待处理的CSV文件，程序结束");
            return Ok(RunReport::default());
        }
        info!("✓ 找到 {} 个待处理的文件", file_ids.len());

        let handle = self
            .orchestrator
            .start_batch(&file_ids, self.config.default_qa_count)
            .await?;
        let batch_id = handle.batch_id.clone();
        let status = handle.wait().await;

        let saved = self.orchestrator.save_batch_results(&batch_id).await?;
        let batch = self.orchestrator.discard(&batch_id).await;

        if status == BatchStatus::Error {
            let message = batch
                .as_ref()
                .and_then(|state| state.error_message.clone())
                .unwrap_or_default();
            error!("❌ 批次未能全部完成: {}", message);
        }

        if let Some(state) = &batch {
            print_final_stats(state.result_count(), state.total_rows, saved.saved, saved.errors);
        }

        Ok(RunReport { batch, saved })
    }
}
