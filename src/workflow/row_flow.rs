//! 行处理流程 - 流程层
//!
//! 核心职责：定义"一行记录"的完整处理流程
//!
//! 流程顺序：
//! 1. 已有问答 → 跳过（断点续跑）
//! 2. 原文或译文为空 → 跳过
//! 3. 调用生成器 → 得到一条结果

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::AppResult;
use crate::infrastructure::TableStore;
use crate::models::{Record, ResultRow};
use crate::services::RecordGenerator;
use crate::utils::logging::truncate_text;
use crate::workflow::row_ctx::RowCtx;

/// 行处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    /// 生成成功
    Generated(ResultRow),
    /// 已有问答，跳过
    AlreadyProcessed,
    /// 原文或译文为空，跳过
    MissingText,
    /// 生成失败（已记录日志），跳过
    Failed(String),
}

/// 行处理流程
///
/// - 决定一行是否需要生成
/// - 生成器的错误在这里被吸收，不会中断批次
/// - 存储错误向上传递
/// - 不写回表格，结果交给编排层保存
pub struct RowFlow {
    generator: Arc<dyn RecordGenerator>,
    model: String,
    verbose_logging: bool,
}

impl RowFlow {
    pub fn new(generator: Arc<dyn RecordGenerator>, model: impl Into<String>, verbose_logging: bool) -> Self {
        Self {
            generator,
            model: model.into(),
            verbose_logging,
        }
    }

    pub async fn run(&self, store: &TableStore, record: &Record, ctx: &RowCtx) -> AppResult<RowOutcome> {
        if store.has_existing_qa(ctx.row_index)? {
            info!("{} 已有问答，跳过", ctx);
            return Ok(RowOutcome::AlreadyProcessed);
        }

        if record.source.trim().is_empty() || record.translation.trim().is_empty() {
            warn!("{} ⚠️ 原文或译文为空，跳过", ctx);
            return Ok(RowOutcome::MissingText);
        }

        if self.verbose_logging {
            debug!("{} 原文: {}", ctx, truncate_text(&record.source, 80));
        }

        match self.generate(record, ctx).await {
            Ok(row) => {
                info!("{} ✓ 生成完成", ctx);
                Ok(RowOutcome::Generated(row))
            }
            Err(e) => {
                error!("{} ❌ 生成失败: {}", ctx, e);
                Ok(RowOutcome::Failed(e.to_string()))
            }
        }
    }

    /// 为一行生成问答，错误直接返回
    pub async fn generate(&self, record: &Record, ctx: &RowCtx) -> AppResult<ResultRow> {
        let qa = self
            .generator
            .generate_for_record(&record.source, &record.translation, &self.model, ctx.qa_count)
            .await?;

        Ok(ResultRow {
            id: record.id,
            file_id: ctx.file_id.clone(),
            source: record.source.clone(),
            translation: record.translation.clone(),
            tags: None,
            qa,
        })
    }
}
