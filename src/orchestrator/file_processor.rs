//! 单个文件处理器 - 编排层
//!
//! ## 职责
//!
//! 按行号顺序遍历一个文件的所有行，把每行交给 `RowFlow`，
//! 并把进度和结果实时写入批次状态。
//!
//! 生成失败只影响当前行；存储错误会中断整个批次。

use tracing::info;

use crate::error::{AppResult, BatchError};
use crate::models::FileStatus;
use crate::orchestrator::batch_processor::BatchRun;
use crate::utils::logging::{log_file_complete, truncate_text};
use crate::workflow::{RowCtx, RowOutcome};

const SOURCE_PREVIEW_CHARS: usize = 100;

/// 单个文件的处理统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FileStats {
    pub generated: usize,
    /// 已有问答而跳过的行
    pub skipped: usize,
    /// 原文或译文为空的行
    pub missing_text: usize,
    pub failed: usize,
}

/// 处理单个文件
pub(crate) async fn process_file(run: &BatchRun, file_id: &str) -> AppResult<FileStats> {
    run.update(|state| {
        state.current_file = Some(file_id.to_string());
        state.current_row = 0;
        state.current_source.clear();
        if let Some(progress) = state.progress.get_mut(file_id) {
            progress.status = FileStatus::Processing;
        }
    })
    .await;
    run.registry.set_status(file_id, FileStatus::Processing)?;

    let store = run.store_for(file_id)?;
    let total = store.row_count()?;
    info!("[文件 {}] 📄 开始处理，共 {} 行", file_id, total);

    run.update(|state| {
        if let Some(progress) = state.progress.get_mut(file_id) {
            state.total_rows = state.total_rows - progress.total + total;
            progress.total = total;
        }
    })
    .await;

    let mut stats = FileStats::default();
    for idx in 0..total {
        let record = store.get_row(idx)?.ok_or_else(|| BatchError::RowNotFound {
            file_id: file_id.to_string(),
            index: idx,
        })?;

        let preview = truncate_text(&record.source, SOURCE_PREVIEW_CHARS);
        run.update(|state| {
            state.current_row = idx + 1;
            state.current_source = preview;
        })
        .await;

        let ctx = RowCtx::new(file_id, idx, total, run.qa_count);
        let outcome = run.flow.run(&store, &record, &ctx).await?;

        let generated = match outcome {
            RowOutcome::Generated(row) => {
                stats.generated += 1;
                Some(row)
            }
            RowOutcome::AlreadyProcessed => {
                stats.skipped += 1;
                None
            }
            RowOutcome::MissingText => {
                stats.missing_text += 1;
                None
            }
            RowOutcome::Failed(_) => {
                stats.failed += 1;
                None
            }
        };

        run.update(|state| {
            if let Some(row) = generated {
                state.results.entry(file_id.to_string()).or_default().push(row);
            }
            if let Some(progress) = state.progress.get_mut(file_id) {
                progress.processed = idx + 1;
            }
            state.processed_rows += 1;
        })
        .await;

        if idx + 1 < total && !run.row_delay.is_zero() {
            tokio::time::sleep(run.row_delay).await;
        }
    }

    let processed_count = store.count_rows_with_qa()?;
    run.registry.set_processed_count(file_id, processed_count)?;
    run.registry.set_status(file_id, FileStatus::Completed)?;
    run.update(|state| {
        if let Some(progress) = state.progress.get_mut(file_id) {
            progress.status = FileStatus::Completed;
        }
        state.processed_files += 1;
    })
    .await;

    log_file_complete(
        file_id,
        stats.generated,
        stats.skipped + stats.missing_text,
        stats.failed,
        total,
    );
    Ok(stats)
}
