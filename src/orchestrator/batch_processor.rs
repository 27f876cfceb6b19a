//! 批量处理器 - 编排层
//!
//! ## 职责
//!
//! 管理批次的完整生命周期：创建、后台运行、状态查询、保存结果、丢弃。
//!
//! ## 核心功能
//!
//! 1. **启动批次**：校验文件，创建状态，在后台任务中运行
//! 2. **断点续跑**：已有问答的行不会重新生成
//! 3. **故障隔离**：单行生成失败只跳过该行，存储错误才会让批次失败
//! 4. **实时进度**：每处理一行都更新状态，结果逐行追加
//! 5. **保存结果**：把选中的结果写回表格，统计成功和失败数量
//!
//! ## 设计特点
//!
//! - 所有共享资源（登记表、存储、批次表）都是注入的 `Arc`，没有全局变量
//! - 每个批次返回一个任务句柄，结束时状态一定是 completed 或 error

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppResult, BatchError};
use crate::infrastructure::{FileRegistry, StoreManager, TableStore};
use crate::models::{BatchState, BatchStatus, FileStatus, QaPayload, ResultRow, SaveSummary};
use crate::orchestrator::file_processor;
use crate::services::RecordGenerator;
use crate::utils::logging::log_batch_start;
use crate::workflow::{RowCtx, RowFlow};

type BatchTable = Arc<RwLock<HashMap<String, BatchState>>>;

/// 后台批次任务的句柄
pub struct BatchHandle {
    pub batch_id: String,
    join: JoinHandle<BatchStatus>,
}

impl BatchHandle {
    /// 等待批次结束，返回最终状态
    pub async fn wait(self) -> BatchStatus {
        match self.join.await {
            Ok(status) => status,
            Err(e) => {
                error!("批次 {} 任务执行失败: {}", self.batch_id, e);
                BatchStatus::Error
            }
        }
    }
}

/// 批次编排器
pub struct BatchOrchestrator {
    files: FileAccess,
    flow: Arc<RowFlow>,
    batches: BatchTable,
    row_delay: Duration,
}

impl BatchOrchestrator {
    pub fn new(
        registry: Arc<FileRegistry>,
        stores: Arc<StoreManager>,
        generator: Arc<dyn RecordGenerator>,
        config: &Config,
    ) -> Self {
        Self {
            files: FileAccess { registry, stores },
            flow: Arc::new(RowFlow::new(
                generator,
                config.model_name.clone(),
                config.verbose_logging,
            )),
            batches: Arc::new(RwLock::new(HashMap::new())),
            row_delay: config.row_delay(),
        }
    }

    pub fn registry(&self) -> &Arc<FileRegistry> {
        &self.files.registry
    }

    /// 启动一个批次
    ///
    /// 未登记的文件会被跳过；没有任何有效文件时返回 `NoValidFiles`
    pub async fn start_batch(&self, file_ids: &[String], qa_count: usize) -> AppResult<BatchHandle> {
        let mut files = Vec::new();
        for file_id in file_ids {
            match self.files.registry.get(file_id)? {
                Some(record) => files.push((file_id.clone(), record.row_count)),
                None => warn!("⚠️ [文件 {}] 未登记，已跳过", file_id),
            }
        }
        if files.is_empty() {
            return Err(BatchError::NoValidFiles.into());
        }

        let batch_id = Uuid::new_v4().to_string();
        let state = BatchState::new(batch_id.clone(), &files, qa_count);
        log_batch_start(&batch_id, state.total_files, state.total_rows, qa_count);
        self.batches.write().await.insert(batch_id.clone(), state);

        let run = BatchRun {
            batch_id: batch_id.clone(),
            qa_count,
            registry: Arc::clone(&self.files.registry),
            stores: Arc::clone(&self.files.stores),
            flow: Arc::clone(&self.flow),
            batches: Arc::clone(&self.batches),
            row_delay: self.row_delay,
        };
        let file_ids: Vec<String> = files.into_iter().map(|(id, _)| id).collect();

        // 批次在内层任务中运行，内层任务 panic 时由外层把状态收尾为 error
        let join = tokio::spawn(async move {
            let worker = tokio::spawn(run.clone().execute(file_ids));
            match worker.await {
                Ok(status) => status,
                Err(e) => {
                    run.fail(&format!("批次任务异常终止: {}", e)).await;
                    BatchStatus::Error
                }
            }
        });

        Ok(BatchHandle { batch_id, join })
    }

    /// 批次状态快照
    pub async fn status(&self, batch_id: &str) -> Option<BatchState> {
        self.batches.read().await.get(batch_id).cloned()
    }

    /// 所有批次，按开始时间排序
    pub async fn list_batches(&self) -> Vec<BatchState> {
        let mut batches: Vec<BatchState> = self.batches.read().await.values().cloned().collect();
        batches.sort_by_key(|state| state.started_at);
        batches
    }

    /// 丢弃批次状态（结果已取走或已保存）
    ///
    /// 只能丢弃已结束的批次，运行中的批次返回 None 并保留
    pub async fn discard(&self, batch_id: &str) -> Option<BatchState> {
        let mut batches = self.batches.write().await;
        if batches
            .get(batch_id)
            .is_some_and(|state| !state.status.is_terminal())
        {
            warn!("⚠️ 批次 {} 仍在运行，不能丢弃", batch_id);
            return None;
        }
        batches.remove(batch_id)
    }

    /// 把选中的结果写回表格（在阻塞线程中执行）
    ///
    /// 不会中途放弃：未登记的文件按行数计入失败，越界的行和写入失败各计 1 次失败
    pub async fn save_results(&self, selections: BTreeMap<String, Vec<ResultRow>>) -> SaveSummary {
        let files = self.files.clone();
        let total: usize = selections.values().map(Vec::len).sum();
        match tokio::task::spawn_blocking(move || files.save_selections(&selections)).await {
            Ok(summary) => summary,
            Err(e) => {
                error!("❌ 保存任务执行失败: {}", e);
                SaveSummary {
                    saved: 0,
                    errors: total,
                    files: Vec::new(),
                }
            }
        }
    }

    /// 保存批次生成的全部结果
    pub async fn save_batch_results(&self, batch_id: &str) -> AppResult<SaveSummary> {
        let state = self
            .status(batch_id)
            .await
            .ok_or_else(|| BatchError::UnknownBatch(batch_id.to_string()))?;
        Ok(self.save_results(state.results).await)
    }

    /// 为单行生成问答（不保存）
    pub async fn generate_row(&self, file_id: &str, idx: usize, qa_count: usize) -> AppResult<ResultRow> {
        let store = self.files.store_for(file_id)?;
        let record = store.get_row(idx)?.ok_or_else(|| BatchError::RowNotFound {
            file_id: file_id.to_string(),
            index: idx,
        })?;
        let ctx = RowCtx::new(file_id, idx, store.row_count()?, qa_count);
        self.flow.generate(&record, &ctx).await
    }

    /// 保存单行，行号越界时返回 `Ok(false)`
    pub async fn save_row(&self, file_id: &str, idx: usize, payload: QaPayload) -> AppResult<bool> {
        let files = self.files.clone();
        let file_id = file_id.to_string();
        tokio::task::spawn_blocking(move || files.save_row(&file_id, idx, &payload))
            .await
            .map_err(|e| BatchError::TaskFailed(e.to_string()))?
    }

    /// 确保文件包含 1..=n 的槽位列
    pub async fn ensure_headers(&self, file_id: &str, n: usize) -> AppResult<()> {
        let store = self.files.store_for(file_id)?;
        tokio::task::spawn_blocking(move || store.ensure_headers(n))
            .await
            .map_err(|e| BatchError::TaskFailed(e.to_string()))??;
        Ok(())
    }
}

/// 登记表 + 存储，可以整体移动到阻塞线程中使用
#[derive(Clone)]
struct FileAccess {
    registry: Arc<FileRegistry>,
    stores: Arc<StoreManager>,
}

impl FileAccess {
    fn store_for(&self, file_id: &str) -> AppResult<Arc<TableStore>> {
        if self.registry.get(file_id)?.is_none() {
            return Err(BatchError::UnknownFile(file_id.to_string()).into());
        }
        Ok(self
            .stores
            .store_for(file_id, &self.registry.path_for(file_id))?)
    }

    fn refresh_processed_count(&self, file_id: &str) -> AppResult<usize> {
        let count = self.store_for(file_id)?.count_rows_with_qa()?;
        self.registry.set_processed_count(file_id, count)?;
        Ok(count)
    }

    fn save_row(&self, file_id: &str, idx: usize, payload: &QaPayload) -> AppResult<bool> {
        let store = self.store_for(file_id)?;
        if !store.update_row_with_qa(idx, payload)? {
            return Ok(false);
        }
        self.refresh_processed_count(file_id)?;
        Ok(true)
    }

    fn save_selections(&self, selections: &BTreeMap<String, Vec<ResultRow>>) -> SaveSummary {
        let mut summary = SaveSummary::default();

        for (file_id, rows) in selections {
            let store = match self.store_for(file_id) {
                Ok(store) => store,
                Err(e) => {
                    warn!("⚠️ [文件 {}] 无法保存 {} 行: {}", file_id, rows.len(), e);
                    summary.errors += rows.len();
                    continue;
                }
            };

            for row in rows {
                match store.update_row_with_qa(row.id, &row.to_payload()) {
                    Ok(true) => summary.saved += 1,
                    Ok(false) => {
                        warn!("⚠️ [文件 {} 行 {}] 行不存在，未保存", file_id, row.id + 1);
                        summary.errors += 1;
                    }
                    Err(e) => {
                        error!("❌ [文件 {} 行 {}] 保存失败: {}", file_id, row.id + 1, e);
                        summary.errors += 1;
                    }
                }
            }
            summary.files.push(file_id.clone());
        }

        for file_id in &summary.files {
            if let Err(e) = self.refresh_processed_count(file_id) {
                warn!("⚠️ [文件 {}] 更新已处理行数失败: {}", file_id, e);
            }
        }

        info!(
            "💾 保存完成: 成功 {} 行, 失败 {} 行, 涉及 {} 个文件",
            summary.saved,
            summary.errors,
            summary.files.len()
        );
        summary
    }
}

/// 一个正在运行的批次持有的资源
#[derive(Clone)]
pub(crate) struct BatchRun {
    pub(crate) batch_id: String,
    pub(crate) qa_count: usize,
    pub(crate) registry: Arc<FileRegistry>,
    pub(crate) stores: Arc<StoreManager>,
    pub(crate) flow: Arc<RowFlow>,
    batches: BatchTable,
    pub(crate) row_delay: Duration,
}

impl BatchRun {
    /// 修改本批次的状态
    pub(crate) async fn update(&self, apply: impl FnOnce(&mut BatchState)) {
        if let Some(state) = self.batches.write().await.get_mut(&self.batch_id) {
            apply(state);
        }
    }

    pub(crate) fn store_for(&self, file_id: &str) -> AppResult<Arc<TableStore>> {
        Ok(self
            .stores
            .store_for(file_id, &self.registry.path_for(file_id))?)
    }

    async fn execute(self, file_ids: Vec<String>) -> BatchStatus {
        self.update(|state| state.status = BatchStatus::Running).await;

        match self.process_files(&file_ids).await {
            Ok(()) => {
                self.update(|state| {
                    state.status = BatchStatus::Completed;
                    state.current_file = None;
                    state.finished_at = Some(Local::now());
                })
                .await;
                info!("✅ 批次 {} 完成", self.batch_id);
                BatchStatus::Completed
            }
            Err(e) => {
                self.fail(&e.to_string()).await;
                BatchStatus::Error
            }
        }
    }

    /// 把批次和正在处理的文件标记为 error
    async fn fail(&self, message: &str) {
        error!("❌ 批次 {} 失败: {}", self.batch_id, message);
        let mut failed_files = Vec::new();
        self.update(|state| {
            state.status = BatchStatus::Error;
            state.error_message = Some(message.to_string());
            state.finished_at = Some(Local::now());
            for (file_id, progress) in state.progress.iter_mut() {
                if progress.status == FileStatus::Processing {
                    progress.status = FileStatus::Error;
                    progress.error_message = Some(message.to_string());
                    failed_files.push(file_id.clone());
                }
            }
        })
        .await;

        for file_id in failed_files {
            if let Err(e) = self.registry.set_status(&file_id, FileStatus::Error) {
                warn!("⚠️ [文件 {}] 更新状态失败: {}", file_id, e);
            }
        }
    }

    async fn process_files(&self, file_ids: &[String]) -> AppResult<()> {
        for file_id in file_ids {
            file_processor::process_file(self, file_id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, LlmError};
    use crate::models::{GenerationResult, QaKey};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 记录调用次数；原文等于 `fail_on` 时返回错误
    struct CountingGenerator {
        calls: AtomicUsize,
        fail_on: Option<String>,
    }

    impl CountingGenerator {
        fn new(fail_on: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_on: fail_on.map(str::to_string),
            })
        }
    }

    #[async_trait]
    impl RecordGenerator for CountingGenerator {
        async fn generate_for_record(
            &self,
            source: &str,
            _translation: &str,
            _model: &str,
            n: usize,
        ) -> AppResult<GenerationResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on.as_deref() == Some(source) {
                return Err(AppError::Llm(LlmError::Timeout { secs: 0.1 }));
            }
            let mut qa = GenerationResult::empty();
            for key in QaKey::ALL {
                qa.set(key, (1..=n).map(|i| format!("{}-{}-{}", source, key, i)).collect());
            }
            Ok(qa)
        }
    }

    fn orchestrator(dir: &Path, files: &[(&str, &str)], generator: Arc<dyn RecordGenerator>) -> BatchOrchestrator {
        for (file_id, content) in files {
            std::fs::write(dir.join(format!("{}.csv", file_id)), content).unwrap();
        }
        let registry = Arc::new(FileRegistry::new(dir));
        let stores = Arc::new(StoreManager::new());
        registry.scan(&stores).unwrap();

        let config = Config {
            row_delay_ms: 0,
            ..Config::default()
        };
        BatchOrchestrator::new(registry, stores, generator, &config)
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_resume_skips_rows_with_existing_qa() {
        let dir = tempfile::tempdir().unwrap();
        let generator = CountingGenerator::new(None);
        let orch = orchestrator(
            dir.path(),
            &[("f1", "source,translation,q_en_1\nA,a,\nB,b,old\nC,c,\n")],
            generator.clone(),
        );

        let handle = orch.start_batch(&ids(&["f1"]), 2).await.unwrap();
        let batch_id = handle.batch_id.clone();
        assert_eq!(handle.wait().await, BatchStatus::Completed);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);

        let state = orch.status(&batch_id).await.unwrap();
        assert_eq!(state.result_count(), 2);
        assert_eq!(state.processed_rows, 3);
        assert_eq!(state.progress["f1"].status, FileStatus::Completed);
        assert!(state.finished_at.is_some());

        let summary = orch.save_batch_results(&batch_id).await.unwrap();
        assert_eq!(summary.saved, 2);
        assert_eq!(summary.errors, 0);
        assert_eq!(orch.registry().get("f1").unwrap().unwrap().processed_count, 3);

        let again = orch.start_batch(&ids(&["f1"]), 2).await.unwrap();
        let again_id = again.batch_id.clone();
        assert_eq!(again.wait().await, BatchStatus::Completed);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
        assert_eq!(orch.status(&again_id).await.unwrap().result_count(), 0);
    }

    #[tokio::test]
    async fn test_row_failure_does_not_stop_batch() {
        let dir = tempfile::tempdir().unwrap();
        let generator = CountingGenerator::new(Some("B"));
        let orch = orchestrator(
            dir.path(),
            &[
                ("f1", "source,translation\nA,a\nB,b\nC,c\n"),
                ("f2", "source,translation\nD,d\n"),
            ],
            generator.clone(),
        );

        let handle = orch.start_batch(&ids(&["f1", "missing", "f2"]), 1).await.unwrap();
        let batch_id = handle.batch_id.clone();
        assert_eq!(handle.wait().await, BatchStatus::Completed);

        let state = orch.status(&batch_id).await.unwrap();
        assert_eq!(state.total_files, 2);
        assert_eq!(state.processed_files, 2);
        let f1_ids: Vec<usize> = state.results["f1"].iter().map(|r| r.id).collect();
        assert_eq!(f1_ids, vec![0, 2]);
        assert_eq!(state.results["f2"].len(), 1);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_store_error_marks_batch_and_file_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let generator = CountingGenerator::new(None);
        let orch = orchestrator(dir.path(), &[], generator.clone());
        std::fs::write(dir.path().join("bad.csv"), "text,meaning\nx,y\n").unwrap();
        orch.registry().register("bad", "bad.csv", 1).unwrap();

        let handle = orch.start_batch(&ids(&["bad"]), 2).await.unwrap();
        let batch_id = handle.batch_id.clone();
        assert_eq!(handle.wait().await, BatchStatus::Error);

        let state = orch.status(&batch_id).await.unwrap();
        assert_eq!(state.status, BatchStatus::Error);
        assert!(state.error_message.is_some());
        assert_eq!(state.progress["bad"].status, FileStatus::Error);
        assert_eq!(
            orch.registry().get("bad").unwrap().unwrap().status,
            FileStatus::Error
        );
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_valid_files() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), &[], CountingGenerator::new(None));

        let err = orch.start_batch(&ids(&["ghost"]), 2).await.err().unwrap();
        assert!(matches!(err, AppError::Batch(BatchError::NoValidFiles)));
    }

    #[tokio::test]
    async fn test_save_results_counts_errors_without_aborting() {
        let dir = tempfile::tempdir().unwrap();
        let generator = CountingGenerator::new(None);
        let orch = orchestrator(dir.path(), &[("f1", "source,translation\nA,a\nB,b\n")], generator);

        let row = orch.generate_row("f1", 1, 2).await.unwrap();
        let mut out_of_range = row.clone();
        out_of_range.id = 7;

        let mut selections = BTreeMap::new();
        selections.insert("f1".to_string(), vec![row, out_of_range]);
        selections.insert("ghost".to_string(), vec![ResultRow {
            id: 0,
            file_id: "ghost".to_string(),
            source: String::new(),
            translation: String::new(),
            tags: None,
            qa: GenerationResult::empty(),
        }]);

        let summary = orch.save_results(selections).await;
        assert_eq!(summary.saved, 1);
        assert_eq!(summary.errors, 2);
        assert_eq!(summary.files, vec!["f1".to_string()]);
        assert_eq!(orch.registry().get("f1").unwrap().unwrap().processed_count, 1);
    }

    #[tokio::test]
    async fn test_single_row_operations() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(
            dir.path(),
            &[("f1", "source,translation\nA,a\n")],
            CountingGenerator::new(None),
        );

        let err = orch.generate_row("f1", 3, 1).await.unwrap_err();
        assert!(matches!(err, AppError::Batch(BatchError::RowNotFound { index: 3, .. })));

        let row = orch.generate_row("f1", 0, 1).await.unwrap();
        let payload = QaPayload {
            tags: Some("manual".to_string()),
            qa: row.qa,
        };
        assert!(orch.save_row("f1", 0, payload.clone()).await.unwrap());
        assert!(!orch.save_row("f1", 9, payload).await.unwrap());
        assert_eq!(orch.registry().get("f1").unwrap().unwrap().processed_count, 1);

        orch.ensure_headers("f1", 3).await.unwrap();
        let path = orch.registry().path_for("f1");
        let header = std::fs::read_to_string(path).unwrap();
        assert!(header.contains("a_sa_3"));
    }

    #[tokio::test]
    async fn test_discard_removes_state() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(
            dir.path(),
            &[("f1", "source,translation\nA,a\n")],
            CountingGenerator::new(None),
        );

        let handle = orch.start_batch(&ids(&["f1"]), 1).await.unwrap();
        let batch_id = handle.batch_id.clone();
        handle.wait().await;

        assert_eq!(orch.list_batches().await.len(), 1);
        assert!(orch.discard(&batch_id).await.is_some());
        assert!(orch.status(&batch_id).await.is_none());
        assert!(orch.save_batch_results(&batch_id).await.is_err());
    }

    /// 每次生成先等待一段时间
    struct SlowGenerator(Duration);

    #[async_trait]
    impl RecordGenerator for SlowGenerator {
        async fn generate_for_record(
            &self,
            _source: &str,
            _translation: &str,
            _model: &str,
            _n: usize,
        ) -> AppResult<GenerationResult> {
            tokio::time::sleep(self.0).await;
            Ok(GenerationResult::empty())
        }
    }

    #[tokio::test]
    async fn test_discard_keeps_running_batch() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(
            dir.path(),
            &[("f1", "source,translation\nA,a\n")],
            Arc::new(SlowGenerator(Duration::from_millis(300))),
        );

        let handle = orch.start_batch(&ids(&["f1"]), 1).await.unwrap();
        let batch_id = handle.batch_id.clone();
        assert!(orch.discard(&batch_id).await.is_none());
        assert!(orch.status(&batch_id).await.is_some());

        assert_eq!(handle.wait().await, BatchStatus::Completed);
        assert!(orch.discard(&batch_id).await.is_some());
    }

    /// 生成时直接 panic
    struct PanickingGenerator;

    #[async_trait]
    impl RecordGenerator for PanickingGenerator {
        async fn generate_for_record(
            &self,
            _source: &str,
            _translation: &str,
            _model: &str,
            _n: usize,
        ) -> AppResult<GenerationResult> {
            panic!("生成器崩溃");
        }
    }

    #[tokio::test]
    async fn test_panicking_generator_marks_batch_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(
            dir.path(),
            &[("f1", "source,translation\nA,a\nB,b\n")],
            Arc::new(PanickingGenerator),
        );

        let handle = orch.start_batch(&ids(&["f1"]), 1).await.unwrap();
        let batch_id = handle.batch_id.clone();
        assert_eq!(handle.wait().await, BatchStatus::Error);

        let state = orch.status(&batch_id).await.unwrap();
        assert_eq!(state.status, BatchStatus::Error);
        assert!(state.error_message.unwrap().contains("异常终止"));
        assert!(state.finished_at.is_some());
        assert_eq!(state.progress["f1"].status, FileStatus::Error);
        assert_eq!(
            orch.registry().get("f1").unwrap().unwrap().status,
            FileStatus::Error
        );
        assert!(orch.discard(&batch_id).await.is_some());
    }
}
