//! 批处理状态模型，供轮询读取

use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use super::qa::GenerationResult;
use super::record::{FileStatus, QaPayload};

/// 批次整体状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Initializing,
    Running,
    Completed,
    Error,
}

impl BatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Error)
    }
}

/// 单个文件的进度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileProgress {
    pub processed: usize,
    pub total: usize,
    pub status: FileStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl FileProgress {
    pub fn pending(total: usize) -> Self {
        Self {
            processed: 0,
            total,
            status: FileStatus::Pending,
            error_message: None,
        }
    }
}

/// 一条生成结果（或用户选中的待保存行）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub id: usize,
    pub file_id: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub translation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    /// 六个问答键平铺在同一层
    #[serde(flatten)]
    pub qa: GenerationResult,
}

impl ResultRow {
    /// 转换为写入表格的数据（只包含问答与标签）
    pub fn to_payload(&self) -> QaPayload {
        QaPayload {
            tags: self.tags.clone(),
            qa: self.qa.clone(),
        }
    }
}

/// 一个批次的完整状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchState {
    pub batch_id: String,
    pub status: BatchStatus,
    pub qa_count: usize,
    pub current_file: Option<String>,
    /// 当前行（从 1 开始，0 表示尚未开始）
    pub current_row: usize,
    pub current_source: String,
    pub total_files: usize,
    pub processed_files: usize,
    pub total_rows: usize,
    pub processed_rows: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub progress: BTreeMap<String, FileProgress>,
    pub results: BTreeMap<String, Vec<ResultRow>>,
    pub started_at: DateTime<Local>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Local>>,
}

impl BatchState {
    /// 创建初始化状态，`files` 为 (文件ID, 行数)
    pub fn new(batch_id: String, files: &[(String, usize)], qa_count: usize) -> Self {
        Self {
            batch_id,
            status: BatchStatus::Initializing,
            qa_count,
            current_file: None,
            current_row: 0,
            current_source: String::new(),
            total_files: files.len(),
            processed_files: 0,
            total_rows: files.iter().map(|(_, rows)| rows).sum(),
            processed_rows: 0,
            error_message: None,
            progress: files
                .iter()
                .map(|(id, rows)| (id.clone(), FileProgress::pending(*rows)))
                .collect(),
            results: files.iter().map(|(id, _)| (id.clone(), Vec::new())).collect(),
            started_at: Local::now(),
            finished_at: None,
        }
    }

    pub fn result_count(&self) -> usize {
        self.results.values().map(Vec::len).sum()
    }
}

/// 保存操作的汇总
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveSummary {
    pub saved: usize,
    pub errors: usize,
    pub files: Vec<String>,
}
