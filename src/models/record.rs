use serde::{Deserialize, Serialize};

use super::qa::GenerationResult;

/// 表格中的一行记录，`id` 为其在文件内的行号（从 0 开始）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: usize,
    pub source: String,
    pub translation: String,
    pub tags: String,
    /// 各问答键按槽位位置排列的内容（长度等于表头中的槽位数）
    pub qa: GenerationResult,
}

/// 行列表中的摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowSummary {
    pub id: usize,
    pub source: String,
    pub translation: String,
    pub tags: String,
}

/// 写入一行的问答数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QaPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    #[serde(flatten)]
    pub qa: GenerationResult,
}

/// 文件处理状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Error,
}

/// 已登记的文件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_id: String,
    pub filename: String,
    pub created_at: String,
    pub row_count: usize,
    #[serde(default)]
    pub processed_count: usize,
    #[serde(default)]
    pub status: FileStatus,
}
