//! 行处理上下文
//!
//! 封装"我正在处理哪个文件的第几行"这一信息

use std::fmt::Display;

/// 行处理上下文
#[derive(Debug, Clone)]
pub struct RowCtx {
    /// 文件ID
    pub file_id: String,

    /// 行号（从0开始，与表格中的行号一致）
    pub row_index: usize,

    /// 文件总行数（仅用于日志显示）
    pub total_rows: usize,

    /// 每行生成的问答数量
    pub qa_count: usize,
}

impl RowCtx {
    pub fn new(file_id: impl Into<String>, row_index: usize, total_rows: usize, qa_count: usize) -> Self {
        Self {
            file_id: file_id.into(),
            row_index,
            total_rows,
            qa_count,
        }
    }
}

impl Display for RowCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[文件 {} 行 {}/{}]",
            self.file_id,
            self.row_index + 1,
            self.total_rows
        )
    }
}
