//! 文件登记表 - 基础设施层
//!
//! 记录数据目录中每个 CSV 文件的元数据，元数据以 `<文件ID>.json` 保存在文件旁边

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::Local;
use tracing::{info, warn};

use super::store_manager::StoreManager;
use crate::error::{StoreError, StoreResult};
use crate::models::{FileRecord, FileStatus};

/// 文件登记表
pub struct FileRegistry {
    data_dir: PathBuf,
    files: RwLock<HashMap<String, FileRecord>>,
}

impl FileRegistry {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            files: RwLock::new(HashMap::new()),
        }
    }

    /// 文件ID对应的 CSV 路径
    pub fn path_for(&self, file_id: &str) -> PathBuf {
        self.data_dir.join(format!("{}.csv", file_id))
    }

    fn sidecar_path(&self, file_id: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", file_id))
    }

    /// 扫描数据目录，登记所有 CSV 文件
    ///
    /// 已有元数据的沿用其文件名和创建时间，行数与已处理数以文件内容为准
    pub fn scan(&self, stores: &StoreManager) -> StoreResult<usize> {
        std::fs::create_dir_all(&self.data_dir).map_err(|e| StoreError::io(&self.data_dir, e))?;

        let mut csv_files: Vec<PathBuf> = std::fs::read_dir(&self.data_dir)
            .map_err(|e| StoreError::io(&self.data_dir, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "csv"))
            .collect();
        csv_files.sort();

        let mut registered = 0;
        for path in csv_files {
            let Some(file_id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
            else {
                continue;
            };

            let store = match stores.store_for(&file_id, &path) {
                Ok(store) => store,
                Err(e) => {
                    warn!("⚠️ [文件 {}] 无法读取，跳过登记: {}", file_id, e);
                    continue;
                }
            };

            let mut record = self.read_sidecar(&file_id).unwrap_or_else(|| FileRecord {
                file_id: file_id.clone(),
                filename: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| format!("{}.csv", file_id)),
                created_at: Local::now().to_rfc3339(),
                row_count: 0,
                processed_count: 0,
                status: FileStatus::Pending,
            });
            record.row_count = store.row_count()?;
            record.processed_count = store.count_rows_with_qa()?;

            self.write_sidecar(&record)?;
            self.files.write()?.insert(file_id, record);
            registered += 1;
        }

        info!("✓ 数据目录 {} 中登记了 {} 个文件", self.data_dir.display(), registered);
        Ok(registered)
    }

    fn read_sidecar(&self, file_id: &str) -> Option<FileRecord> {
        let path = self.sidecar_path(file_id);
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("⚠️ [文件 {}] 元数据无法解析，重新生成: {}", file_id, e);
                None
            }
        }
    }

    fn write_sidecar(&self, record: &FileRecord) -> StoreResult<()> {
        let path = self.sidecar_path(&record.file_id);
        let json = serde_json::to_string_pretty(record).map_err(|source| StoreError::Metadata {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&path, json).map_err(|e| StoreError::io(&path, e))
    }

    /// 登记一个文件并写入元数据
    pub fn register(&self, file_id: &str, filename: &str, row_count: usize) -> StoreResult<FileRecord> {
        let record = FileRecord {
            file_id: file_id.to_string(),
            filename: filename.to_string(),
            created_at: Local::now().to_rfc3339(),
            row_count,
            processed_count: 0,
            status: FileStatus::Pending,
        };
        self.write_sidecar(&record)?;
        self.files.write()?.insert(file_id.to_string(), record.clone());
        Ok(record)
    }

    pub fn get(&self, file_id: &str) -> StoreResult<Option<FileRecord>> {
        Ok(self.files.read()?.get(file_id).cloned())
    }

    /// 所有已登记文件，按文件ID排序
    pub fn list(&self) -> StoreResult<Vec<FileRecord>> {
        let mut records: Vec<FileRecord> = self.files.read()?.values().cloned().collect();
        records.sort_by(|a, b| a.file_id.cmp(&b.file_id));
        Ok(records)
    }

    /// 更新文件状态，文件未登记时返回 false
    pub fn set_status(&self, file_id: &str, status: FileStatus) -> StoreResult<bool> {
        self.update(file_id, |record| record.status = status)
    }

    /// 更新已处理行数，文件未登记时返回 false
    pub fn set_processed_count(&self, file_id: &str, count: usize) -> StoreResult<bool> {
        self.update(file_id, |record| record.processed_count = count)
    }

    fn update(&self, file_id: &str, apply: impl FnOnce(&mut FileRecord)) -> StoreResult<bool> {
        let snapshot = {
            let mut files = self.files.write()?;
            let Some(record) = files.get_mut(file_id) else {
                return Ok(false);
            };
            apply(record);
            record.clone()
        };
        self.write_sidecar(&snapshot)?;
        Ok(true)
    }
}
