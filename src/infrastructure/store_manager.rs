//! 存储管理器 - 基础设施层
//!
//! 每个文件只对应一个长期存在的 `TableStore`，保证同一文件的读写走同一把锁

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::table_store::TableStore;
use crate::error::StoreResult;

/// 存储管理器
///
/// 职责：
/// - 按文件ID缓存存储实例
/// - 第一次访问时打开文件
/// - 文件被替换或删除时丢弃缓存
#[derive(Default)]
pub struct StoreManager {
    stores: Mutex<HashMap<String, Arc<TableStore>>>,
}

impl StoreManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取文件对应的存储，不存在时打开
    pub fn store_for(&self, file_id: &str, path: &Path) -> StoreResult<Arc<TableStore>> {
        let mut stores = self.stores.lock()?;
        if let Some(store) = stores.get(file_id) {
            return Ok(Arc::clone(store));
        }

        debug!("[文件 {}] 打开存储: {}", file_id, path.display());
        let store = Arc::new(TableStore::open(path)?);
        stores.insert(file_id.to_string(), Arc::clone(&store));
        Ok(store)
    }
}
