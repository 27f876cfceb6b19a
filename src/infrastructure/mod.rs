//! 基础设施层
//!
//! 持有文件这类稀缺资源，只暴露读写能力，不认识批次和生成流程

pub mod file_registry;
pub mod store_manager;
pub mod table_store;

pub use file_registry::FileRegistry;
pub use store_manager::StoreManager;
pub use table_store::TableStore;
