//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批次调度和进度统计，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 批量处理器
//! - 创建批次并在后台任务中运行
//! - 持有批次状态表，供轮询查询
//! - 保存选中的结果、单行生成与保存
//! - 批次失败时把状态和出错文件标记为 error
//!
//! ### `file_processor` - 单个文件处理器
//! - 按行号顺序遍历单个文件
//! - 把每行交给 RowFlow，结果逐行写入批次状态
//! - 文件结束时刷新已处理行数
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<文件>)
//!     ↓
//! file_processor (处理 Vec<行>)
//!     ↓
//! workflow::RowFlow (处理单行)
//!     ↓
//! services (能力层：fanout / generation / parser)
//!     ↓
//! infrastructure (基础设施：TableStore / FileRegistry)
//! ```

pub mod batch_processor;
pub mod file_processor;

// 重新导出主要类型
pub use batch_processor::{BatchHandle, BatchOrchestrator};
pub use file_processor::FileStats;
