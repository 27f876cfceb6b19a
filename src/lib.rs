//! # QA Generator
//!
//! 为"原文 + 译文"表格批量生成多语言问答对的 Rust 应用程序
//!
//! ## 架构设计
//!
//! 本系统采用严格的分层架构：
//!
//! ### ⓪ 传输层（Clients）
//! - `clients/` - 与生成服务通信
//! - `TextGenerator` - 传输接口（列出模型、发送生成请求）
//! - `OllamaClient` - Ollama HTTP 实现
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（文件），只暴露能力
//! - `TableStore` - 单个 CSV 文件的唯一持有者，先写暂存文件再替换
//! - `StoreManager` - 每个文件只有一个 TableStore
//! - `FileRegistry` - 文件元数据登记
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单条记录
//! - `ResponseParser` - 从模型输出中提取、修复并校验 JSON
//! - `GenerationService` - 健康检查、超时、退避重试
//! - `FanoutGenerator` - 并发 N 次单组生成并合并
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一行"的完整处理流程
//! - `RowCtx` - 上下文封装（file_id + row_index）
//! - `RowFlow` - 流程编排（续跑检查 → 生成）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 批次生命周期、状态查询、保存
//! - `orchestrator/file_processor` - 单个文件处理器，遍历行

pub mod app;
pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use app::{App, RunReport};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::{FileRegistry, StoreManager, TableStore};
pub use orchestrator::{BatchHandle, BatchOrchestrator};
pub use services::{FanoutGenerator, GenerationService, RecordGenerator};
pub use workflow::{RowCtx, RowFlow, RowOutcome};
