use std::path::PathBuf;

use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 生成服务错误
    #[error("生成服务错误: {0}")]
    Llm(#[from] LlmError),
    /// 表格存储错误
    #[error("存储错误: {0}")]
    Store(#[from] StoreError),
    /// 批处理错误
    #[error("批处理错误: {0}")]
    Batch(#[from] BatchError),
}

/// 生成服务（Ollama）错误
#[derive(Debug, Error)]
pub enum LlmError {
    /// 健康检查失败：服务不可达或返回非 2xx
    #[error("生成服务不可用 ({url}): {reason}")]
    ServiceUnavailable { url: String, reason: String },
    /// 模型列表中找不到目标模型
    #[error("模型 {model} 不在可用模型列表中: {available:?}")]
    ModelNotFound {
        model: String,
        available: Vec<String>,
    },
    /// 网络请求失败
    #[error("请求失败 ({endpoint}): {message}")]
    Transport { endpoint: String, message: String },
    /// 服务返回错误状态码
    #[error("服务返回错误状态 {status}: {body}")]
    BadStatus { status: u16, body: String },
    /// 单次请求超时
    #[error("请求超时 ({secs:.1}s)")]
    Timeout { secs: f64 },
    /// 响应体不是预期的 JSON
    #[error("响应体无效: {0}")]
    InvalidBody(String),
    /// 模型输出无法解析
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// 模型输出解析错误
#[derive(Debug, Error)]
pub enum ParseError {
    /// 返回内容为空
    #[error("模型返回内容为空")]
    EmptyResponse,
    /// 提取和修复后仍无法解析
    #[error("无法从模型输出中解析 JSON (前 200 字符: {preview})")]
    Undecodable { preview: String },
    /// 缺少必需的键
    #[error("模型输出缺少键 {key}, 已有键: {present:?}")]
    MissingKey { key: String, present: Vec<String> },
    /// 键对应的值不是列表
    #[error("键 {key} 的值必须是列表")]
    NotAList { key: String },
}

/// 表格存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    /// 文件读写失败
    #[error("文件操作失败 ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// CSV 读写失败
    #[error("CSV 处理失败 ({path}): {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    /// 写入暂存文件或替换原文件失败
    #[error("暂存写入失败 ({path}): {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// 元数据文件（JSON）读写失败
    #[error("元数据处理失败 ({path}): {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// 表头缺少必需的列
    #[error("表头缺少必需的列: {column}")]
    MissingColumn { column: String },
    /// 内部锁被污染
    #[error("内部锁错误")]
    LockPoisoned,
}

/// 批处理错误
#[derive(Debug, Error)]
pub enum BatchError {
    /// 请求中没有有效文件
    #[error("没有可处理的有效文件")]
    NoValidFiles,
    /// 批次不存在
    #[error("批次不存在: {0}")]
    UnknownBatch(String),
    /// 文件不存在
    #[error("文件不存在: {0}")]
    UnknownFile(String),
    /// 行不存在
    #[error("文件 {file_id} 中不存在第 {index} 行")]
    RowNotFound { file_id: String, index: usize },
    /// 后台任务异常终止
    #[error("后台任务执行失败: {0}")]
    TaskFailed(String),
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
    /// 读取配置文件失败
    #[error("读取配置文件失败 ({path}): {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

// ========== 便捷构造函数 ==========

impl LlmError {
    /// 根据 reqwest 错误构造请求失败错误
    pub fn transport(endpoint: impl Into<String>, err: &reqwest::Error) -> Self {
        LlmError::Transport {
            endpoint: endpoint.into(),
            message: err.to_string(),
        }
    }
}

impl StoreError {
    /// 创建文件读写错误
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    /// 创建 CSV 错误
    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        StoreError::Csv {
            path: path.into(),
            source,
        }
    }

    /// 创建暂存写入错误
    pub fn staging(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Staging {
            path: path.into(),
            source,
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        StoreError::LockPoisoned
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

/// 存储层结果类型
pub type StoreResult<T> = Result<T, StoreError>;
