use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// 程序配置文件
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// CSV 文件及元数据存放目录
    pub data_dir: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 每条记录默认生成的问答数量
    pub default_qa_count: usize,
    /// 两行之间的等待时间（毫秒）
    pub row_delay_ms: u64,
    // --- 生成服务配置 ---
    pub ollama_url: String,
    pub model_name: String,
    /// 单次生成的最大尝试次数
    pub max_retries: u32,
    /// 重试退避基数（秒）
    pub retry_backoff_secs: f64,
    /// 单次请求超时（秒）
    pub gen_timeout_secs: f64,
    /// 健康检查超时（秒）
    pub health_timeout_secs: f64,
    pub max_output_tokens: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            verbose_logging: false,
            default_qa_count: 4,
            row_delay_ms: 100,
            ollama_url: "http://localhost:11434".to_string(),
            model_name: "gpt-oss:120b".to_string(),
            max_retries: 3,
            retry_backoff_secs: 1.0,
            gen_timeout_secs: 180.0,
            health_timeout_secs: 10.0,
            max_output_tokens: 4096,
        }
    }
}

impl Config {
    /// 只从环境变量加载（未设置或无法解析时使用默认值）
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// 加载配置：先读 `CONFIG_FILE` 指定的 TOML 文件（可选），再应用环境变量
    pub fn load() -> Result<Self, ConfigError> {
        let base = match std::env::var("CONFIG_FILE") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        Ok(base.with_env_overrides())
    }

    /// 从 TOML 文件加载，缺失的字段使用默认值
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::TomlParse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn with_env_overrides(self) -> Self {
        Self {
            data_dir: std::env::var("CSV_FOLDER").unwrap_or(self.data_dir),
            verbose_logging: env_parse("VERBOSE_LOGGING").unwrap_or(self.verbose_logging),
            default_qa_count: env_parse("QA_COUNT").unwrap_or(self.default_qa_count),
            row_delay_ms: env_parse("ROW_DELAY_MS").unwrap_or(self.row_delay_ms),
            ollama_url: std::env::var("OLLAMA_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(self.ollama_url),
            model_name: std::env::var("MODEL_NAME").unwrap_or(self.model_name),
            max_retries: env_parse("GEN_MAX_RETRIES").unwrap_or(self.max_retries),
            retry_backoff_secs: env_parse("GEN_RETRY_BACKOFF").unwrap_or(self.retry_backoff_secs),
            gen_timeout_secs: env_parse("GEN_TIMEOUT").unwrap_or(self.gen_timeout_secs),
            health_timeout_secs: env_parse("HEALTH_TIMEOUT").unwrap_or(self.health_timeout_secs),
            max_output_tokens: env_parse("MAX_OUTPUT_TOKENS").unwrap_or(self.max_output_tokens),
        }
    }

    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn gen_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.gen_timeout_secs.max(0.0))
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.health_timeout_secs.max(0.0))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs_f64(self.retry_backoff_secs.max(0.0))
    }

    pub fn row_delay(&self) -> Duration {
        Duration::from_millis(self.row_delay_ms)
    }
}

fn env_parse<T: std::str::FromStr>(var_name: &str) -> Option<T> {
    let value = std::env::var(var_name).ok()?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            let err = ConfigError::EnvVarParseFailed {
                var_name: var_name.to_string(),
                value,
                expected_type: std::any::type_name::<T>().to_string(),
            };
            tracing::warn!("⚠️ {}，使用默认值", err);
            None
        }
    }
}
