/// 日志工具模块
///
/// 提供日志初始化、格式化和输出的辅助函数
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// 初始化全局日志
///
/// 优先使用 `RUST_LOG`，否则按 `verbose` 选择 debug 或 info 级别。
/// 重复调用不会报错（测试中常见）
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 配置加载之前决定日志级别：读取 `VERBOSE_LOGGING`，无法解析时按 false
pub fn verbose_from_env() -> bool {
    parse_verbose(std::env::var("VERBOSE_LOGGING").ok().as_deref())
}

fn parse_verbose(value: Option<&str>) -> bool {
    value
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(false)
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 问答批量生成模式");
    info!("🤖 模型: {} @ {}", config.model_name, config.ollama_url);
    info!("📁 数据目录: {}", config.data_dir);
    info!("📊 每行问答数量: {}", config.default_qa_count);
    info!("{}", "=".repeat(60));
}

/// 记录批次开始信息
///
/// # 参数
/// - `batch_id`: 批次ID
/// - `total_files`: 文件数
/// - `total_rows`: 总行数
/// - `qa_count`: 每行问答数量
pub fn log_batch_start(batch_id: &str, total_files: usize, total_rows: usize, qa_count: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📦 开始批次 {}", batch_id);
    info!(
        "📄 文件: {} 个 / 共 {} 行 / 每行 {} 组问答",
        total_files, total_rows, qa_count
    );
    info!("{}", "=".repeat(60));
}

/// 记录单个文件完成信息
pub fn log_file_complete(file_id: &str, generated: usize, skipped: usize, failed: usize, total: usize) {
    info!("\n{}", "─".repeat(60));
    info!(
        "✓ [文件 {}] 处理完成: 生成 {} / 跳过 {} / 失败 {} / 共 {} 行",
        file_id, generated, skipped, failed, total
    );
    info!("{}", "─".repeat(60));
}

/// 打印最终统计信息
///
/// # 参数
/// - `generated`: 生成成功的行数
/// - `total_rows`: 总行数
/// - `saved`: 写回成功的行数
/// - `errors`: 写回失败的行数
pub fn print_final_stats(generated: usize, total_rows: usize, saved: usize, errors: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 生成: {}/{}", generated, total_rows);
    info!("💾 写回: {}", saved);
    info!("❌ 写回失败: {}", errors);
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_counts_chars_not_bytes() {
        assert_eq!(truncate_text("धर्मक्षेत्रे", 3), "धर्...");
        assert_eq!(truncate_text("short", 10), "short");
    }

    #[test]
    fn test_parse_verbose() {
        assert!(parse_verbose(Some("true")));
        assert!(parse_verbose(Some(" true ")));
        assert!(!parse_verbose(Some("false")));
        assert!(!parse_verbose(Some("yes")));
        assert!(!parse_verbose(None));
    }
}
