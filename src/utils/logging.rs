//! 日志工具模块
//!
//! 提供日志初始化、格式化和输出的辅助函数

use anyhow::Result;
use std::fs::{self, OpenOptions};
use std::io::Write;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::orchestrator::SubmitReport;
use crate::view_model::ListSummary;

/// 初始化 tracing
///
/// 优先使用 `RUST_LOG`，否则按 `verbose` 选择 debug 或 info
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // 重复初始化（例如测试中）时忽略
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// 初始化日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init_log_file(log_file_path: &str) -> Result<()> {
    let log_header = format!(
        "{}\n附件上传日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)?;
    Ok(())
}

/// 追加一行到日志文件
pub fn append_log(log_file_path: &str, line: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path)?;
    writeln!(file, "{}", line)?;
    Ok(())
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 附件上传模式");
    info!("📦 上传管理器: {}", config.upload_identifier);
    info!("🗂️ 共享容器: {}", config.shared_container_identifier);
    info!("📊 最大并发上传数: {}", config.max_concurrent_uploads);
    info!("⏱️ 后台活动时长: {}ms", config.activity_timeout_ms);
    info!("{}", "=".repeat(60));
}

/// 记录提交结果
pub fn log_submit_report(report: &SubmitReport) {
    info!(
        "[批次 {}] ✓ 已注册 {} 个文件，失败 {} 个",
        report.batch_id,
        report.registered.len(),
        report.failures.len()
    );
    for failure in &report.failures {
        info!("[批次 {}]   - {}", report.batch_id, failure);
    }
}

/// 打印最终统计信息
pub fn print_final_stats(batch_id: &str, summary: &ListSummary, log_file_path: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📊 [批次 {}] 上传完成统计", batch_id);
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}/{}", summary.completed, summary.total_files);
    info!("❌ 失败: {}", summary.failed);
    info!("📦 总大小: {}", bytesize::ByteSize(summary.total_bytes));
    info!("{}", "=".repeat(60));
    info!("\n日志已保存至: {}", log_file_path);
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
