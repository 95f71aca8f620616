/// 日志工具模块
///
/// 提供日志初始化和日志格式化的辅助函数
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// 初始化日志
///
/// 优先使用 `RUST_LOG`，否则按配置决定 info / debug 级别。
/// 可以重复调用，已初始化时忽略。
pub fn init(config: &Config) {
    let default_level = if config.verbose_logging { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录会话启动信息
///
/// # 参数
/// - `mock_id`: 模考ID
/// - `section_id`: 部分ID
/// - `limit_seconds`: 时间限制（秒）
pub fn log_session_start(mock_id: i64, section_id: i64, limit_seconds: u32) {
    info!("{}", "=".repeat(60));
    info!("🚀 会话开始 - mock {} / section {}", mock_id, section_id);
    info!(
        "⏱️ 时间限制: {} 秒 ({})",
        limit_seconds,
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
}

/// 记录会话结束信息
///
/// # 参数
/// - `mock_id`: 模考ID
/// - `section_id`: 部分ID
/// - `answered`: 已作答题数
/// - `dropped`: 提交失败被丢弃的答案数
pub fn log_session_finish(mock_id: i64, section_id: i64, answered: usize, dropped: usize) {
    info!("\n{}", "─".repeat(60));
    info!("📊 会话结束 - mock {} / section {}", mock_id, section_id);
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("✅ 已作答: {}", answered);
    info!("❌ 未送达: {}", dropped);
    info!("{}", "─".repeat(60));
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
