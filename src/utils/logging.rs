/// 日志工具模块
///
/// 提供日志初始化和批量进度输出的辅助函数
use tracing::info;
use tracing_subscriber::EnvFilter;

/// 初始化 tracing 日志
///
/// 读取 `RUST_LOG`，未设置时使用 `info`。重复调用不会报错。
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
///
/// # 参数
/// - `provider`: 服务名
/// - `scheduling`: 调度模型
/// - `max_concurrent`: 最大并发数
pub fn log_startup(provider: &str, scheduling: &str, max_concurrent: usize) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 批量地理编码");
    info!("🌍 服务: {}", provider);
    info!("⚙️ 调度模型: {}", scheduling);
    info!("📊 最大并发数: {}", max_concurrent);
    info!("{}", "=".repeat(60));
}

/// 记录批量开始信息
///
/// # 参数
/// - `provider`: 服务名
/// - `strategy`: 批量策略（fan-out / native bulk）
pub fn log_batch_start(provider: &str, strategy: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📦 [{}] 开始批量处理 ({})", provider, strategy);
    info!("{}", "=".repeat(60));
}

/// 记录批量完成信息
///
/// # 参数
/// - `provider`: 服务名
/// - `matched`: 有结果的数量
/// - `unmatched`: 没有匹配的数量
/// - `failed`: 出错的数量
pub fn log_batch_complete(provider: &str, matched: usize, unmatched: usize, failed: usize) {
    info!("\n{}", "─".repeat(60));
    info!(
        "✓ [{}] 批量完成: 找到 {}/{}，无匹配 {}，失败 {}",
        provider,
        matched,
        matched + unmatched + failed,
        unmatched,
        failed
    );
    info!("{}", "─".repeat(60));
}

/// 打印最终统计信息
///
/// # 参数
/// - `matched`: 有结果的数量
/// - `failed`: 失败数量
/// - `total`: 总数
pub fn print_final_stats(matched: usize, failed: usize, total: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 找到: {}/{}", matched, total);
    info!("❌ 失败: {}", failed);
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
    fn test_truncate_text_counts_chars() {
        assert_eq!(truncate_text("Élysée", 3), "Ély...");
        assert_eq!(truncate_text("Paris", 10), "Paris");
    }

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
    }
}
