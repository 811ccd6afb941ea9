//! 日志工具模块
//!
//! 提供运行过程中的格式化输出

use tracing::info;

use crate::config::Config;
use crate::models::{ResultRecord, Status};
use crate::orchestrator::evaluator::BatchSummary;
use crate::workflow::AssignmentCtx;

/// 记录程序启动信息
pub fn log_startup(config: &Config, target: &str) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 作业自动评估");
    info!("🎯 评估范围: {}", target);
    info!("📁 根目录: {}", config.root.display());
    info!("🖥️ 评估主机: {}", config.host_addr());
    info!("{}", "=".repeat(60));
}

/// 记录发现的提交数量
pub fn log_assignments_found(total: usize) {
    info!("✓ 找到 {} 份待评估的提交", total);
    info!("💡 逐份评估，每份结束后立即写入报告\n");
}

/// 记录单个作业开始
pub fn log_assignment_start(ctx: &AssignmentCtx) {
    info!("\n{}", "─".repeat(60));
    info!("{} 📝 开始评估", ctx);
}

/// 记录单个作业结束
pub fn log_assignment_done(ctx: &AssignmentCtx, record: &ResultRecord) {
    let mark = match record.status {
        Status::Pass => "✅",
        Status::Partial => "🟡",
        Status::Fail => "❌",
        Status::Error => "⚠️",
    };
    info!(
        "{} {} {} | 得分 {}% | {}",
        ctx,
        mark,
        record.status,
        record.score,
        truncate_text(&record.diagnostic, 80)
    );
}

/// 打印最终统计信息
pub fn print_final_stats(summary: &BatchSummary, report_path: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部评估完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("📥 下载: {} | 获取失败: {}", summary.fetched, summary.acquisition_failures);
    info!("✅ 通过: {}/{}", summary.passed, summary.total);
    info!("🟡 部分通过: {}", summary.partial);
    info!("❌ 未通过: {}", summary.failed);
    info!("⚠️ 评估出错: {}", summary.errored);
    info!("{}", "=".repeat(60));
    info!("\n报告已保存至: {}", report_path);
}

/// 截断长文本用于日志显示
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
    fn test_truncate_text() {
        assert_eq!(truncate_text("abc", 5), "abc");
        assert_eq!(truncate_text("评估主机不可用", 4), "评估主机...");
    }
}
