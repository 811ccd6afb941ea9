use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use assignment_evaluator::{logger, App, CancelSignal, Config, DiscoveryScope, EvalError};
use clap::Parser;
use tracing::{error, warn};

/// 评估学生提交的电子表格作业，并把结果追加到报告
#[derive(Debug, Parser)]
#[command(name = "assignment-evaluator", version, about)]
struct Cli {
    /// 作业标识（assignments/ 下的目录名），为空时评估全部作业
    #[arg(default_value = "")]
    assignment: String,

    /// 只评估最近修改的作业目录
    #[arg(long, conflicts_with = "assignment")]
    latest: bool,

    /// 仓库根目录
    #[arg(long, env = "EVAL_ROOT")]
    root: Option<PathBuf>,

    /// 显示详细日志
    #[arg(short, long)]
    verbose: bool,
}

/// 正常结束
const EXIT_OK: u8 = 0;
/// 运行级错误
const EXIT_FAILURE: u8 = 1;
/// 被 Ctrl-C 取消
const EXIT_CANCELLED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // 加载配置
    let mut config = Config::from_env();
    if let Some(root) = cli.root.clone() {
        config.root = root;
    }
    config.verbose_logging |= cli.verbose;

    // 初始化日志
    logger::init_with_verbose(config.verbose_logging);

    let scope = if cli.latest {
        DiscoveryScope::Latest
    } else {
        DiscoveryScope::from_identifier(&cli.assignment)
    };

    match run(config, scope).await {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(e) => match e.downcast_ref::<EvalError>() {
            Some(EvalError::Cancelled) => ExitCode::from(EXIT_CANCELLED),
            _ => {
                error!("❌ {:#}", e);
                ExitCode::from(EXIT_FAILURE)
            }
        },
    }
}

async fn run(config: Config, scope: DiscoveryScope) -> Result<()> {
    let (handle, cancel) = CancelSignal::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("⏹️ 收到中断信号，正在停止...");
            handle.cancel();
        }
    });

    // 初始化并运行应用
    let mut app = App::initialize(config).await?;
    app.run(scope, cancel).await?;

    Ok(())
}
