use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{EvalError, EvalResult};
use crate::host::connection::{probe, wait_for_host, Readiness};

/// 评估主机启动参数
#[derive(Debug, Clone)]
pub struct HostLaunchOptions {
    pub addr: String,
    pub command: String,
    pub args: Vec<String>,
    pub startup_timeout: Duration,
    pub poll_interval: Duration,
}

impl HostLaunchOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            addr: config.host_addr(),
            command: config.host_command.clone(),
            args: config.expanded_host_args(),
            startup_timeout: config.host_startup_timeout,
            poll_interval: config.host_poll_interval,
        }
    }
}

/// 运行中的评估主机
///
/// 如果主机是本进程启动的，`shutdown` 会结束它；复用已有主机时不做任何事。
#[derive(Debug)]
pub struct HostProcess {
    addr: String,
    child: Option<Child>,
}

impl HostProcess {
    pub async fn shutdown(mut self) {
        if let Some(mut child) = self.child.take() {
            info!("正在关闭评估主机 ({})", self.addr);
            if let Err(e) = child.kill().await {
                warn!("关闭评估主机失败: {}", e);
            }
        }
    }
}

/// 确保无头评估主机可用
///
/// 主机已经在监听时直接复用；否则启动进程并轮询直到就绪或超时。
pub async fn launch_headless_host(options: &HostLaunchOptions) -> EvalResult<HostProcess> {
    if probe(&options.addr).await {
        info!("✓ 评估主机已在运行: {}", options.addr);
        return Ok(HostProcess {
            addr: options.addr.clone(),
            child: None,
        });
    }

    info!("🚀 启动无头评估主机...");
    debug!("命令: {} {:?}", options.command, options.args);

    let mut child = Command::new(&options.command)
        .args(&options.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            error!("启动评估主机失败: {}", e);
            EvalError::host_unavailable(
                &options.addr,
                format!("无法启动 {}: {}", options.command, e),
            )
        })?;

    let readiness = wait_for_host(
        &options.addr,
        options.startup_timeout,
        options.poll_interval,
        Some(&mut child),
    )
    .await;

    match readiness {
        Readiness::Ready { waited } => {
            info!(
                "✅ 评估主机已启动: {} (等待 {} ms)",
                options.addr,
                waited.as_millis()
            );
            Ok(HostProcess {
                addr: options.addr.clone(),
                child: Some(child),
            })
        }
        Readiness::TimedOut { waited } => {
            let _ = child.kill().await;
            error!(
                "评估主机在 {} ms 内未就绪",
                waited.as_millis()
            );
            Err(EvalError::host_unavailable(
                &options.addr,
                format!("启动超时 ({} ms)", waited.as_millis()),
            ))
        }
        Readiness::Exited { waited } => Err(EvalError::host_unavailable(
            &options.addr,
            format!("主机进程在就绪前退出 ({} ms)", waited.as_millis()),
        )),
    }
}
