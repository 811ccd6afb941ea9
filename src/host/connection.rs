use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::process::Child;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// 单次探测的超时
const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// 主机就绪检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// 主机已可连接
    Ready { waited: Duration },
    /// 超时仍不可连接
    TimedOut { waited: Duration },
    /// 被监视的主机进程在就绪前退出
    Exited { waited: Duration },
}

/// 探测主机端口是否可连接
pub async fn probe(addr: &str) -> bool {
    matches!(
        timeout(PROBE_TIMEOUT, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

/// 轮询直到主机可连接或超时
///
/// 传入 `child` 时同时检查该进程是否已提前退出。
pub async fn wait_for_host(
    addr: &str,
    max_wait: Duration,
    poll_interval: Duration,
    mut child: Option<&mut Child>,
) -> Readiness {
    info!("正在等待评估主机就绪: {}", addr);
    debug!("最长等待: {:?}, 轮询间隔: {:?}", max_wait, poll_interval);

    let started = Instant::now();
    loop {
        if probe(addr).await {
            let waited = started.elapsed();
            info!("✓ 评估主机已就绪 (等待 {} ms)", waited.as_millis());
            return Readiness::Ready { waited };
        }

        if let Some(child) = child.as_deref_mut() {
            if let Ok(Some(status)) = child.try_wait() {
                warn!("评估主机进程已退出: {}", status);
                return Readiness::Exited {
                    waited: started.elapsed(),
                };
            }
        }

        let waited = started.elapsed();
        if waited >= max_wait {
            return Readiness::TimedOut { waited };
        }
        sleep(poll_interval.min(max_wait - waited)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_ready_when_listening() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let readiness =
            wait_for_host(&addr, Duration::from_secs(2), Duration::from_millis(50), None).await;
        assert!(matches!(readiness, Readiness::Ready { .. }));
    }

    #[tokio::test]
    async fn test_times_out_when_nothing_listens() {
        // 绑定后立即释放，得到一个大概率空闲的端口
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let readiness =
            wait_for_host(&addr, Duration::from_millis(200), Duration::from_millis(50), None).await;
        assert!(matches!(readiness, Readiness::TimedOut { waited } if waited >= Duration::from_millis(200)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reports_early_exit_of_watched_process() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let mut child = tokio::process::Command::new("true").spawn().unwrap();
        let readiness = wait_for_host(
            &addr,
            Duration::from_secs(5),
            Duration::from_millis(50),
            Some(&mut child),
        )
        .await;
        assert!(matches!(readiness, Readiness::Exited { waited } if waited < Duration::from_secs(5)));
    }
}
