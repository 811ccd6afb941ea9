//! 运行取消信号

use tokio::sync::watch;

/// 发送端，调用 `cancel` 后所有信号都会触发
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: std::sync::Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// 接收端
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn new() -> (CancelHandle, Self) {
        let (tx, rx) = watch::channel(false);
        (
            CancelHandle {
                tx: std::sync::Arc::new(tx),
            },
            Self { rx },
        )
    }

    /// 永远不会触发的信号
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// 等待取消；发送端已释放且未取消时永远挂起
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let (handle, mut signal) = CancelSignal::new();
        let waiter = tokio::spawn(async move {
            signal.cancelled().await;
            true
        });
        handle.cancel();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_never_stays_pending() {
        let mut signal = CancelSignal::never();
        assert!(!signal.is_cancelled());
        let waited = tokio::time::timeout(Duration::from_millis(50), signal.cancelled()).await;
        assert!(waited.is_err());
    }
}
