//! 评估会话 - 基础设施层
//!
//! 会话是整个运行期间唯一持有主机连接的对象，由评估器独占。
//! 每次提取都会打开一个全新的文档并在结束时关闭，防止上一个作业的状态泄漏到下一个。

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{EvalError, EvalResult};
use crate::infrastructure::host_client::{DocumentHost, SocketHost};
use crate::models::{CellRange, CellValue};

/// 会话连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// 建立主机连接的方式
#[async_trait]
pub trait HostConnector: Send + Sync {
    async fn connect(&self) -> EvalResult<Box<dyn DocumentHost>>;

    fn address(&self) -> String;
}

/// TCP 连接器
pub struct SocketConnector {
    addr: String,
    request_timeout: Duration,
}

impl SocketConnector {
    pub fn new(addr: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            request_timeout,
        }
    }
}

#[async_trait]
impl HostConnector for SocketConnector {
    async fn connect(&self) -> EvalResult<Box<dyn DocumentHost>> {
        let host = SocketHost::connect(&self.addr, self.request_timeout).await?;
        Ok(Box::new(host))
    }

    fn address(&self) -> String {
        self.addr.clone()
    }
}

/// 一次读取请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub sheet: Option<String>,
    pub range: CellRange,
}

/// 与评估主机的会话
pub struct EvaluationSession {
    connector: Box<dyn HostConnector>,
    host: Option<Box<dyn DocumentHost>>,
    state: SessionState,
}

impl EvaluationSession {
    pub fn new(connector: Box<dyn HostConnector>) -> Self {
        Self {
            connector,
            host: None,
            state: SessionState::Disconnected,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// 建立连接
    pub async fn connect(&mut self) -> EvalResult<()> {
        if self.state == SessionState::Connected && self.host.is_some() {
            return Ok(());
        }

        self.state = SessionState::Connecting;
        match self.connector.connect().await {
            Ok(host) => {
                self.host = Some(host);
                self.state = SessionState::Connected;
                info!("✓ 已连接评估主机: {}", self.connector.address());
                Ok(())
            }
            Err(e) => {
                self.host = None;
                self.state = SessionState::Failed;
                Err(match e {
                    EvalError::HostUnavailable { .. } => e,
                    other => EvalError::host_unavailable(self.connector.address(), other.to_string()),
                })
            }
        }
    }

    /// 打开文档、依次读取所有区域、关闭文档
    ///
    /// 读取失败时仍会尝试关闭文档；请求超时后会重建连接，
    /// 避免迟到的响应被下一个作业读到。
    pub async fn extract(
        &mut self,
        document: &Path,
        requests: &[ReadRequest],
    ) -> EvalResult<Vec<Vec<Vec<CellValue>>>> {
        let addr = self.connector.address();
        let outcome = {
            let host = self
                .host
                .as_mut()
                .ok_or_else(|| EvalError::host_unavailable(&addr, "会话未连接"))?;
            extract_with(host, document, requests).await
        };

        if let Err(e) = &outcome {
            self.after_failure(e).await;
        }
        outcome
    }

    /// 失败后的连接处理
    async fn after_failure(&mut self, error: &EvalError) {
        match error {
            EvalError::HostTimeout { .. } => {
                warn!("主机请求超时，重建连接以丢弃未完成的响应");
                if let Some(mut host) = self.host.take() {
                    let _ = host.disconnect().await;
                }
                self.state = SessionState::Disconnected;
                if let Err(e) = self.connect().await {
                    warn!("重建连接失败: {}", e);
                }
            }
            EvalError::HostUnavailable { .. } => {
                self.host = None;
                self.state = SessionState::Failed;
            }
            _ => {}
        }
    }

    /// 关闭会话，所有退出路径都会调用
    pub async fn close(&mut self) {
        if let Some(mut host) = self.host.take() {
            if let Err(e) = host.disconnect().await {
                debug!("断开主机连接时出错: {}", e);
            }
            info!("评估主机会话已关闭");
        }
        if self.state != SessionState::Failed {
            self.state = SessionState::Disconnected;
        }
    }
}

async fn extract_with(
    host: &mut Box<dyn DocumentHost>,
    document: &Path,
    requests: &[ReadRequest],
) -> EvalResult<Vec<Vec<Vec<CellValue>>>> {
    let handle = host.load(document).await?;
    debug!("文档已打开: {} ({})", document.display(), handle.id);

    let mut results = Vec::with_capacity(requests.len());
    let mut failure = None;
    for request in requests {
        match host
            .read(&handle, request.sheet.as_deref(), &request.range)
            .await
        {
            Ok(values) => results.push(values),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    // 主机已断开或超时时无法再关闭文档
    let host_lost = matches!(
        failure,
        Some(EvalError::HostUnavailable { .. }) | Some(EvalError::HostTimeout { .. })
    );
    if !host_lost {
        let id = handle.id.clone();
        if let Err(e) = host.close(handle).await {
            warn!("关闭文档 {} 失败: {}", id, e);
            if failure.is_none() && (e.is_run_level() || matches!(e, EvalError::HostTimeout { .. })) {
                failure = Some(e);
            }
        }
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(results),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! 内存中的假主机，记录每一次调用

    use super::*;
    use crate::infrastructure::host_client::DocumentHandle;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    pub struct HostLog {
        pub calls: Vec<String>,
        pub open_documents: usize,
        pub max_open_documents: usize,
        pub connects: usize,
    }

    /// 每个文档返回固定的区域值；`failing_ranges` 中的区域返回结构错误
    #[derive(Clone, Default)]
    pub struct FakeHost {
        pub log: Arc<Mutex<HostLog>>,
        pub documents: HashMap<PathBuf, Vec<Vec<CellValue>>>,
        pub failing_ranges: Vec<String>,
        next_id: usize,
    }

    #[async_trait]
    impl DocumentHost for FakeHost {
        async fn load(&mut self, path: &Path) -> EvalResult<DocumentHandle> {
            if !self.documents.contains_key(path) {
                return Err(EvalError::HostProtocol {
                    operation: "load".into(),
                    message: "unknown document".into(),
                });
            }
            self.next_id += 1;
            let mut log = self.log.lock().unwrap();
            log.calls.push(format!("load {}", path.display()));
            log.open_documents += 1;
            log.max_open_documents = log.max_open_documents.max(log.open_documents);
            Ok(DocumentHandle {
                id: format!("doc-{}", self.next_id),
                path: path.to_path_buf(),
            })
        }

        async fn read(
            &mut self,
            document: &DocumentHandle,
            _sheet: Option<&str>,
            range: &CellRange,
        ) -> EvalResult<Vec<Vec<CellValue>>> {
            self.log
                .lock()
                .unwrap()
                .calls
                .push(format!("read {} {}", document.id, range));
            if self.failing_ranges.contains(&range.to_string()) {
                return Err(EvalError::schema(range.to_string(), "out_of_range"));
            }
            let grid = &self.documents[&document.path];
            let mut rows = Vec::new();
            for r in 0..range.rows() {
                let mut row = Vec::new();
                for c in 0..range.columns() {
                    let cell = range.cell_at(r, c);
                    let value = grid
                        .get(cell.row as usize)
                        .and_then(|cols| cols.get(cell.column as usize))
                        .cloned()
                        .unwrap_or(CellValue::Empty);
                    row.push(value);
                }
                rows.push(row);
            }
            Ok(rows)
        }

        async fn close(&mut self, document: DocumentHandle) -> EvalResult<()> {
            let mut log = self.log.lock().unwrap();
            log.calls.push(format!("close {}", document.id));
            log.open_documents -= 1;
            Ok(())
        }

        async fn disconnect(&mut self) -> EvalResult<()> {
            self.log.lock().unwrap().calls.push("disconnect".into());
            Ok(())
        }
    }

    pub struct FakeConnector {
        pub host: FakeHost,
        pub available: bool,
    }

    #[async_trait]
    impl HostConnector for FakeConnector {
        async fn connect(&self) -> EvalResult<Box<dyn DocumentHost>> {
            if !self.available {
                return Err(EvalError::host_unavailable("fake", "offline"));
            }
            self.host.log.lock().unwrap().connects += 1;
            Ok(Box::new(self.host.clone()))
        }

        fn address(&self) -> String {
            "fake".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{FakeConnector, FakeHost};
    use super::*;
    use std::path::PathBuf;

    fn session_with(host: FakeHost) -> EvaluationSession {
        EvaluationSession::new(Box::new(FakeConnector {
            host,
            available: true,
        }))
    }

    fn request(range: &str) -> ReadRequest {
        ReadRequest {
            sheet: None,
            range: range.parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_each_extract_uses_fresh_document() {
        let mut host = FakeHost::default();
        host.documents.insert(
            PathBuf::from("a.csv"),
            vec![vec![CellValue::Number(1.0)]],
        );
        host.documents.insert(
            PathBuf::from("b.csv"),
            vec![vec![CellValue::Number(2.0)]],
        );
        let log = host.log.clone();
        let mut session = session_with(host);
        session.connect().await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);

        let a = session.extract(Path::new("a.csv"), &[request("A1")]).await.unwrap();
        let b = session.extract(Path::new("b.csv"), &[request("A1")]).await.unwrap();
        assert_eq!(a[0][0][0], CellValue::Number(1.0));
        assert_eq!(b[0][0][0], CellValue::Number(2.0));

        let log = log.lock().unwrap();
        assert_eq!(log.max_open_documents, 1);
        assert_eq!(log.open_documents, 0);
        assert_eq!(
            log.calls,
            vec![
                "load a.csv",
                "read doc-1 A1",
                "close doc-1",
                "load b.csv",
                "read doc-2 A1",
                "close doc-2",
            ]
        );
    }

    #[tokio::test]
    async fn test_document_closed_after_read_failure() {
        let mut host = FakeHost::default();
        host.documents
            .insert(PathBuf::from("a.csv"), vec![vec![CellValue::Empty]]);
        host.failing_ranges.push("Z99".to_string());
        let log = host.log.clone();
        let mut session = session_with(host);
        session.connect().await.unwrap();

        let err = session
            .extract(Path::new("a.csv"), &[request("A1"), request("Z99")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "SchemaMismatchError");
        assert_eq!(session.state(), SessionState::Connected);

        let log = log.lock().unwrap();
        assert_eq!(log.open_documents, 0);
        assert_eq!(log.calls.last().map(String::as_str), Some("close doc-1"));
    }

    #[tokio::test]
    async fn test_unavailable_host_marks_session_failed() {
        let mut session = EvaluationSession::new(Box::new(FakeConnector {
            host: FakeHost::default(),
            available: false,
        }));
        let err = session.connect().await.unwrap_err();
        assert!(err.is_run_level());
        assert_eq!(session.state(), SessionState::Failed);

        let err = session
            .extract(Path::new("a.csv"), &[request("A1")])
            .await
            .unwrap_err();
        assert!(err.is_run_level());
    }

    #[tokio::test]
    async fn test_close_releases_connection() {
        let host = FakeHost::default();
        let log = host.log.clone();
        let mut session = session_with(host);
        session.connect().await.unwrap();
        session.close().await;
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(log.lock().unwrap().calls, vec!["disconnect"]);
    }
}
