//! 评估主机客户端 - 基础设施层
//!
//! 持有唯一的主机连接，只暴露"打开文档 / 读取区域 / 关闭文档"三种能力。
//!
//! 协议：TCP 上逐行 JSON，一个请求对应一行响应。
//!
//! ```text
//! → {"op":"load","path":"/abs/path/mario-rossi.xlsx"}
//! ← {"ok":true,"document":"doc-1"}
//! → {"op":"read","document":"doc-1","sheet":null,"range":"A1:C3"}
//! ← {"ok":true,"values":[[1,2,3],[null,"x",true],[4,5,6]]}
//! → {"op":"close","document":"doc-1"}
//! ← {"ok":true}
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{EvalError, EvalResult};
use crate::models::{CellRange, CellValue};

/// 主机上已打开的文档
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentHandle {
    pub id: String,
    pub path: PathBuf,
}

/// 文档主机能力
///
/// `&mut self` 保证同一时刻只有一个调用方使用连接
#[async_trait]
pub trait DocumentHost: Send {
    /// 请求主机加载文档
    async fn load(&mut self, path: &Path) -> EvalResult<DocumentHandle>;

    /// 读取区域内的计算值，按行返回
    async fn read(
        &mut self,
        document: &DocumentHandle,
        sheet: Option<&str>,
        range: &CellRange,
    ) -> EvalResult<Vec<Vec<CellValue>>>;

    /// 关闭文档
    async fn close(&mut self, document: DocumentHandle) -> EvalResult<()>;

    /// 断开连接
    async fn disconnect(&mut self) -> EvalResult<()>;
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HostRequest<'a> {
    Load {
        path: &'a str,
    },
    Read {
        document: &'a str,
        sheet: Option<&'a str>,
        range: String,
    },
    Close {
        document: &'a str,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostResponse {
    pub ok: bool,
    #[serde(default)]
    pub document: Option<String>,
    #[serde(default)]
    pub values: Option<Vec<Vec<CellValue>>>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// 表示文档结构不匹配的错误码
const SCHEMA_ERROR_CODES: &[&str] = &["no_such_sheet", "out_of_range", "invalid_range"];

/// 基于 TCP 的主机客户端
pub struct SocketHost {
    addr: String,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    request_timeout: Duration,
}

impl SocketHost {
    /// 连接到主机
    pub async fn connect(addr: &str, request_timeout: Duration) -> EvalResult<Self> {
        debug!("正在连接评估主机: {}", addr);

        let stream = timeout(request_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| EvalError::host_unavailable(addr, "连接超时"))?
            .map_err(|e| EvalError::host_unavailable(addr, e.to_string()))?;
        let _ = stream.set_nodelay(true);

        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            addr: addr.to_string(),
            reader: BufReader::new(read_half),
            writer: write_half,
            request_timeout,
        })
    }

    /// 发送一个请求并等待一行响应
    async fn round_trip(
        &mut self,
        operation: &str,
        request: &HostRequest<'_>,
    ) -> EvalResult<HostResponse> {
        let mut line = serde_json::to_string(request).map_err(|e| EvalError::HostProtocol {
            operation: operation.to_string(),
            message: e.to_string(),
        })?;
        line.push('\n');

        let request_timeout = self.request_timeout;
        let writer = &mut self.writer;
        let reader = &mut self.reader;
        let exchange = async move {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await?;
            let mut buf = String::new();
            let n = reader.read_line(&mut buf).await?;
            Ok::<_, std::io::Error>((n, buf))
        };

        let (n, buf) = match timeout(request_timeout, exchange).await {
            Err(_) => {
                return Err(EvalError::HostTimeout {
                    operation: operation.to_string(),
                    timeout: request_timeout,
                })
            }
            Ok(Err(e)) => return Err(EvalError::host_unavailable(&self.addr, e.to_string())),
            Ok(Ok(result)) => result,
        };

        if n == 0 {
            return Err(EvalError::host_unavailable(&self.addr, "连接已被主机关闭"));
        }

        debug!("主机响应 ({}): {}", operation, buf.trim_end());

        serde_json::from_str(buf.trim_end()).map_err(|e| EvalError::HostProtocol {
            operation: operation.to_string(),
            message: format!("无法解析响应: {}", e),
        })
    }
}

/// 把失败的响应转换为错误
fn response_error(operation: &str, location: &str, response: &HostResponse) -> EvalError {
    let message = response
        .error
        .clone()
        .unwrap_or_else(|| "未知错误".to_string());
    match response.code.as_deref() {
        Some(code) if SCHEMA_ERROR_CODES.contains(&code) => {
            EvalError::schema(location, format!("{}: {}", code, message))
        }
        _ => EvalError::HostProtocol {
            operation: operation.to_string(),
            message,
        },
    }
}

#[async_trait]
impl DocumentHost for SocketHost {
    async fn load(&mut self, path: &Path) -> EvalResult<DocumentHandle> {
        let path_str = path.to_string_lossy().to_string();
        let response = self
            .round_trip("load", &HostRequest::Load { path: &path_str })
            .await?;

        if !response.ok {
            return Err(response_error("load", &path_str, &response));
        }

        let id = response.document.ok_or_else(|| EvalError::HostProtocol {
            operation: "load".to_string(),
            message: "响应缺少 document 字段".to_string(),
        })?;

        Ok(DocumentHandle {
            id,
            path: path.to_path_buf(),
        })
    }

    async fn read(
        &mut self,
        document: &DocumentHandle,
        sheet: Option<&str>,
        range: &CellRange,
    ) -> EvalResult<Vec<Vec<CellValue>>> {
        let location = match sheet {
            Some(sheet) => format!("{}!{}", sheet, range),
            None => range.to_string(),
        };
        let response = self
            .round_trip(
                "read",
                &HostRequest::Read {
                    document: &document.id,
                    sheet,
                    range: range.to_string(),
                },
            )
            .await?;

        if !response.ok {
            return Err(response_error("read", &location, &response));
        }

        let values = response.values.unwrap_or_default();

        // 返回的形状必须与请求的区域一致
        let shape_ok = values.len() == range.rows()
            && values.iter().all(|row| row.len() == range.columns());
        if !shape_ok {
            return Err(EvalError::schema(
                location,
                format!(
                    "返回的数据尺寸与区域不一致 (期望 {}x{}, 实际 {} 行)",
                    range.rows(),
                    range.columns(),
                    values.len()
                ),
            ));
        }

        Ok(values)
    }

    async fn close(&mut self, document: DocumentHandle) -> EvalResult<()> {
        let response = self
            .round_trip("close", &HostRequest::Close { document: &document.id })
            .await?;
        if !response.ok {
            return Err(response_error(
                "close",
                &document.path.display().to_string(),
                &response,
            ));
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> EvalResult<()> {
        // 关闭写端，主机会在读到 EOF 后释放该连接上的文档
        let _ = self.writer.shutdown().await;
        Ok(())
    }
}
