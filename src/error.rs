use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// 评估流程错误类型
///
/// 按影响范围分两类：
/// - 作业级错误：写入该作业的 `error` 记录，批次继续
/// - 运行级错误：中止整个批次，进程以非零码退出
#[derive(Debug, Error)]
pub enum EvalError {
    /// 指定的作业在远程和本地都不存在
    #[error("未找到作业: {assignment}")]
    NotFound { assignment: String },

    /// 资源获取失败（已用尽重试次数）
    #[error("资源获取失败 ({asset}, 已尝试 {attempts} 次): {message}")]
    Acquisition {
        asset: String,
        attempts: usize,
        message: String,
    },

    /// 评估主机不可达
    #[error("评估主机不可用 ({addr}): {reason}")]
    HostUnavailable { addr: String, reason: String },

    /// 期望结果引用的位置在文档中不存在
    #[error("文档结构不匹配 ({location}): {message}")]
    SchemaMismatch { location: String, message: String },

    /// 扫描提交目录失败（权限、不是目录等）
    #[error("扫描提交目录失败 ({}): {source}", .path.display())]
    Discovery {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 评分规则本身无效
    #[error("评分规则无效 ({criterion}): {message}")]
    Grading { criterion: String, message: String },

    /// 报告原子替换失败
    #[error("报告写入失败 ({}): {source}", .path.display())]
    ReportWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 主机请求超时
    #[error("评估主机请求超时 ({operation}, {}ms)", .timeout.as_millis())]
    HostTimeout {
        operation: String,
        timeout: Duration,
    },

    /// 主机返回错误响应
    #[error("评估主机返回错误 ({operation}): {message}")]
    HostProtocol { operation: String, message: String },

    /// 运行被取消
    #[error("运行已取消")]
    Cancelled,
}

impl EvalError {
    /// 是否为运行级错误
    pub fn is_run_level(&self) -> bool {
        matches!(
            self,
            EvalError::HostUnavailable { .. }
                | EvalError::ReportWrite { .. }
                | EvalError::Discovery { .. }
                | EvalError::Cancelled
                | EvalError::NotFound { .. }
        )
    }

    /// 错误分类名称，写入记录的诊断信息
    pub fn kind(&self) -> &'static str {
        match self {
            EvalError::NotFound { .. } => "NotFoundError",
            EvalError::Acquisition { .. } => "AcquisitionError",
            EvalError::HostUnavailable { .. } => "HostUnavailableError",
            EvalError::SchemaMismatch { .. } => "SchemaMismatchError",
            EvalError::Discovery { .. } => "DiscoveryError",
            EvalError::Grading { .. } => "GradingError",
            EvalError::ReportWrite { .. } => "ReportWriteError",
            EvalError::HostTimeout { .. } => "HostTimeoutError",
            EvalError::HostProtocol { .. } => "HostProtocolError",
            EvalError::Cancelled => "Cancelled",
        }
    }

    /// 复制一份同类错误，IO 来源只保留类别和描述
    pub fn duplicate(&self) -> Self {
        match self {
            EvalError::NotFound { assignment } => EvalError::NotFound {
                assignment: assignment.clone(),
            },
            EvalError::Acquisition {
                asset,
                attempts,
                message,
            } => EvalError::Acquisition {
                asset: asset.clone(),
                attempts: *attempts,
                message: message.clone(),
            },
            EvalError::HostUnavailable { addr, reason } => {
                EvalError::host_unavailable(addr.clone(), reason.clone())
            }
            EvalError::SchemaMismatch { location, message } => {
                EvalError::schema(location.clone(), message.clone())
            }
            EvalError::Discovery { path, source } => EvalError::Discovery {
                path: path.clone(),
                source: copy_io_error(source),
            },
            EvalError::Grading { criterion, message } => {
                EvalError::grading(criterion.clone(), message.clone())
            }
            EvalError::ReportWrite { path, source } => {
                EvalError::report_write(path.clone(), copy_io_error(source))
            }
            EvalError::HostTimeout { operation, timeout } => EvalError::HostTimeout {
                operation: operation.clone(),
                timeout: *timeout,
            },
            EvalError::HostProtocol { operation, message } => EvalError::HostProtocol {
                operation: operation.clone(),
                message: message.clone(),
            },
            EvalError::Cancelled => EvalError::Cancelled,
        }
    }

    // ========== 便捷构造函数 ==========

    pub fn grading(criterion: impl Into<String>, message: impl Into<String>) -> Self {
        EvalError::Grading {
            criterion: criterion.into(),
            message: message.into(),
        }
    }

    pub fn schema(location: impl Into<String>, message: impl Into<String>) -> Self {
        EvalError::SchemaMismatch {
            location: location.into(),
            message: message.into(),
        }
    }

    pub fn host_unavailable(addr: impl Into<String>, reason: impl Into<String>) -> Self {
        EvalError::HostUnavailable {
            addr: addr.into(),
            reason: reason.into(),
        }
    }

    pub fn report_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EvalError::ReportWrite {
            path: path.into(),
            source,
        }
    }
}

fn copy_io_error(err: &std::io::Error) -> std::io::Error {
    std::io::Error::new(err.kind(), err.to_string())
}

/// 远程存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    /// 资源不存在（不重试）
    #[error("远程资源不存在: {0}")]
    NotFound(String),
    /// 临时性错误（超时、连接失败、5xx），可以重试
    #[error("临时性存储错误: {0}")]
    Transient(String),
    /// 其他错误（不重试）
    #[error("存储请求失败: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            if status == reqwest::StatusCode::NOT_FOUND {
                return StoreError::NotFound(err.to_string());
            }
            if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return StoreError::Transient(err.to_string());
            }
            return StoreError::Fatal(err.to_string());
        }
        if err.is_timeout() || err.is_connect() || err.is_body() || err.is_request() {
            StoreError::Transient(err.to_string())
        } else {
            StoreError::Fatal(err.to_string())
        }
    }
}

/// 评估结果类型
pub type EvalResult<T> = Result<T, EvalError>;
