//! 基础设施层：持有稀缺资源（主机连接），只暴露能力

pub mod host_client;
pub mod session;

pub use host_client::{DocumentHandle, DocumentHost, SocketHost};
pub use session::{EvaluationSession, HostConnector, ReadRequest, SessionState, SocketConnector};
