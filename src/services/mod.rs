//! 业务能力层（Services）
//!
//! 每个服务只描述"我能做什么"，处理单个资源或单个作业，不关心流程顺序。

pub mod acquisition;
pub mod discovery;
pub mod grader;
pub mod remote_store;
pub mod report_writer;

pub use acquisition::{AcquisitionSummary, AssetAcquirer, RetryPolicy};
pub use discovery::{Discovery, DiscoveryScope};
pub use remote_store::{HttpStore, RemoteAsset, RemoteStore};
pub use report_writer::{read_all, ReportWriter};
