//! # Assignment Evaluator
//!
//! 自动评估学生提交的电子表格作业
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（主机连接），只暴露能力
//! - `EvaluationSession` - 唯一的连接持有者，提供"打开 / 读取 / 关闭文档"能力
//! - `host/` - 无头评估主机的启动、就绪轮询和关闭
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个资源或单个作业
//! - `AssetAcquirer` - 从远程存储同步提交文件
//! - `Discovery` - 扫描本地待评估提交
//! - `grader` - 比较读取值和期望结果
//! - `ReportWriter` - 原子追加报告
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一份提交"的完整处理流程
//! - `AssignmentCtx` - 上下文封装（作业标识 + 批次序号）
//! - `AssignmentFlow` - 流程编排（加载期望结果 → 读取 → 评分）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/evaluator` - 评估器状态机，管理资源和错误分级
//! - `orchestrator/batch_processor` - 应用入口，按配置组装组件
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod host;
pub mod infrastructure;
pub mod logger;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{EvalError, EvalResult, StoreError};
pub use host::{launch_headless_host, HostLaunchOptions, HostProcess, Readiness};
pub use infrastructure::{EvaluationSession, SessionState};
pub use models::{Assignment, ResultRecord, Status};
pub use orchestrator::{App, BatchSummary, CancelHandle, CancelSignal, Evaluator, EvaluatorState};
pub use services::{DiscoveryScope, ReportWriter};
pub use workflow::{AssignmentCtx, AssignmentFlow};
