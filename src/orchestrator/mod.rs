//! 编排层（Orchestration Layer）
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 应用入口
//! - 根据配置组装各层组件
//! - 输出全局统计信息
//!
//! ### `evaluator` - 评估器状态机
//! - 独占主机会话和主机进程
//! - 逐个评估作业，每个作业结束后立即写入报告
//! - 区分作业级错误（写 error 记录）和运行级错误（中止）
//!
//! ### `cancel` - 取消信号
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (一次触发)
//!     ↓
//! evaluator (Vec<Assignment>，状态机)
//!     ↓
//! workflow::AssignmentFlow (单个 Assignment)
//!     ↓
//! services (能力层：acquisition / discovery / grader / report_writer)
//!     ↓
//! infrastructure (基础设施：EvaluationSession)
//! ```

pub mod batch_processor;
pub mod cancel;
pub mod evaluator;

pub use batch_processor::App;
pub use cancel::{CancelHandle, CancelSignal};
pub use evaluator::{BatchSummary, Evaluator, EvaluatorState};
