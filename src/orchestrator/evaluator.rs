//! 评估器 - 编排层
//!
//! 一次运行的状态机：
//!
//! ```text
//! Idle → Acquiring → Connecting → Extracting → Grading → Reporting → Idle
//!          │                          │                      ↑
//!          └→ Idle (没有待评估作业)     └──────────────────────┘ (作业级错误)
//!
//! 任意状态 → Errored (运行级错误，终态)
//! ```
//!
//! 会话和主机进程只由评估器持有，所有退出路径都会释放。

use std::future::Future;

use tracing::{error, warn};

use crate::error::{EvalError, EvalResult};
use crate::host::{launch_headless_host, HostLaunchOptions, HostProcess};
use crate::infrastructure::{EvaluationSession, HostConnector};
use crate::models::{Assignment, ResultRecord, Status};
use crate::orchestrator::cancel::CancelSignal;
use crate::services::{AssetAcquirer, Discovery, DiscoveryScope, ReportWriter};
use crate::utils::logging;
use crate::workflow::{AssignmentCtx, AssignmentFlow};

/// 评估器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluatorState {
    Idle,
    Acquiring,
    Connecting,
    Extracting,
    Grading,
    Reporting,
    Errored,
}

impl EvaluatorState {
    /// 状态转换是否合法
    pub fn can_transition_to(self, next: EvaluatorState) -> bool {
        use EvaluatorState::*;
        match (self, next) {
            (Errored, _) => false,
            (_, Errored) => true,
            (Idle, Acquiring)
            | (Acquiring, Idle)
            | (Acquiring, Connecting)
            | (Connecting, Extracting)
            | (Idle, Extracting)
            | (Extracting, Grading)
            | (Extracting, Reporting)
            | (Grading, Reporting)
            | (Reporting, Idle) => true,
            _ => false,
        }
    }
}

/// 一次运行的统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub passed: usize,
    pub partial: usize,
    pub failed: usize,
    pub errored: usize,
    /// 本次下载的资源数
    pub fetched: usize,
    /// 获取失败的资源数
    pub acquisition_failures: usize,
}

impl BatchSummary {
    fn count(&mut self, status: Status) {
        match status {
            Status::Pass => self.passed += 1,
            Status::Partial => self.partial += 1,
            Status::Fail => self.failed += 1,
            Status::Error => self.errored += 1,
        }
    }

    /// 已写入报告的记录数
    pub fn recorded(&self) -> usize {
        self.passed + self.partial + self.failed + self.errored
    }
}

/// 评估器
pub struct Evaluator {
    acquirer: AssetAcquirer,
    discovery: Discovery,
    session: EvaluationSession,
    host_launch: Option<HostLaunchOptions>,
    host: Option<HostProcess>,
    writer: ReportWriter,
    flow: AssignmentFlow,
    state: EvaluatorState,
    history: Vec<EvaluatorState>,
    /// 进入 Errored 的原因
    failure: Option<EvalError>,
}

impl Evaluator {
    pub fn new(
        acquirer: AssetAcquirer,
        discovery: Discovery,
        connector: Box<dyn HostConnector>,
        writer: ReportWriter,
        flow: AssignmentFlow,
    ) -> Self {
        Self {
            acquirer,
            discovery,
            session: EvaluationSession::new(connector),
            host_launch: None,
            host: None,
            writer,
            flow,
            state: EvaluatorState::Idle,
            history: Vec::new(),
            failure: None,
        }
    }

    /// 连接前先确保主机进程在运行
    pub fn with_host_launch(mut self, options: HostLaunchOptions) -> Self {
        self.host_launch = Some(options);
        self
    }

    pub fn state(&self) -> EvaluatorState {
        self.state
    }

    /// 本评估器经历过的状态（不含初始 Idle）
    pub fn history(&self) -> &[EvaluatorState] {
        &self.history
    }

    fn transition(&mut self, next: EvaluatorState) {
        if !self.state.can_transition_to(next) {
            warn!("非预期的状态转换: {:?} → {:?}", self.state, next);
        }
        self.state = next;
        self.history.push(next);
    }

    /// 执行一次完整运行
    pub async fn run(
        &mut self,
        scope: DiscoveryScope,
        mut cancel: CancelSignal,
    ) -> EvalResult<BatchSummary> {
        if let Some(failure) = &self.failure {
            warn!("评估器已处于错误状态，拒绝再次运行: {}", failure);
            return Err(failure.duplicate());
        }

        let mut summary = BatchSummary::default();

        // ========== 获取资源 ==========
        self.transition(EvaluatorState::Acquiring);
        let acquired = cancellable(&mut cancel, self.acquirer.acquire(scope.assignment())).await;
        match acquired {
            Ok(acquisition) => {
                summary.fetched = acquisition.fetched.len();
                summary.acquisition_failures = acquisition.failed.len();
            }
            Err(e) => return self.fail(e).await,
        }

        let discovered = cancellable(&mut cancel, self.discovery.discover(&scope)).await;
        let assignments = match discovered {
            Ok(assignments) => assignments,
            Err(e) => return self.fail(e).await,
        };

        if assignments.is_empty() {
            warn!("⚠️ 没有找到待评估的提交，运行结束");
            self.transition(EvaluatorState::Idle);
            return Ok(summary);
        }
        summary.total = assignments.len();
        logging::log_assignments_found(summary.total);

        // ========== 连接主机 ==========
        self.transition(EvaluatorState::Connecting);
        if let Err(e) = cancellable(&mut cancel, self.ensure_connected()).await {
            return self.fail(e).await;
        }

        // ========== 逐个评估 ==========
        for (idx, assignment) in assignments.iter().enumerate() {
            if cancel.is_cancelled() {
                return self.fail(EvalError::Cancelled).await;
            }

            let ctx = AssignmentCtx::new(&assignment.id, idx + 1, summary.total);
            logging::log_assignment_start(&ctx);

            self.transition(EvaluatorState::Extracting);
            let evaluated = cancellable(&mut cancel, self.evaluate(assignment, &ctx)).await;
            let record = match evaluated {
                Ok(record) => record,
                Err(e) if e.is_run_level() => return self.fail(e).await,
                Err(e) => {
                    warn!("{} ❌ {}", ctx, e);
                    ResultRecord::errored(assignment, &e)
                }
            };

            // 报告写入不可中断，保证要么完整追加要么不变
            self.transition(EvaluatorState::Reporting);
            if let Err(e) = self.writer.append(&record).await {
                return self.fail(e).await;
            }
            summary.count(record.status);
            logging::log_assignment_done(&ctx, &record);

            self.transition(EvaluatorState::Idle);
        }

        self.release().await;
        Ok(summary)
    }

    /// 启动（或复用）主机并建立会话
    async fn ensure_connected(&mut self) -> EvalResult<()> {
        if self.host.is_none() {
            if let Some(options) = &self.host_launch {
                self.host = Some(launch_headless_host(options).await?);
            }
        }
        self.session.connect().await
    }

    /// 单个作业：加载期望结果 → 读取 → 评分
    async fn evaluate(&mut self, assignment: &Assignment, ctx: &AssignmentCtx) -> EvalResult<ResultRecord> {
        let prepared = self.flow.prepare(assignment).await?;
        let values = self
            .flow
            .extract(&mut self.session, assignment, &prepared, ctx)
            .await?;

        self.transition(EvaluatorState::Grading);
        self.flow.grade(assignment, &prepared, &values, ctx)
    }

    /// 运行级失败：进入 Errored，释放资源
    async fn fail<T>(&mut self, e: EvalError) -> EvalResult<T> {
        match &e {
            EvalError::Cancelled => warn!("⏹️ 运行已取消，报告保持最后一次提交的内容"),
            other => error!("❌ 运行中止: {}", other),
        }
        self.transition(EvaluatorState::Errored);
        self.failure = Some(e.duplicate());
        self.release().await;
        Err(e)
    }

    /// 关闭会话和自己启动的主机
    async fn release(&mut self) {
        self.session.close().await;
        if let Some(host) = self.host.take() {
            host.shutdown().await;
        }
    }
}

/// 等待 `fut`，取消信号先到时返回 `Cancelled`
async fn cancellable<T>(
    cancel: &mut CancelSignal,
    fut: impl Future<Output = EvalResult<T>>,
) -> EvalResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(EvalError::Cancelled),
        result = fut => result,
    }
}
