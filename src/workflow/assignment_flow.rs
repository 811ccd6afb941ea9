//! 作业处理流程 - 流程层
//!
//! 核心职责：定义"一份提交"的完整处理步骤
//!
//! 1. 加载期望结果，生成读取请求
//! 2. 通过会话打开文档、读取区域、关闭文档
//! 3. 比较并生成记录
//!
//! 三个步骤分开暴露，由评估器在各自的状态中调用。

use std::path::PathBuf;

use tracing::{debug, info};

use crate::error::EvalResult;
use crate::infrastructure::{EvaluationSession, ReadRequest};
use crate::models::{load_expected_results, Assignment, CellValue, ExpectedResults, ResultRecord};
use crate::services::grader;
use crate::workflow::assignment_ctx::AssignmentCtx;

/// 已加载期望结果的作业
#[derive(Debug, Clone)]
pub struct PreparedAssignment {
    pub expected: ExpectedResults,
    pub requests: Vec<ReadRequest>,
}

/// 作业处理流程
///
/// - 不持有主机连接，会话由调用方传入
/// - 只依赖业务能力（services）
pub struct AssignmentFlow {
    verbose_logging: bool,
}

impl AssignmentFlow {
    pub fn new(verbose_logging: bool) -> Self {
        Self { verbose_logging }
    }

    /// 加载期望结果并生成读取请求
    pub async fn prepare(&self, assignment: &Assignment) -> EvalResult<PreparedAssignment> {
        let expected = load_expected_results(&assignment.expected).await?;
        let requests = expected
            .criteria
            .iter()
            .map(|criterion| {
                Ok(ReadRequest {
                    sheet: criterion.sheet.clone(),
                    range: criterion.range()?,
                })
            })
            .collect::<EvalResult<Vec<_>>>()?;

        Ok(PreparedAssignment { expected, requests })
    }

    /// 在全新打开的文档中读取所有区域
    pub async fn extract(
        &self,
        session: &mut EvaluationSession,
        assignment: &Assignment,
        prepared: &PreparedAssignment,
        ctx: &AssignmentCtx,
    ) -> EvalResult<Vec<Vec<Vec<CellValue>>>> {
        let document = absolute_path(&assignment.submission);
        info!("{} 📄 读取 {} 个区域", ctx, prepared.requests.len());

        let values = session.extract(&document, &prepared.requests).await?;

        if self.verbose_logging {
            for (request, grid) in prepared.requests.iter().zip(&values) {
                debug!("{} {} = {:?}", ctx, request.range, grid);
            }
        }
        Ok(values)
    }

    /// 打分并生成记录
    pub fn grade(
        &self,
        assignment: &Assignment,
        prepared: &PreparedAssignment,
        values: &[Vec<Vec<CellValue>>],
        ctx: &AssignmentCtx,
    ) -> EvalResult<ResultRecord> {
        let outcomes = grader::grade(&prepared.expected, values)?;
        let record = ResultRecord::graded(assignment, outcomes);
        info!(
            "{} ✓ 评分完成: {} ({}%)",
            ctx, record.status, record.score
        );
        Ok(record)
    }
}

/// 主机可能运行在其他工作目录，统一传绝对路径
fn absolute_path(path: &std::path::Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
