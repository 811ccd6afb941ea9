//! 评分服务 - 业务能力层
//!
//! 只负责"把读到的值和期望结果比较"能力，纯计算，不做任何 I/O。

use tracing::debug;

use crate::error::{EvalError, EvalResult};
use crate::models::record::round2;
use crate::models::{CellValue, Criterion, CriterionOutcome, ExpectedResults, PredicateOp, Rule, Score};

/// 数值谓词比较精度
const PREDICATE_EPSILON: f64 = 1e-9;

/// 按顺序为每个评分标准打分
///
/// `extracted[i]` 是第 i 个评分标准所在区域的值（按行）。
pub fn grade(
    expected: &ExpectedResults,
    extracted: &[Vec<Vec<CellValue>>],
) -> EvalResult<Vec<CriterionOutcome>> {
    if extracted.len() != expected.criteria.len() {
        return Err(EvalError::grading(
            "*",
            format!(
                "读取结果数量 ({}) 与评分标准数量 ({}) 不一致",
                extracted.len(),
                expected.criteria.len()
            ),
        ));
    }

    expected
        .criteria
        .iter()
        .zip(extracted)
        .map(|(criterion, values)| grade_criterion(criterion, values))
        .collect()
}

/// 单个评分标准打分
pub fn grade_criterion(criterion: &Criterion, values: &[Vec<CellValue>]) -> EvalResult<CriterionOutcome> {
    let outcome = match &criterion.rule {
        Rule::Exact { expected } => {
            let actual = single_cell(criterion, values)?;
            let passed = actual.matches_exact(expected);
            boolean_outcome(
                criterion,
                passed,
                format!(
                    "{}: 期望 `{}`, 实际 `{}`",
                    criterion.qualified_location(),
                    expected,
                    actual
                ),
            )
        }
        Rule::Tolerance {
            expected,
            tolerance,
        } => {
            let actual = single_cell(criterion, values)?;
            let passed = actual
                .as_number()
                .map(|a| (a - expected).abs() <= *tolerance)
                .unwrap_or(false);
            boolean_outcome(
                criterion,
                passed,
                format!(
                    "{}: 期望 {} ± {}, 实际 `{}`",
                    criterion.qualified_location(),
                    expected,
                    tolerance,
                    actual
                ),
            )
        }
        Rule::Predicate { op, value } => {
            let actual = single_cell(criterion, values)?;
            let passed = evaluate_predicate(*op, *value, actual);
            let target = value.map(|v| format!(" {}", v)).unwrap_or_default();
            boolean_outcome(
                criterion,
                passed,
                format!(
                    "{}: `{}` {}{}",
                    criterion.qualified_location(),
                    actual,
                    op.symbol(),
                    target
                ),
            )
        }
        Rule::Grid {
            solution,
            template,
            pass_threshold,
        } => grade_grid(criterion, solution, template, *pass_threshold, values)?,
    };

    debug!(
        "评分标准 {} → {}",
        criterion.name,
        if outcome.passed { "通过" } else { "未通过" }
    );
    Ok(outcome)
}

fn single_cell<'a>(criterion: &Criterion, values: &'a [Vec<CellValue>]) -> EvalResult<&'a CellValue> {
    values
        .first()
        .and_then(|row| row.first())
        .ok_or_else(|| EvalError::schema(criterion.qualified_location(), "主机未返回单元格值"))
}

fn boolean_outcome(criterion: &Criterion, passed: bool, detail: String) -> CriterionOutcome {
    let mark = if passed { "正确" } else { "错误" };
    CriterionOutcome {
        name: criterion.name.clone(),
        score: Score::Passed(passed),
        passed,
        details: vec![format!("{} → **{}**", detail, mark)],
    }
}

fn evaluate_predicate(op: PredicateOp, value: Option<f64>, actual: &CellValue) -> bool {
    let compare = |f: fn(f64, f64) -> bool| match (actual.as_number(), value) {
        (Some(a), Some(v)) => f(a, v),
        _ => false,
    };

    match op {
        PredicateOp::Eq => compare(|a, v| (a - v).abs() <= PREDICATE_EPSILON),
        PredicateOp::Ne => compare(|a, v| (a - v).abs() > PREDICATE_EPSILON),
        PredicateOp::Gt => compare(|a, v| a > v),
        PredicateOp::Ge => compare(|a, v| a >= v - PREDICATE_EPSILON),
        PredicateOp::Lt => compare(|a, v| a < v),
        PredicateOp::Le => compare(|a, v| a <= v + PREDICATE_EPSILON),
        PredicateOp::Empty => actual.is_empty(),
        PredicateOp::NonEmpty => !actual.is_empty(),
        PredicateOp::IsTrue => actual.as_bool() == Some(true),
        PredicateOp::IsFalse => actual.as_bool() == Some(false),
    }
}

/// 区域逐格比较
///
/// 只统计解答与模板不同的单元格；没有模板时统计所有非空的解答单元格。
/// 得分为正确比例的百分数（两位小数），没有可统计单元格时为 0。
fn grade_grid(
    criterion: &Criterion,
    solution: &[Vec<String>],
    template: &[Vec<String>],
    pass_threshold: f64,
    values: &[Vec<CellValue>],
) -> EvalResult<CriterionOutcome> {
    let range = criterion.range()?;
    if values.len() != range.rows() || values.iter().any(|row| row.len() != range.columns()) {
        return Err(EvalError::schema(
            criterion.qualified_location(),
            format!("读取到的区域尺寸与 {} 不一致", range),
        ));
    }

    let mut evaluated = 0usize;
    let mut correct = 0usize;
    let mut details = Vec::new();

    for (i, solution_row) in solution.iter().enumerate() {
        for (j, solution_cell) in solution_row.iter().enumerate() {
            let baseline = template
                .get(i)
                .and_then(|row| row.get(j))
                .map(String::as_str)
                .unwrap_or("");
            if solution_cell.trim() == baseline.trim() {
                continue;
            }

            evaluated += 1;
            let actual = &values[i][j];
            let ok = actual.matches_exact(&CellValue::from(solution_cell.as_str()));
            if ok {
                correct += 1;
            }
            details.push(format!(
                "单元格 {} ({}, {}): 期望 `{}`, 实际 `{}` → **{}**",
                range.cell_at(i, j),
                i + 1,
                j + 1,
                solution_cell,
                actual,
                if ok { "正确" } else { "错误" }
            ));
        }
    }

    let percent = if evaluated > 0 {
        round2(correct as f64 / evaluated as f64 * 100.0)
    } else {
        0.0
    };
    details.push(format!("参与评估的单元格: {}", evaluated));
    details.push(format!("正确: {}", correct));
    details.push(format!("得分: {}%", percent));

    Ok(CriterionOutcome {
        name: criterion.name.clone(),
        score: Score::Percent(percent),
        passed: evaluated > 0 && percent >= pass_threshold,
        details,
    })
}
