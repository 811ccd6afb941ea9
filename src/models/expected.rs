//! 期望结果引用
//!
//! 每个作业目录对应 `solutions/<作业>/expected.toml`，列出要读取的单元格位置和评分规则。

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{EvalError, EvalResult};
use crate::models::cell::{CellRange, CellValue};

fn default_tolerance() -> f64 {
    1e-6
}

fn default_pass_threshold() -> f64 {
    100.0
}

/// 一个作业的全部评分标准
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedResults {
    #[serde(default)]
    pub title: Option<String>,
    pub criteria: Vec<Criterion>,
    #[serde(skip)]
    pub file_path: Option<PathBuf>,
}

/// 单个评分标准
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Criterion {
    pub name: String,
    /// 工作表名，缺省为第一个工作表
    #[serde(default)]
    pub sheet: Option<String>,
    /// A1 格式的位置，单元格或区域
    pub location: String,
    #[serde(flatten)]
    pub rule: Rule,
}

/// 比较规则
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Rule {
    /// 精确匹配
    Exact { expected: CellValue },
    /// 数值容差
    Tolerance {
        expected: f64,
        #[serde(default = "default_tolerance")]
        tolerance: f64,
    },
    /// 布尔谓词
    Predicate {
        op: PredicateOp,
        #[serde(default)]
        value: Option<f64>,
    },
    /// 区域逐格比较：只统计解答与模板不同的单元格
    Grid {
        solution: Vec<Vec<String>>,
        #[serde(default)]
        template: Vec<Vec<String>>,
        #[serde(default = "default_pass_threshold")]
        pass_threshold: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Empty,
    NonEmpty,
    IsTrue,
    IsFalse,
}

impl PredicateOp {
    /// 是否需要比较值
    pub fn needs_value(self) -> bool {
        matches!(
            self,
            PredicateOp::Eq
                | PredicateOp::Ne
                | PredicateOp::Gt
                | PredicateOp::Ge
                | PredicateOp::Lt
                | PredicateOp::Le
        )
    }

    pub fn symbol(self) -> &'static str {
        match self {
            PredicateOp::Eq => "=",
            PredicateOp::Ne => "≠",
            PredicateOp::Gt => ">",
            PredicateOp::Ge => "≥",
            PredicateOp::Lt => "<",
            PredicateOp::Le => "≤",
            PredicateOp::Empty => "empty",
            PredicateOp::NonEmpty => "non_empty",
            PredicateOp::IsTrue => "is_true",
            PredicateOp::IsFalse => "is_false",
        }
    }
}

impl Criterion {
    /// 解析位置
    pub fn range(&self) -> EvalResult<CellRange> {
        self.location
            .parse::<CellRange>()
            .map_err(|e| EvalError::grading(&self.name, e.to_string()))
    }

    /// 用于日志和诊断的完整位置，如 `Foglio1!B3`
    pub fn qualified_location(&self) -> String {
        match &self.sheet {
            Some(sheet) => format!("{}!{}", sheet, self.location),
            None => self.location.clone(),
        }
    }

    fn validate(&self) -> EvalResult<()> {
        let range = self.range()?;

        match &self.rule {
            Rule::Exact { .. } | Rule::Tolerance { .. } | Rule::Predicate { .. }
                if !range.is_single_cell() =>
            {
                return Err(EvalError::grading(
                    &self.name,
                    format!("该规则只能用于单个单元格，实际为区域 {}", range),
                ));
            }
            _ => {}
        }

        match &self.rule {
            Rule::Tolerance { tolerance, .. } if *tolerance < 0.0 || tolerance.is_nan() => {
                Err(EvalError::grading(&self.name, "容差不能为负数"))
            }
            Rule::Predicate { op, value: None } if op.needs_value() => Err(EvalError::grading(
                &self.name,
                format!("谓词 {} 需要 value", op.symbol()),
            )),
            Rule::Grid {
                solution, template, ..
            } => {
                if !has_shape(solution, range.rows(), range.columns()) {
                    return Err(EvalError::grading(
                        &self.name,
                        format!(
                            "解答尺寸与区域 {} 不一致 (期望 {}x{})",
                            range,
                            range.rows(),
                            range.columns()
                        ),
                    ));
                }
                if !template.is_empty() && !has_shape(template, range.rows(), range.columns()) {
                    return Err(EvalError::grading(&self.name, "模板尺寸与解答不一致"));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn has_shape(grid: &[Vec<String>], rows: usize, columns: usize) -> bool {
    grid.len() == rows && grid.iter().all(|row| row.len() == columns)
}

impl ExpectedResults {
    /// 校验评分标准本身是否有效
    pub fn validate(&self) -> EvalResult<()> {
        if self.criteria.is_empty() {
            return Err(EvalError::grading(
                self.source_label(),
                "至少需要一个评分标准",
            ));
        }

        let mut seen = HashSet::new();
        for criterion in &self.criteria {
            if !seen.insert(criterion.name.as_str()) {
                return Err(EvalError::grading(&criterion.name, "评分标准名称重复"));
            }
            criterion.validate()?;
        }

        Ok(())
    }

    fn source_label(&self) -> String {
        self.file_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "expected".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> ExpectedResults {
        toml::from_str(content).expect("TOML 应该可以解析")
    }

    #[test]
    fn test_parse_all_rules() {
        let expected = parse(
            r#"
            title = "Esercitazione 1"

            [[criteria]]
            name = "capitale"
            location = "B2"
            rule = "exact"
            expected = "Roma"

            [[criteria]]
            name = "totale"
            sheet = "Foglio1"
            location = "D10"
            rule = "tolerance"
            expected = 125
            tolerance = 0.5

            [[criteria]]
            name = "positivo"
            location = "E1"
            rule = "predicate"
            op = "gt"
            value = 0

            [[criteria]]
            name = "tabella"
            location = "A1:B2"
            rule = "grid"
            solution = [["1", "2"], ["3", "4"]]
            template = [["1", ""], ["", "4"]]
            "#,
        );

        assert_eq!(expected.title.as_deref(), Some("Esercitazione 1"));
        assert_eq!(expected.criteria.len(), 4);
        assert!(matches!(
            &expected.criteria[0].rule,
            Rule::Exact { expected } if *expected == CellValue::Text("Roma".into())
        ));
        assert!(matches!(
            expected.criteria[1].rule,
            Rule::Tolerance { expected, tolerance } if expected == 125.0 && tolerance == 0.5
        ));
        assert_eq!(expected.criteria[1].qualified_location(), "Foglio1!D10");
        assert!(matches!(
            expected.criteria[2].rule,
            Rule::Predicate { op: PredicateOp::Gt, value: Some(v) } if v == 0.0
        ));
        assert!(matches!(
            &expected.criteria[3].rule,
            Rule::Grid { pass_threshold, .. } if *pass_threshold == 100.0
        ));
        assert!(expected.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_location() {
        let expected = parse(
            r#"
            [[criteria]]
            name = "x"
            location = "B0"
            rule = "exact"
            expected = 1
            "#,
        );
        let err = expected.validate().unwrap_err();
        assert_eq!(err.kind(), "GradingError");
    }

    #[test]
    fn test_validate_rejects_range_for_single_cell_rule() {
        let expected = parse(
            r#"
            [[criteria]]
            name = "x"
            location = "A1:A3"
            rule = "tolerance"
            expected = 1.0
            "#,
        );
        assert!(expected.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_predicate_value() {
        let expected = parse(
            r#"
            [[criteria]]
            name = "x"
            location = "A1"
            rule = "predicate"
            op = "ge"
            "#,
        );
        assert!(expected.validate().is_err());

        let ok = parse(
            r#"
            [[criteria]]
            name = "x"
            location = "A1"
            rule = "predicate"
            op = "non_empty"
            "#,
        );
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_grid_shape_and_duplicates() {
        let bad_grid = parse(
            r#"
            [[criteria]]
            name = "t"
            location = "A1:B2"
            rule = "grid"
            solution = [["1", "2"]]
            "#,
        );
        assert!(bad_grid.validate().is_err());

        let duplicated = parse(
            r#"
            [[criteria]]
            name = "t"
            location = "A1"
            rule = "exact"
            expected = 1

            [[criteria]]
            name = "t"
            location = "A2"
            rule = "exact"
            expected = 2
            "#,
        );
        assert!(duplicated.validate().is_err());

        let empty = ExpectedResults {
            title: None,
            criteria: Vec::new(),
            file_path: None,
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_unknown_rule_fails_to_parse() {
        let result: Result<ExpectedResults, _> = toml::from_str(
            r#"
            [[criteria]]
            name = "x"
            location = "A1"
            rule = "regex"
            "#,
        );
        assert!(result.is_err());
    }
}
