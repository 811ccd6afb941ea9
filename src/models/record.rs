//! 评分结果记录

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EvalError;
use crate::models::assignment::Assignment;

/// 记录的最终状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pass,
    Partial,
    Fail,
    Error,
}

impl Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Pass => "pass",
            Status::Partial => "partial",
            Status::Fail => "fail",
            Status::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// 单个评分标准的得分：布尔结果或百分比
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Score {
    Passed(bool),
    Percent(f64),
}

impl Score {
    /// 折算为 0..=100 的得分
    pub fn credit(&self) -> f64 {
        match self {
            Score::Passed(true) => 100.0,
            Score::Passed(false) => 0.0,
            Score::Percent(p) => p.clamp(0.0, 100.0),
        }
    }
}

/// 单个评分标准的评分结果
#[derive(Debug, Clone, PartialEq)]
pub struct CriterionOutcome {
    pub name: String,
    pub score: Score,
    pub passed: bool,
    /// 人类可读的比较明细
    pub details: Vec<String>,
}

/// 一行评分输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub assignment_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student: Option<String>,
    pub scores: BTreeMap<String, Score>,
    pub status: Status,
    /// 总分（百分比，保留两位小数）
    pub score: f64,
    pub diagnostic: String,
    pub evaluated_at: DateTime<Utc>,
    /// Markdown 明细，不写入报告
    #[serde(skip)]
    pub details: Vec<String>,
}

impl ResultRecord {
    /// 由评分结果生成记录
    pub fn graded(assignment: &Assignment, outcomes: Vec<CriterionOutcome>) -> Self {
        let status = overall_status(&outcomes);
        let score = if outcomes.is_empty() {
            0.0
        } else {
            round2(outcomes.iter().map(|o| o.score.credit()).sum::<f64>() / outcomes.len() as f64)
        };

        let failed: Vec<&str> = outcomes
            .iter()
            .filter(|o| !o.passed)
            .map(|o| o.name.as_str())
            .collect();
        let diagnostic = if failed.is_empty() {
            format!("{} 项评分标准全部通过", outcomes.len())
        } else {
            format!(
                "{}/{} 项未通过: {}",
                failed.len(),
                outcomes.len(),
                failed.join(", ")
            )
        };

        let mut details = Vec::new();
        let mut scores = BTreeMap::new();
        for outcome in outcomes {
            let mark = if outcome.passed { "✓" } else { "✗" };
            details.push(format!("## {} {}", mark, outcome.name));
            details.extend(outcome.details.into_iter().map(|d| format!("- {}", d)));
            details.push(String::new());
            scores.insert(outcome.name, outcome.score);
        }

        Self {
            assignment_id: assignment.id.clone(),
            student: assignment.student().map(|s| s.to_string()),
            scores,
            status,
            score,
            diagnostic,
            evaluated_at: Utc::now(),
            details,
        }
    }

    /// 作业级错误生成 `error` 记录
    pub fn errored(assignment: &Assignment, error: &EvalError) -> Self {
        let diagnostic = format!("{}: {}", error.kind(), error);
        Self {
            assignment_id: assignment.id.clone(),
            student: assignment.student().map(|s| s.to_string()),
            scores: BTreeMap::new(),
            status: Status::Error,
            score: 0.0,
            details: vec![diagnostic.clone()],
            diagnostic,
            evaluated_at: Utc::now(),
        }
    }

    /// 渲染 Markdown 明细报告
    pub fn render_markdown(&self) -> String {
        let mut lines = Vec::new();
        match &self.student {
            Some(student) => lines.push(format!(
                "# Report di valutazione: {} ({})",
                self.assignment_id, student
            )),
            None => lines.push(format!("# Report di valutazione: {}", self.assignment_id)),
        }
        lines.push(String::new());
        lines.push(format!("- **Stato**: {}", self.status));
        lines.push(format!("- **Punteggio**: {}%", self.score));
        lines.push(format!(
            "- **Data**: {}",
            self.evaluated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        lines.push(format!("- **Diagnostica**: {}", self.diagnostic));
        lines.push(String::new());
        lines.extend(self.details.iter().cloned());
        lines.join("\n")
    }
}

fn overall_status(outcomes: &[CriterionOutcome]) -> Status {
    if outcomes.is_empty() {
        return Status::Fail;
    }
    if outcomes.iter().all(|o| o.passed) {
        Status::Pass
    } else if outcomes.iter().all(|o| !o.passed && o.score.credit() == 0.0) {
        Status::Fail
    } else {
        Status::Partial
    }
}

/// 保留两位小数
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn assignment() -> Assignment {
        Assignment::new(
            "A1",
            PathBuf::from("assignments/A1/mario-rossi.xlsx"),
            PathBuf::from("solutions/A1/expected.toml"),
        )
    }

    fn outcome(name: &str, score: Score, passed: bool) -> CriterionOutcome {
        CriterionOutcome {
            name: name.to_string(),
            score,
            passed,
            details: vec![format!("{} checked", name)],
        }
    }

    #[test]
    fn test_status_pass_partial_fail() {
        let all = ResultRecord::graded(
            &assignment(),
            vec![
                outcome("a", Score::Passed(true), true),
                outcome("b", Score::Percent(100.0), true),
            ],
        );
        assert_eq!(all.status, Status::Pass);
        assert_eq!(all.score, 100.0);

        let some = ResultRecord::graded(
            &assignment(),
            vec![
                outcome("a", Score::Passed(true), true),
                outcome("b", Score::Passed(false), false),
            ],
        );
        assert_eq!(some.status, Status::Partial);
        assert_eq!(some.score, 50.0);
        assert!(some.diagnostic.contains('b'));

        let credit_only = ResultRecord::graded(
            &assignment(),
            vec![outcome("grid", Score::Percent(66.666), false)],
        );
        assert_eq!(credit_only.status, Status::Partial);
        assert_eq!(credit_only.score, 66.67);

        let none = ResultRecord::graded(
            &assignment(),
            vec![outcome("a", Score::Passed(false), false)],
        );
        assert_eq!(none.status, Status::Fail);
    }

    #[test]
    fn test_errored_record() {
        let err = EvalError::schema("Foglio2!A1", "no_such_sheet");
        let record = ResultRecord::errored(&assignment(), &err);
        assert_eq!(record.status, Status::Error);
        assert!(record.scores.is_empty());
        assert!(record.diagnostic.starts_with("SchemaMismatchError"));
        assert_eq!(record.student.as_deref(), Some("Mario Rossi"));
    }

    #[test]
    fn test_json_shape() {
        let record = ResultRecord::graded(
            &assignment(),
            vec![
                outcome("totale", Score::Passed(true), true),
                outcome("tabella", Score::Percent(75.0), false),
            ],
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["assignment_id"], "A1/mario-rossi");
        assert_eq!(json["status"], "partial");
        assert_eq!(json["scores"]["totale"], true);
        assert_eq!(json["scores"]["tabella"], 75.0);
        assert!(json.get("details").is_none());

        let back: ResultRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.scores, record.scores);
    }

    #[test]
    fn test_render_markdown() {
        let record = ResultRecord::graded(
            &assignment(),
            vec![outcome("totale", Score::Passed(true), true)],
        );
        let md = record.render_markdown();
        assert!(md.starts_with("# Report di valutazione: A1/mario-rossi (Mario Rossi)"));
        assert!(md.contains("## ✓ totale"));
        assert!(md.contains("- totale checked"));
    }
}
