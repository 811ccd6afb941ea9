//! 作业处理上下文
//!
//! 封装"我正在处理批次中的第几份提交"这一信息

use std::fmt::Display;

/// 作业处理上下文
#[derive(Debug, Clone)]
pub struct AssignmentCtx {
    /// 记录标识，如 `A1/mario-rossi`
    pub assignment_id: String,

    /// 在批次中的序号（从1开始，仅用于日志显示）
    pub index: usize,

    /// 批次总数
    pub total: usize,
}

impl AssignmentCtx {
    pub fn new(assignment_id: impl Into<String>, index: usize, total: usize) -> Self {
        Self {
            assignment_id: assignment_id.into(),
            index,
            total,
        }
    }
}

impl Display for AssignmentCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[作业 {}/{} {}]", self.index, self.total, self.assignment_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let ctx = AssignmentCtx::new("A1/mario-rossi", 2, 5);
        assert_eq!(ctx.to_string(), "[作业 2/5 A1/mario-rossi]");
    }
}
