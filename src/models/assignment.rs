use std::fmt::{self, Display};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// 一个可评分单元：一份提交的文档
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// 记录标识，形如 `A1/rossi-mario`
    pub id: String,
    /// 所属作业（assignments/ 下的目录名）
    pub assignment: String,
    /// 本地提交文件
    pub submission: PathBuf,
    /// 期望结果引用
    pub expected: PathBuf,
}

impl Assignment {
    pub fn new(assignment: impl Into<String>, submission: PathBuf, expected: PathBuf) -> Self {
        let assignment = assignment.into();
        let stem = submission
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            id: format!("{}/{}", assignment, stem),
            assignment,
            submission,
            expected,
        }
    }

    /// 用完整文件名作为标识，用于同一目录下主干名重复的提交
    pub fn qualify_with_extension(&mut self) {
        if let Some(name) = self.submission.file_name() {
            self.id = format!("{}/{}", self.assignment, name.to_string_lossy());
        }
    }

    /// 从文件名推导学生姓名
    pub fn student(&self) -> Option<StudentName> {
        StudentName::from_file_name(&self.submission)
    }
}

/// 学生姓名，来自 `nome-cognome.xlsx` 形式的文件名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentName {
    pub first_name: String,
    pub last_name: String,
}

impl StudentName {
    pub fn from_file_name(path: &Path) -> Option<Self> {
        let stem = path.file_stem()?.to_string_lossy().to_string();
        if stem.trim().is_empty() {
            return None;
        }

        let parts: Vec<&str> = stem.split('-').collect();
        if parts.len() >= 2 {
            Some(Self {
                first_name: capitalize(parts[0]),
                last_name: capitalize(parts[1]),
            })
        } else {
            Some(Self {
                first_name: capitalize(&stem),
                last_name: String::new(),
            })
        }
    }
}

impl Display for StudentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.last_name.is_empty() {
            write!(f, "{}", self.first_name)
        } else {
            write!(f, "{} {}", self.first_name, self.last_name)
        }
    }
}

/// 首字母大写，其余小写
fn capitalize(word: &str) -> String {
    let lower = word.trim().to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
