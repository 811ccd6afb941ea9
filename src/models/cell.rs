//! 单元格值与 A1 地址

use std::fmt::{self, Display};
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 数值比较的默认精度
const NUMERIC_EPSILON: f64 = 1e-9;

/// 主机返回的计算后单元格值
///
/// JSON 中 `null` 表示空单元格
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Empty,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CellValue {
    /// 尝试解释为数值，文本同时接受 `,` 和 `.` 作为小数点
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return None;
                }
                trimmed.replace(',', ".").parse().ok()
            }
            CellValue::Bool(_) | CellValue::Empty => None,
        }
    }

    /// 尝试解释为布尔值
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CellValue::Bool(b) => Some(*b),
            CellValue::Number(n) => Some(*n != 0.0),
            CellValue::Text(s) => match s.trim().to_ascii_uppercase().as_str() {
                "TRUE" | "VERO" => Some(true),
                "FALSE" | "FALSO" => Some(false),
                _ => None,
            },
            CellValue::Empty => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// 精确匹配：任一方为数值且双方都能解释为数值时按数值比较，否则比较去空白后的文本
    pub fn matches_exact(&self, expected: &CellValue) -> bool {
        let numeric_side =
            matches!(self, CellValue::Number(_)) || matches!(expected, CellValue::Number(_));
        if numeric_side {
            if let (Some(a), Some(b)) = (self.as_number(), expected.as_number()) {
                return (a - b).abs() <= NUMERIC_EPSILON;
            }
        }
        self.to_string().trim() == expected.to_string().trim()
    }
}

impl Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Bool(true) => write!(f, "TRUE"),
            CellValue::Bool(false) => write!(f, "FALSE"),
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            CellValue::Number(n) => write!(f, "{}", n),
            CellValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(value.to_string())
        }
    }
}

/// 地址解析错误
#[derive(Debug, Error)]
#[error("无效的单元格地址: {0}")]
pub struct AddressError(pub String);

/// 单个单元格地址（行列均从 0 开始）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellRef {
    pub row: u32,
    pub column: u32,
}

fn cell_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\$?([A-Za-z]{1,3})\$?([1-9][0-9]{0,6})$").expect("静态正则表达式有效")
    })
}

impl FromStr for CellRef {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = cell_regex()
            .captures(s.trim())
            .ok_or_else(|| AddressError(s.to_string()))?;

        let column = caps[1]
            .to_ascii_uppercase()
            .bytes()
            .fold(0u32, |acc, b| acc * 26 + u32::from(b - b'A' + 1))
            - 1;
        let row: u32 = caps[2].parse().map_err(|_| AddressError(s.to_string()))?;

        Ok(Self {
            row: row - 1,
            column,
        })
    }
}

impl Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut letters = Vec::new();
        let mut n = self.column + 1;
        while n > 0 {
            let rem = (n - 1) % 26;
            letters.push(char::from(b'A' + rem as u8));
            n = (n - 1) / 26;
        }
        let column: String = letters.into_iter().rev().collect();
        write!(f, "{}{}", column, self.row + 1)
    }
}

/// 矩形区域，`A1` 或 `A1:C3`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRange {
    pub start: CellRef,
    pub end: CellRef,
}

impl CellRange {
    pub fn rows(&self) -> usize {
        (self.end.row - self.start.row + 1) as usize
    }

    pub fn columns(&self) -> usize {
        (self.end.column - self.start.column + 1) as usize
    }

    pub fn is_single_cell(&self) -> bool {
        self.start == self.end
    }

    /// 区域内第 (row, column) 个单元格的地址（相对偏移）
    pub fn cell_at(&self, row: usize, column: usize) -> CellRef {
        CellRef {
            row: self.start.row + row as u32,
            column: self.start.column + column as u32,
        }
    }
}

impl FromStr for CellRange {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (first, second) = match s.split_once(':') {
            Some((a, b)) => (a.parse::<CellRef>()?, b.parse::<CellRef>()?),
            None => {
                let cell = s.parse::<CellRef>()?;
                (cell, cell)
            }
        };

        // 统一为左上到右下
        Ok(Self {
            start: CellRef {
                row: first.row.min(second.row),
                column: first.column.min(second.column),
            },
            end: CellRef {
                row: first.row.max(second.row),
                column: first.column.max(second.column),
            },
        })
    }
}

impl Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single_cell() {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}:{}", self.start, self.end)
        }
    }
}
