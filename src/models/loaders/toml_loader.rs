use crate::error::{EvalError, EvalResult};
use crate::models::expected::ExpectedResults;
use std::path::Path;
use tokio::fs;

/// 从 TOML 文件加载期望结果，并校验评分标准
pub async fn load_expected_results(toml_file_path: &Path) -> EvalResult<ExpectedResults> {
    let label = toml_file_path.display().to_string();

    let content = fs::read_to_string(toml_file_path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            EvalError::grading(&label, "期望结果文件不存在")
        } else {
            EvalError::grading(&label, format!("无法读取期望结果文件: {}", e))
        }
    })?;

    let mut expected: ExpectedResults = toml::from_str(&content)
        .map_err(|e| EvalError::grading(&label, format!("无法解析TOML文件: {}", e)))?;

    // 设置文件路径
    expected.file_path = Some(toml_file_path.to_path_buf());

    expected.validate()?;

    tracing::debug!(
        "成功加载 {} 个评分标准: {}",
        expected.criteria.len(),
        label
    );

    Ok(expected)
}
