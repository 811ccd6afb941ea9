//! 提交发现 - 业务能力层
//!
//! 扫描 `assignments/` 下的作业目录，为每个提交文件生成一个 [`Assignment`]。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{EvalError, EvalResult};
use crate::models::Assignment;

/// 扫描范围
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryScope {
    /// 全部作业目录
    All,
    /// 指定作业
    Only(String),
    /// 最近修改的作业目录
    Latest,
}

impl DiscoveryScope {
    /// 由触发标识构造，空字符串表示全部
    pub fn from_identifier(id: &str) -> Self {
        let id = id.trim();
        if id.is_empty() {
            DiscoveryScope::All
        } else {
            DiscoveryScope::Only(id.to_string())
        }
    }

    /// 传给远程存储的作业过滤条件
    pub fn assignment(&self) -> Option<&str> {
        match self {
            DiscoveryScope::Only(id) => Some(id),
            _ => None,
        }
    }
}

/// 提交扫描器
#[derive(Debug, Clone)]
pub struct Discovery {
    assignments_root: PathBuf,
    solutions_root: PathBuf,
    expected_file_name: String,
    extensions: Vec<String>,
}

impl Discovery {
    pub fn new(
        assignments_root: impl Into<PathBuf>,
        solutions_root: impl Into<PathBuf>,
        expected_file_name: impl Into<String>,
        extensions: Vec<String>,
    ) -> Self {
        Self {
            assignments_root: assignments_root.into(),
            solutions_root: solutions_root.into(),
            expected_file_name: expected_file_name.into(),
            extensions: extensions.into_iter().map(|e| e.to_lowercase()).collect(),
        }
    }

    /// 按范围列出待评估的提交，顺序稳定
    pub async fn discover(&self, scope: &DiscoveryScope) -> EvalResult<Vec<Assignment>> {
        let folders = match scope {
            DiscoveryScope::All => self.assignment_folders().await?,
            DiscoveryScope::Only(id) => {
                let folder = self.assignments_root.join(id);
                if !fs::metadata(&folder).await.map(|m| m.is_dir()).unwrap_or(false) {
                    return Err(EvalError::NotFound {
                        assignment: id.clone(),
                    });
                }
                vec![id.clone()]
            }
            DiscoveryScope::Latest => {
                let latest = self.latest_folder().await?;
                if let Some(name) = &latest {
                    info!("📂 最近修改的作业: {}", name);
                }
                latest.into_iter().collect()
            }
        };

        let mut assignments = Vec::new();
        for folder in folders {
            let expected = self
                .solutions_root
                .join(&folder)
                .join(&self.expected_file_name);
            let mut in_folder: Vec<Assignment> = self
                .submissions_in(&self.assignments_root.join(&folder))
                .await?
                .into_iter()
                .map(|submission| Assignment::new(&folder, submission, expected.clone()))
                .collect();

            // 同名不同扩展名的提交改用完整文件名区分
            let mut seen: HashMap<String, usize> = HashMap::new();
            for a in &in_folder {
                *seen.entry(a.id.clone()).or_default() += 1;
            }
            for a in in_folder.iter_mut().filter(|a| seen[&a.id] > 1) {
                warn!("提交名重复，改用完整文件名: {}", a.submission.display());
                a.qualify_with_extension();
            }
            assignments.append(&mut in_folder);
        }

        debug!("发现 {} 个待评估提交", assignments.len());
        Ok(assignments)
    }

    /// 所有作业目录名，按名称排序；根目录不存在时为空
    async fn assignment_folders(&self) -> EvalResult<Vec<String>> {
        Ok(self
            .folders_with_mtime()
            .await?
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    async fn latest_folder(&self) -> EvalResult<Option<String>> {
        Ok(self
            .folders_with_mtime()
            .await?
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
            .map(|(name, _)| name))
    }

    async fn folders_with_mtime(&self) -> EvalResult<Vec<(String, SystemTime)>> {
        let mut entries = match fs::read_dir(&self.assignments_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("作业目录不存在: {}", self.assignments_root.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(listing_error(&self.assignments_root, e)),
        };

        let mut folders = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| listing_error(&self.assignments_root, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if metadata.is_dir() {
                let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                folders.push((name, modified));
            }
        }
        folders.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(folders)
    }

    /// 目录中的提交文件，按文件名排序
    async fn submissions_in(&self, folder: &Path) -> EvalResult<Vec<PathBuf>> {
        let mut entries = fs::read_dir(folder)
            .await
            .map_err(|e| listing_error(folder, e))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| listing_error(folder, e))?
        {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            // 隐藏文件和办公软件的锁文件
            if name.starts_with('.') || name.starts_with("~$") {
                continue;
            }
            if !entry.metadata().await.map(|m| m.is_file()).unwrap_or(false) {
                continue;
            }
            if self.has_submission_extension(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn has_submission_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.contains(&e.to_lowercase()))
            .unwrap_or(false)
    }
}

fn listing_error(path: &Path, e: std::io::Error) -> EvalError {
    EvalError::Discovery {
        path: path.to_path_buf(),
        source: e,
    }
}
