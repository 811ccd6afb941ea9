//! 资源获取服务 - 业务能力层
//!
//! 把远程存储中的提交文件同步到 `assignments/<作业>/`：
//! - 本地副本已是最新时跳过下载
//! - 临时性错误按指数退避重试
//! - 单个资源失败不影响其他资源

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{EvalError, EvalResult, StoreError};
use crate::services::remote_store::{RemoteAsset, RemoteStore};
use crate::services::report_writer::atomic_write;

/// 重试策略
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// 第 `attempt` 次失败后的等待时间（从 1 开始）
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let factor = 1u32 << (attempt.saturating_sub(1)).min(16) as u32;
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// 一次获取的汇总
#[derive(Debug, Default)]
pub struct AcquisitionSummary {
    /// 本次下载的资源
    pub fetched: Vec<String>,
    /// 本地已是最新的资源
    pub up_to_date: Vec<String>,
    /// 失败的资源及原因
    pub failed: Vec<(String, EvalError)>,
    /// 列表请求失败，只能依赖本地文件
    pub listing_failed: bool,
}

/// 资源获取服务
pub struct AssetAcquirer {
    store: Option<Arc<dyn RemoteStore>>,
    assignments_root: PathBuf,
    retry: RetryPolicy,
}

impl AssetAcquirer {
    pub fn new(
        store: Option<Arc<dyn RemoteStore>>,
        assignments_root: impl Into<PathBuf>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            assignments_root: assignments_root.into(),
            retry,
        }
    }

    /// 不连接远程存储，只使用本地文件
    pub fn local_only(assignments_root: impl Into<PathBuf>) -> Self {
        Self::new(None, assignments_root, RetryPolicy::default())
    }

    /// 同步远程资源
    ///
    /// 指定作业时，远程和本地都没有该作业返回 `NotFound`。
    pub async fn acquire(&self, assignment: Option<&str>) -> EvalResult<AcquisitionSummary> {
        let mut summary = AcquisitionSummary::default();

        let Some(store) = &self.store else {
            debug!("未配置远程存储，跳过资源获取");
            return Ok(summary);
        };

        info!("📥 正在获取远程资源 (作业: {})", assignment.unwrap_or("全部"));

        let assets = match store.list(assignment).await {
            Ok(assets) => assets,
            Err(e) => {
                warn!("⚠️ 无法列出远程资源，改用本地文件: {}", e);
                summary.listing_failed = true;
                return Ok(summary);
            }
        };

        let assets: Vec<RemoteAsset> = assets
            .into_iter()
            .filter(|a| assignment.map_or(true, |id| a.assignment == id))
            .collect();

        if let Some(id) = assignment {
            if assets.is_empty() && !self.assignments_root.join(id).is_dir() {
                return Err(EvalError::NotFound {
                    assignment: id.to_string(),
                });
            }
        }

        for asset in &assets {
            let label = format!("{}/{}", asset.assignment, asset.name);
            match self.acquire_one(store.as_ref(), asset).await {
                Ok(true) => {
                    info!("✓ 已下载: {}", label);
                    summary.fetched.push(label);
                }
                Ok(false) => {
                    debug!("本地已是最新: {}", label);
                    summary.up_to_date.push(label);
                }
                Err(e) => {
                    warn!("❌ 获取失败 {}: {}", label, e);
                    summary.failed.push((label, e));
                }
            }
        }

        info!(
            "📥 资源获取完成: 下载 {} | 最新 {} | 失败 {}",
            summary.fetched.len(),
            summary.up_to_date.len(),
            summary.failed.len()
        );
        Ok(summary)
    }

    /// 获取单个资源，返回是否真正下载
    async fn acquire_one(&self, store: &dyn RemoteStore, asset: &RemoteAsset) -> EvalResult<bool> {
        let label = format!("{}/{}", asset.assignment, asset.name);
        if !is_safe_component(&asset.assignment) || !is_safe_component(&asset.name) {
            return Err(EvalError::Acquisition {
                asset: label,
                attempts: 0,
                message: "资源名称不安全".to_string(),
            });
        }

        let dir = self.assignments_root.join(&asset.assignment);
        let target = dir.join(&asset.name);
        if is_up_to_date(&target, asset).await {
            return Ok(false);
        }

        let bytes = self.download_with_retry(store, asset, &label).await?;

        if let Some(expected) = &asset.sha256 {
            let actual = sha256_hex(&bytes);
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(EvalError::Acquisition {
                    asset: label,
                    attempts: self.retry.attempts,
                    message: format!("校验和不匹配: 期望 {}, 实际 {}", expected, actual),
                });
            }
        }

        let write = || -> std::io::Result<()> {
            std::fs::create_dir_all(&dir)?;
            atomic_write(&dir, &target, &bytes)
        };
        write().map_err(|e| EvalError::Acquisition {
            asset: label.clone(),
            attempts: 1,
            message: format!("写入本地文件失败: {}", e),
        })?;

        Ok(true)
    }

    async fn download_with_retry(
        &self,
        store: &dyn RemoteStore,
        asset: &RemoteAsset,
        label: &str,
    ) -> EvalResult<Vec<u8>> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match store.download(asset).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        "下载 {} 失败 (第 {}/{} 次): {}，{} ms 后重试",
                        label,
                        attempt,
                        attempts,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    let message = match e {
                        StoreError::NotFound(m) => format!("远程资源不存在: {}", m),
                        other => other.to_string(),
                    };
                    return Err(EvalError::Acquisition {
                        asset: label.to_string(),
                        attempts: attempt,
                        message,
                    });
                }
            }
        }
    }
}

/// 名称只能是单个路径组件
fn is_safe_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains('\0')
}

/// 本地副本是否与远程一致
///
/// 有摘要时比较 sha256；否则比较大小和修改时间；没有任何元数据时存在即视为最新。
async fn is_up_to_date(path: &Path, asset: &RemoteAsset) -> bool {
    let Ok(metadata) = tokio::fs::metadata(path).await else {
        return false;
    };

    if let Some(expected) = &asset.sha256 {
        return match tokio::fs::read(path).await {
            Ok(bytes) => sha256_hex(&bytes).eq_ignore_ascii_case(expected),
            Err(_) => false,
        };
    }

    if let Some(size) = asset.size {
        if metadata.len() != size {
            return false;
        }
    }

    if let Some(remote_modified) = asset.modified {
        let local_modified: Option<DateTime<Utc>> = metadata.modified().ok().map(DateTime::from);
        return matches!(local_modified, Some(local) if local >= remote_modified);
    }

    true
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
