//! 报告写入服务 - 业务能力层
//!
//! 只负责"向报告追加一行"能力，不关心流程
//!
//! 每次追加都整体重写报告：读出现有内容 → 追加一行 → 写入同目录临时文件 → fsync → 重命名覆盖。
//! 任何一步失败，原报告保持不变。多个进程通过 `<report>.lock` 锁文件串行化。

use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{EvalError, EvalResult};
use crate::models::ResultRecord;

const LOCK_RETRY_DELAY: Duration = Duration::from_millis(100);

/// 报告锁，释放时删除锁文件
pub struct ReportLockGuard {
    path: PathBuf,
}

impl Drop for ReportLockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// 报告写入服务
///
/// 职责：
/// - 原子地追加单条记录
/// - 已有行不会被重排或丢失
/// - 可选地为每条记录生成 Markdown 明细
pub struct ReportWriter {
    report_path: PathBuf,
    details_dir: Option<PathBuf>,
    lock_timeout: Duration,
}

impl ReportWriter {
    /// 创建新的报告写入服务
    pub fn new(report_path: impl Into<PathBuf>) -> Self {
        Self {
            report_path: report_path.into(),
            details_dir: None,
            lock_timeout: Duration::from_secs(60),
        }
    }

    /// 同时写入 Markdown 明细
    pub fn with_details_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.details_dir = Some(dir.into());
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .report_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        self.report_path.with_file_name(name)
    }

    /// 追加一条记录
    pub async fn append(&self, record: &ResultRecord) -> EvalResult<()> {
        self.append_all(std::slice::from_ref(record)).await
    }

    /// 在一次原子替换中追加多条记录
    pub async fn append_all(&self, records: &[ResultRecord]) -> EvalResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut lines = String::new();
        for record in records {
            let line = serde_json::to_string(record).map_err(|e| {
                EvalError::report_write(&self.report_path, io::Error::new(io::ErrorKind::InvalidData, e))
            })?;
            lines.push_str(&line);
            lines.push('\n');
        }

        let _guard = self.acquire_lock().await?;
        self.replace_with_appended(&lines)
            .map_err(|e| EvalError::report_write(&self.report_path, e))?;

        debug!(
            "报告已追加 {} 行: {}",
            records.len(),
            self.report_path.display()
        );

        if let Some(dir) = &self.details_dir {
            for record in records {
                if let Err(e) = write_detail(dir, record) {
                    warn!("写入明细失败 ({}): {}", record.assignment_id, e);
                }
            }
        }

        Ok(())
    }

    /// 读出现有内容，追加后原子替换
    fn replace_with_appended(&self, lines: &str) -> io::Result<()> {
        let dir = match self.report_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut content = match fs::read_to_string(&self.report_path) {
            Ok(existing) => existing,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e),
        };
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(lines);

        atomic_write(&dir, &self.report_path, content.as_bytes())
    }

    /// 获取锁文件，被占用时等待直到超时；持有进程已退出的锁会被回收
    async fn acquire_lock(&self) -> EvalResult<ReportLockGuard> {
        let lock_path = self.lock_path();
        let started = Instant::now();
        loop {
            match try_lock(&lock_path) {
                Ok(guard) => return Ok(guard),
                Err(LockState::Stale(pid)) => {
                    warn!("🔓 回收残留的报告锁 (进程 {} 已退出): {}", pid, lock_path.display());
                    match fs::remove_file(&lock_path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(EvalError::report_write(&self.report_path, e)),
                    }
                }
                Err(LockState::Failed(e)) => {
                    return Err(EvalError::report_write(&self.report_path, e));
                }
                Err(state) => {
                    if started.elapsed() >= self.lock_timeout {
                        let holder = match state {
                            LockState::HeldBy(pid) => format!("进程 {}", pid),
                            _ => "未知进程".to_string(),
                        };
                        return Err(EvalError::report_write(
                            &self.report_path,
                            io::Error::new(
                                io::ErrorKind::TimedOut,
                                format!("报告被{}锁定: {}", holder, lock_path.display()),
                            ),
                        ));
                    }
                    tokio::time::sleep(LOCK_RETRY_DELAY).await;
                }
            }
        }
    }
}

#[derive(Debug)]
enum LockState {
    HeldBy(u32),
    Stale(u32),
    /// 锁文件存在但内容无法识别
    Unknown,
    Failed(io::Error),
}

fn try_lock(lock_path: &Path) -> Result<ReportLockGuard, LockState> {
    if let Some(parent) = lock_path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    match OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(lock_path)
    {
        Ok(mut file) => {
            let _ = writeln!(file, "{}", std::process::id());
            Ok(ReportLockGuard {
                path: lock_path.to_path_buf(),
            })
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            // 读不到时持有者可能恰好释放，下一轮重试
            let Ok(content) = fs::read_to_string(lock_path) else {
                return Err(LockState::Unknown);
            };
            match content.trim().parse::<u32>() {
                Ok(pid) if is_process_running(pid) => Err(LockState::HeldBy(pid)),
                Ok(pid) => Err(LockState::Stale(pid)),
                Err(_) => Err(LockState::Unknown),
            }
        }
        Err(e) => Err(LockState::Failed(e)),
    }
}

fn is_process_running(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }
    std::process::Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// 写入同目录临时文件，fsync 后重命名覆盖目标
pub(crate) fn atomic_write(dir: &Path, target: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

/// 明细文件名：`A1/mario-rossi` → `A1-mario-rossi-Report.md`
pub fn detail_file_name(assignment_id: &str) -> String {
    format!("{}-Report.md", assignment_id.replace(['/', '\\'], "-"))
}

/// 写入单条记录的 Markdown 明细
pub fn write_detail(dir: &Path, record: &ResultRecord) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(detail_file_name(&record.assignment_id));
    atomic_write(dir, &path, record.render_markdown().as_bytes())?;
    info!("📝 明细已写入: {}", path.display());
    Ok(path)
}

/// 读取报告中的全部记录
pub fn read_all(path: &Path) -> EvalResult<Vec<ResultRecord>> {
    let mut content = String::new();
    match fs::File::open(path) {
        Ok(mut file) => file
            .read_to_string(&mut content)
            .map_err(|e| EvalError::report_write(path, e))?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(EvalError::report_write(path, e)),
    };

    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|e| {
                EvalError::report_write(path, io::Error::new(io::ErrorKind::InvalidData, e))
            })
        })
        .collect()
}
