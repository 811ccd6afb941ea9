use std::path::PathBuf;
use std::time::Duration;

/// 程序配置
#[derive(Clone, Debug)]
pub struct Config {
    /// 仓库根目录，其余目录都相对于它
    pub root: PathBuf,
    /// 学生提交目录
    pub assignments_dir: String,
    /// 期望结果目录
    pub solutions_dir: String,
    /// 评估输出目录
    pub evaluations_dir: String,
    /// 报告文件名（位于评估输出目录下）
    pub report_file: String,
    /// 每个作业的期望结果文件名
    pub expected_file_name: String,
    /// 参与评估的文件扩展名
    pub submission_extensions: Vec<String>,
    /// 是否为每条记录生成 Markdown 明细
    pub write_details: bool,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    // --- 评估主机 ---
    pub host_address: String,
    pub host_port: u16,
    /// 启动主机的命令，参数中的 `{host}` / `{port}` 会被替换
    pub host_command: String,
    pub host_args: Vec<String>,
    pub host_startup_timeout: Duration,
    pub host_poll_interval: Duration,
    pub host_request_timeout: Duration,
    // --- 远程存储 ---
    pub remote_base_url: Option<String>,
    pub remote_token: Option<String>,
    pub fetch_attempts: usize,
    pub fetch_backoff: Duration,
    pub fetch_timeout: Duration,
    /// 报告锁等待时间
    pub report_lock_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            assignments_dir: "assignments".to_string(),
            solutions_dir: "solutions".to_string(),
            evaluations_dir: "evaluations".to_string(),
            report_file: "report.jsonl".to_string(),
            expected_file_name: "expected.toml".to_string(),
            submission_extensions: vec![
                "xlsx".to_string(),
                "ods".to_string(),
                "xls".to_string(),
                "csv".to_string(),
            ],
            write_details: true,
            verbose_logging: false,
            host_address: "127.0.0.1".to_string(),
            host_port: 2002,
            host_command: "evaluation-host".to_string(),
            host_args: vec![
                "--headless".to_string(),
                "--listen".to_string(),
                "{host}:{port}".to_string(),
            ],
            host_startup_timeout: Duration::from_secs(30),
            host_poll_interval: Duration::from_millis(500),
            host_request_timeout: Duration::from_secs(20),
            remote_base_url: None,
            remote_token: None,
            fetch_attempts: 3,
            fetch_backoff: Duration::from_millis(500),
            fetch_timeout: Duration::from_secs(60),
            report_lock_timeout: Duration::from_secs(60),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            root: std::env::var("EVAL_ROOT").map(PathBuf::from).unwrap_or(default.root),
            assignments_dir: std::env::var("EVAL_ASSIGNMENTS_DIR").unwrap_or(default.assignments_dir),
            solutions_dir: std::env::var("EVAL_SOLUTIONS_DIR").unwrap_or(default.solutions_dir),
            evaluations_dir: std::env::var("EVAL_EVALUATIONS_DIR").unwrap_or(default.evaluations_dir),
            report_file: std::env::var("EVAL_REPORT_FILE").unwrap_or(default.report_file),
            expected_file_name: std::env::var("EVAL_EXPECTED_FILE").unwrap_or(default.expected_file_name),
            submission_extensions: std::env::var("EVAL_EXTENSIONS").ok().map(|v| split_list(&v, ',')).unwrap_or(default.submission_extensions),
            write_details: std::env::var("EVAL_WRITE_DETAILS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.write_details),
            verbose_logging: std::env::var("VERBOSE_LOGGING").ok().and_then(|v| v.parse().ok()).unwrap_or(default.verbose_logging),
            host_address: std::env::var("EVAL_HOST_ADDRESS").unwrap_or(default.host_address),
            host_port: std::env::var("EVAL_HOST_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(default.host_port),
            host_command: std::env::var("EVAL_HOST_COMMAND").unwrap_or(default.host_command),
            host_args: std::env::var("EVAL_HOST_ARGS").ok().map(|v| split_list(&v, ' ')).unwrap_or(default.host_args),
            host_startup_timeout: env_secs("EVAL_HOST_STARTUP_TIMEOUT").unwrap_or(default.host_startup_timeout),
            host_poll_interval: env_millis("EVAL_HOST_POLL_INTERVAL_MS").unwrap_or(default.host_poll_interval),
            host_request_timeout: env_secs("EVAL_HOST_REQUEST_TIMEOUT").unwrap_or(default.host_request_timeout),
            remote_base_url: std::env::var("EVAL_REMOTE_URL").ok().filter(|v| !v.is_empty()),
            remote_token: std::env::var("EVAL_REMOTE_TOKEN").ok().filter(|v| !v.is_empty()),
            fetch_attempts: std::env::var("EVAL_FETCH_ATTEMPTS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.fetch_attempts),
            fetch_backoff: env_millis("EVAL_FETCH_BACKOFF_MS").unwrap_or(default.fetch_backoff),
            fetch_timeout: env_secs("EVAL_FETCH_TIMEOUT").unwrap_or(default.fetch_timeout),
            report_lock_timeout: env_secs("EVAL_REPORT_LOCK_TIMEOUT").unwrap_or(default.report_lock_timeout),
        }
    }

    pub fn assignments_path(&self) -> PathBuf {
        self.root.join(&self.assignments_dir)
    }

    pub fn solutions_path(&self) -> PathBuf {
        self.root.join(&self.solutions_dir)
    }

    pub fn evaluations_path(&self) -> PathBuf {
        self.root.join(&self.evaluations_dir)
    }

    pub fn report_path(&self) -> PathBuf {
        self.evaluations_path().join(&self.report_file)
    }

    /// 主机地址，形如 `127.0.0.1:2002`
    pub fn host_addr(&self) -> String {
        format!("{}:{}", self.host_address, self.host_port)
    }

    /// 展开启动参数中的占位符
    pub fn expanded_host_args(&self) -> Vec<String> {
        self.host_args
            .iter()
            .map(|arg| {
                arg.replace("{host}", &self.host_address)
                    .replace("{port}", &self.host_port.to_string())
            })
            .collect()
    }
}

fn split_list(value: &str, sep: char) -> Vec<String> {
    value
        .split(sep)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).map(Duration::from_secs)
}

fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).map(Duration::from_millis)
}
