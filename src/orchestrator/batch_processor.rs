//! 批量评估入口 - 编排层
//!
//! ## 职责
//!
//! 1. **应用初始化**：根据配置组装远程存储、提交扫描、主机连接和报告写入
//! 2. **运行**：把一次触发交给 [`Evaluator`]，输出全局统计
//!
//! 不处理单个作业的细节，全部委托给评估器。

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;
use crate::host::HostLaunchOptions;
use crate::infrastructure::SocketConnector;
use crate::orchestrator::cancel::CancelSignal;
use crate::orchestrator::evaluator::{BatchSummary, Evaluator};
use crate::services::{
    AssetAcquirer, Discovery, DiscoveryScope, HttpStore, RemoteStore, ReportWriter, RetryPolicy,
};
use crate::utils::logging;
use crate::workflow::AssignmentFlow;

/// 应用主结构
pub struct App {
    config: Config,
    evaluator: Evaluator,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        let store: Option<Arc<dyn RemoteStore>> = match &config.remote_base_url {
            Some(url) => {
                info!("🌐 远程存储: {}", url);
                let store = HttpStore::new(url, config.remote_token.clone(), config.fetch_timeout)
                    .context("无法创建远程存储客户端")?;
                Some(Arc::new(store) as Arc<dyn RemoteStore>)
            }
            None => None,
        };

        let acquirer = AssetAcquirer::new(
            store,
            config.assignments_path(),
            RetryPolicy {
                attempts: config.fetch_attempts,
                base_delay: config.fetch_backoff,
            },
        );

        let discovery = Discovery::new(
            config.assignments_path(),
            config.solutions_path(),
            &config.expected_file_name,
            config.submission_extensions.clone(),
        );

        let connector = SocketConnector::new(config.host_addr(), config.host_request_timeout);

        let mut writer = ReportWriter::new(config.report_path())
            .with_lock_timeout(config.report_lock_timeout);
        if config.write_details {
            writer = writer.with_details_dir(config.evaluations_path());
        }

        let evaluator = Evaluator::new(
            acquirer,
            discovery,
            Box::new(connector),
            writer,
            AssignmentFlow::new(config.verbose_logging),
        )
        .with_host_launch(HostLaunchOptions::from_config(&config));

        Ok(Self { config, evaluator })
    }

    /// 运行一次评估
    pub async fn run(&mut self, scope: DiscoveryScope, cancel: CancelSignal) -> Result<BatchSummary> {
        let target = match &scope {
            DiscoveryScope::All => "全部作业".to_string(),
            DiscoveryScope::Only(id) => format!("作业 {}", id),
            DiscoveryScope::Latest => "最近修改的作业".to_string(),
        };
        logging::log_startup(&self.config, &target);

        let summary = self.evaluator.run(scope, cancel).await?;

        logging::print_final_stats(&summary, &self.config.report_path().display().to_string());
        Ok(summary)
    }
}
