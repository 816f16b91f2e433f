//! 应用入口 - 编排层
//!
//! ## 职责
//!
//! 1. **应用初始化**：启动实体存储、传输、上传管理器和提交服务
//! 2. **提交**：把命令行给出的本地文件交给提交服务
//! 3. **观察进度**：通过进度列表等待批次结束
//! 4. **统计输出**：汇总成功/失败数量

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::infrastructure::{EntityStore, LogAnalytics, LogNotifier, TimeBoxedActivity};
use crate::model::BatchId;
use crate::orchestrator::submission_service::AttachmentSubmissionService;
use crate::services::{LocalFileTransport, LocalUploadManager, UploadManager};
use crate::utils::logging;
use crate::utils::truncate_text;
use crate::view_model::{FileProgressListViewModel, ListState, ListSummary};

/// 一次命令行提交
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "attachment_submit", about = "把本地文件作为附件提交到作业")]
pub struct SubmitRequest {
    /// 课程 ID
    pub course_id: String,

    /// 作业 ID
    pub assignment_id: String,

    /// 批次 ID，同一批次重新提交会替代之前的文件
    pub batch_id: String,

    /// 要上传的本地文件
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// 附带的提交评论
    #[arg(long)]
    pub comment: Option<String>,
}

impl SubmitRequest {
    /// 把本地路径转换为 file:// 地址
    pub fn urls(&self) -> Result<Vec<Url>> {
        let cwd = std::env::current_dir().context("无法读取当前目录")?;
        self.paths
            .iter()
            .map(|path| {
                let absolute = if path.is_absolute() {
                    path.clone()
                } else {
                    cwd.join(path)
                };
                Url::from_file_path(&absolute)
                    .map_err(|_| anyhow!("无法转换为文件地址: {}", absolute.display()))
            })
            .collect()
    }
}

/// 应用主结构
pub struct App {
    config: Config,
    manager: Arc<dyn UploadManager>,
    service: Arc<AttachmentSubmissionService>,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        logging::init_log_file(&config.output_log_file)?;
        logging::log_startup(&config);

        let store = EntityStore::spawn();
        let transport = Arc::new(LocalFileTransport::new(&config.outbox_dir, config.chunk_size));
        let manager: Arc<dyn UploadManager> = Arc::new(LocalUploadManager::new(
            &config,
            store,
            transport,
            Arc::new(LogNotifier),
        ));
        let activity = Arc::new(TimeBoxedActivity::new(Duration::from_millis(
            config.activity_timeout_ms,
        )));
        let service = Arc::new(AttachmentSubmissionService::new(
            manager.clone(),
            activity,
            Arc::new(LogAnalytics),
        ));

        Ok(Self {
            config,
            manager,
            service,
        })
    }

    /// 提交并等待批次结束
    pub async fn run(&self, request: SubmitRequest) -> Result<ListSummary> {
        let urls = request.urls()?;
        let batch_id = BatchId::new(request.batch_id.clone());
        if let Some(comment) = &request.comment {
            info!("[批次 {}] 💬 评论: {}", batch_id, truncate_text(comment, 40));
        }

        let mut list = FileProgressListViewModel::observe(
            batch_id.clone(),
            self.manager.clone(),
            self.service.clone(),
        )
        .await?;

        let report = self
            .service
            .submit(
                &urls,
                &request.course_id,
                &request.assignment_id,
                batch_id.clone(),
                request.comment.clone(),
            )
            .await
            .with_context(|| format!("批次 {} 提交失败", batch_id))?;
        logging::log_submit_report(&report);

        let summary = loop {
            let summary = list.summary();
            if self.config.verbose_logging {
                for item in list.items() {
                    debug!("[批次 {}]   {}", batch_id, item.accessibility_label);
                }
            }
            if summary.state != ListState::Uploading {
                break summary;
            }
            list.changed().await?;
        };

        if summary.state == ListState::Failed {
            for item in list.items().iter().filter(|item| item.is_removable()) {
                warn!(
                    "[批次 {}] ⚠️ {} 上传失败: {}",
                    batch_id,
                    item.file_name,
                    item.error_message.as_deref().unwrap_or("未知错误")
                );
            }
        }

        logging::append_log(
            &self.config.output_log_file,
            &format!(
                "批次 {}: 成功 {}/{}，失败 {}",
                batch_id, summary.completed, summary.total_files, summary.failed
            ),
        )?;
        logging::print_final_stats(batch_id.as_str(), &summary, &self.config.output_log_file);

        if summary.state == ListState::Completed {
            list.clear().await?;
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(values: &[&str]) -> Result<SubmitRequest, clap::Error> {
        SubmitRequest::try_parse_from(std::iter::once("attachment_submit").chain(values.iter().copied()))
    }

    #[test]
    fn test_parse_request() {
        let request = parse(&[
            "1", "2", "att-1", "/tmp/a.png", "/tmp/b.png", "--comment", "第一版",
        ])
        .unwrap();

        assert_eq!(request.course_id, "1");
        assert_eq!(request.assignment_id, "2");
        assert_eq!(request.batch_id, "att-1");
        assert_eq!(
            request.paths,
            vec![PathBuf::from("/tmp/a.png"), PathBuf::from("/tmp/b.png")]
        );
        assert_eq!(request.comment.as_deref(), Some("第一版"));

        let urls = request.urls().unwrap();
        assert_eq!(urls[0].as_str(), "file:///tmp/a.png");
    }

    #[test]
    fn test_comment_with_equals_sign_is_not_a_path() {
        let request = parse(&["--comment=hi", "1", "2", "b", "a.png"]).unwrap();
        assert_eq!(request.comment.as_deref(), Some("hi"));
        assert_eq!(request.paths, vec![PathBuf::from("a.png")]);
    }

    #[test]
    fn test_parse_request_requires_a_file() {
        assert!(parse(&["1", "2", "att-1"]).is_err());
        assert!(parse(&["1", "2", "att-1", "a.png", "--comment"]).is_err());
    }

    #[test]
    fn test_help_is_not_treated_as_a_path() {
        let err = parse(&["--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
