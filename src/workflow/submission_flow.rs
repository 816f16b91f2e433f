//! 文件注册与派发流程 - 流程层
//!
//! 核心职责：定义"一批文件"从注册到请求上传的流程
//!
//! 流程顺序：
//! 1. 逐个注册本地文件（失败不影响其他文件）
//! 2. 为注册成功的文件请求上传
//! 3. 后台时间耗尽时撤销本次所有注册

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{AppResult, RegistrationError};
use crate::model::FileId;
use crate::services::UploadManager;
use crate::workflow::submission_ctx::SubmissionCtx;

/// 注册阶段的结果
#[derive(Debug, Default)]
pub struct RegistrationOutcome {
    /// 注册成功的文件，按输入顺序
    pub registered: Vec<FileId>,
    /// 注册失败的文件，第一个最先出现
    pub failures: Vec<RegistrationError>,
    /// 注册过程中批次被取消或被新的提交替代
    pub superseded: bool,
}

impl RegistrationOutcome {
    pub fn first_error(&self) -> Option<&RegistrationError> {
        self.failures.first()
    }
}

/// 文件注册与派发流程
///
/// - 不持有实体，只依赖上传管理能力
/// - 不发通知，结果交给编排层决定
pub struct SubmissionFlow {
    manager: Arc<dyn UploadManager>,
}

impl SubmissionFlow {
    pub fn new(manager: Arc<dyn UploadManager>) -> Self {
        Self { manager }
    }

    /// 注册所有文件
    pub async fn register(&self, ctx: &SubmissionCtx, urls: &[Url]) -> RegistrationOutcome {
        let mut outcome = RegistrationOutcome::default();

        for (index, url) in urls.iter().enumerate() {
            match self.manager.add(url, &ctx.batch_id, ctx.generation).await {
                Ok(file) => {
                    debug!("{} ✓ 第 {}/{} 个文件已注册: {}", ctx, index + 1, urls.len(), file.name);
                    outcome.registered.push(file.id);
                }
                Err(RegistrationError::BatchSuperseded { .. }) => {
                    // 之后的注册同样会被拒绝
                    info!("{} 批次已被取消，停止注册", ctx);
                    outcome.superseded = true;
                    break;
                }
                Err(e) => {
                    warn!("{} ⚠️ 文件注册失败: {}", ctx, e);
                    outcome.failures.push(e);
                }
            }
        }

        outcome
    }

    /// 为已注册的文件请求上传
    pub async fn dispatch(&self, ctx: &SubmissionCtx, files: &[FileId]) -> AppResult<()> {
        let requests = files
            .iter()
            .map(|file_id| self.manager.upload(*file_id, ctx.context.clone()));
        for result in join_all(requests).await {
            result?;
        }
        info!("{} 📤 已请求上传 {} 个文件", ctx, files.len());
        Ok(())
    }

    /// 撤销本次注册
    pub async fn rollback(&self, ctx: &SubmissionCtx, files: &[FileId]) -> AppResult<()> {
        warn!("{} ↩️ 撤销 {} 个已注册文件", ctx, files.len());
        self.manager.rollback(files).await
    }
}
