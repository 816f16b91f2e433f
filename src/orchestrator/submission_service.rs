//! 附件提交服务 - 编排层
//!
//! ## 职责
//!
//! 把用户选中的本地文件交给上传管理器，并把列表上的取消、重试、
//! 移除操作转发回上传管理器。
//!
//! ## 提交流程
//!
//! 1. **参数检查**：文件列表、课程、作业不能为空
//! 2. **替代旧提交**：取消同一批次之前的所有文件
//! 3. **申请后台时间**：被拒绝时整体失败，只发一次通知
//! 4. **注册**：逐个注册文件，失败的文件汇总后只发一次通知
//! 5. **派发**：后台时间仍有效时为所有注册成功的文件请求上传，否则撤销注册

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};
use url::Url;

use crate::error::{ActivityError, AppError, AppResult, RegistrationError, StoreError};
use crate::infrastructure::{Analytics, ExpiringActivity};
use crate::model::{BatchId, FileId, UploadContext};
use crate::services::UploadManager;
use crate::view_model::FileProgressListDelegate;
use crate::workflow::{SubmissionCtx, SubmissionFlow};

const ACTIVITY_REASON: &str = "get upload targets";
const ACTIVITY_ERROR_EVENT: &str = "error_performing_background_activity";
const REGISTRATION_ERROR_EVENT: &str = "error_adding_submission_file";

/// 一次提交的结果
#[derive(Debug, Clone)]
pub struct SubmitReport {
    pub batch_id: BatchId,
    /// 已注册并请求上传的文件
    pub registered: Vec<FileId>,
    /// 注册失败的文件
    pub failures: Vec<RegistrationError>,
    /// 提交过程中批次被取消
    pub canceled: bool,
}

impl SubmitReport {
    /// 有文件注册失败，批次已被标记为失败
    pub fn is_failed(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn first_error(&self) -> Option<&RegistrationError> {
        self.failures.first()
    }
}

/// 附件提交服务
pub struct AttachmentSubmissionService {
    manager: Arc<dyn UploadManager>,
    activity: Arc<dyn ExpiringActivity>,
    analytics: Arc<dyn Analytics>,
    flow: SubmissionFlow,
}

impl AttachmentSubmissionService {
    pub fn new(
        manager: Arc<dyn UploadManager>,
        activity: Arc<dyn ExpiringActivity>,
        analytics: Arc<dyn Analytics>,
    ) -> Self {
        Self {
            flow: SubmissionFlow::new(manager.clone()),
            manager,
            activity,
            analytics,
        }
    }

    pub fn manager(&self) -> Arc<dyn UploadManager> {
        self.manager.clone()
    }

    /// 提交本地文件到作业
    pub async fn submit(
        &self,
        urls: &[Url],
        course_id: &str,
        assignment_id: &str,
        batch_id: impl Into<BatchId>,
        comment: Option<String>,
    ) -> AppResult<SubmitReport> {
        let context = UploadContext::submission(course_id, assignment_id, comment);
        self.submit_to(urls, context, batch_id.into()).await
    }

    /// 以提交评论附件的形式上传
    pub async fn submit_comment(
        &self,
        urls: &[Url],
        course_id: &str,
        assignment_id: &str,
        batch_id: impl Into<BatchId>,
        comment: impl Into<String>,
    ) -> AppResult<SubmitReport> {
        let context = UploadContext::comment(course_id, assignment_id, comment);
        self.submit_to(urls, context, batch_id.into()).await
    }

    async fn submit_to(
        &self,
        urls: &[Url],
        context: UploadContext,
        batch_id: BatchId,
    ) -> AppResult<SubmitReport> {
        if urls.is_empty() {
            return Err(AppError::invalid_request("文件列表不能为空"));
        }
        if context.course_id.is_empty() || context.assignment_id.is_empty() {
            return Err(AppError::invalid_request("课程ID和作业ID不能为空"));
        }

        let context = Arc::new(context);
        info!("[批次 {}] 📎 提交 {} 个文件到 {}", batch_id, urls.len(), context);

        // 重新提交替代之前同一批次的所有文件
        self.manager.cancel_batch(&batch_id).await?;

        let guard = match self.activity.begin(ACTIVITY_REASON) {
            Ok(guard) => guard,
            Err(e) => return Err(self.fail_activity(&batch_id, e)),
        };

        let generation = self.manager.begin_batch(&batch_id, context.clone()).await?;
        let ctx = SubmissionCtx::new(batch_id.clone(), context, generation);
        let outcome = self.flow.register(&ctx, urls).await;

        if let Err(e) = guard.ensure_active() {
            warn!("{} ⏱️ 后台活动 \"{}\" 在派发前过期", ctx, guard.reason());
            if let Err(rollback_err) = self.flow.rollback(&ctx, &outcome.registered).await {
                error!("{} 撤销注册失败: {}", ctx, rollback_err);
            }
            return Err(self.fail_activity(&batch_id, e));
        }

        let mut canceled = outcome.superseded;
        if !canceled && !outcome.failures.is_empty() {
            match self.manager.mark_failed(&batch_id).await {
                Ok(()) => {}
                Err(AppError::Store(StoreError::BatchNotFound(_))) => canceled = true,
                Err(e) => return Err(e),
            }
        }
        // 注册结束后批次可能已被取消或被新的提交替代
        if !canceled && !self.manager.is_current(&batch_id, generation).await? {
            canceled = true;
        }

        if canceled {
            info!("{} 批次已被取消，不再派发上传", ctx);
        } else {
            self.flow.dispatch(&ctx, &outcome.registered).await?;
        }

        if let Some(first) = outcome.first_error().filter(|_| !canceled) {
            warn!(
                "{} ❌ {}/{} 个文件注册失败",
                ctx,
                outcome.failures.len(),
                urls.len()
            );
            self.analytics.log_error(REGISTRATION_ERROR_EVENT);
            self.manager
                .notifier()
                .send_failed_notification(&batch_id, Some(&first.to_string()));
        }

        Ok(SubmitReport {
            batch_id,
            registered: if canceled { Vec::new() } else { outcome.registered },
            failures: outcome.failures,
            canceled,
        })
    }

    /// 取消整个批次
    pub async fn cancel(&self, batch_id: &BatchId) -> AppResult<()> {
        self.manager.cancel_batch(batch_id).await
    }

    /// 重试批次内出错的文件
    pub async fn retry(&self, batch_id: &BatchId) -> AppResult<()> {
        self.manager.retry(batch_id).await
    }

    /// 移除单个文件
    pub async fn delete(&self, file_id: FileId) -> AppResult<()> {
        self.manager.cancel_file(file_id).await
    }

    /// 清理已全部完成的批次
    pub async fn clear(&self, batch_id: &BatchId) -> AppResult<()> {
        self.manager.clear(batch_id).await
    }

    fn fail_activity(&self, batch_id: &BatchId, err: ActivityError) -> AppError {
        error!("[批次 {}] ❌ 后台活动失败: {}", batch_id, err);
        self.analytics.log_error(ACTIVITY_ERROR_EVENT);
        self.manager
            .notifier()
            .send_failed_notification(batch_id, Some(&err.to_string()));
        AppError::ActivityDenied(err)
    }
}

#[async_trait]
impl FileProgressListDelegate for AttachmentSubmissionService {
    async fn cancel_batch(&self, batch_id: &BatchId) -> AppResult<()> {
        self.cancel(batch_id).await
    }

    async fn retry_batch(&self, batch_id: &BatchId) -> AppResult<()> {
        self.retry(batch_id).await
    }

    async fn delete_file(&self, file_id: FileId) -> AppResult<()> {
        self.delete(file_id).await
    }

    async fn clear_batch(&self, batch_id: &BatchId) -> AppResult<()> {
        self.clear(batch_id).await
    }
}
