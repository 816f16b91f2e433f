//! 批次上传进度列表
//!
//! 订阅实体存储中某个批次的变更，把已提交的文件状态投影成展示数据。
//! 取消、重试、移除操作经由 [`FileProgressListDelegate`] 交回编排层。

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use crate::error::{AppResult, StoreError};
use crate::infrastructure::{StoreEvent, SubscriptionId};
use crate::model::{BatchId, File, FileId, UploadState};
use crate::services::UploadManager;
use crate::view_model::file_progress_item::FileProgressItemViewModel;

/// 列表操作的处理方
#[async_trait]
pub trait FileProgressListDelegate: Send + Sync {
    async fn cancel_batch(&self, batch_id: &BatchId) -> AppResult<()>;
    async fn retry_batch(&self, batch_id: &BatchId) -> AppResult<()>;
    async fn delete_file(&self, file_id: FileId) -> AppResult<()>;
    /// 全部完成后从列表中清理批次
    async fn clear_batch(&self, batch_id: &BatchId) -> AppResult<()>;
}

/// 列表整体状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListState {
    Empty,
    /// 仍有文件在排队或上传
    Uploading,
    /// 其余文件已结束，但有文件出错
    Failed,
    Completed,
}

/// 批次汇总
#[derive(Debug, Clone, PartialEq)]
pub struct ListSummary {
    pub total_files: usize,
    pub completed: usize,
    pub failed: usize,
    pub total_bytes: u64,
    /// 按字节加权的整体进度
    pub progress: f64,
    pub state: ListState,
}

impl ListSummary {
    pub fn from_files(files: &[File]) -> Self {
        let total_files = files.len();
        let completed = count(files, |s| matches!(s, UploadState::Completed));
        let failed = count(files, |s| matches!(s, UploadState::Error));
        let in_flight = count(files, |s| {
            matches!(s, UploadState::Queued | UploadState::Uploading { .. })
        });
        let total_bytes: u64 = files.iter().map(|f| f.size).sum();

        let fraction = |f: &File| match f.state {
            UploadState::Completed => 1.0,
            UploadState::Uploading { progress } => progress,
            UploadState::Queued | UploadState::Error => 0.0,
        };
        let progress = if total_files == 0 {
            0.0
        } else if total_bytes == 0 {
            files.iter().map(fraction).sum::<f64>() / total_files as f64
        } else {
            files.iter().map(|f| f.size as f64 * fraction(f)).sum::<f64>() / total_bytes as f64
        };

        let state = if total_files == 0 {
            ListState::Empty
        } else if in_flight > 0 {
            ListState::Uploading
        } else if failed > 0 {
            ListState::Failed
        } else {
            ListState::Completed
        };

        Self {
            total_files,
            completed,
            failed,
            total_bytes,
            progress,
            state,
        }
    }
}

fn count(files: &[File], predicate: impl Fn(&UploadState) -> bool) -> usize {
    files.iter().filter(|f| predicate(&f.state)).count()
}

fn apply(files: &mut Vec<File>, event: &StoreEvent) {
    match event {
        StoreEvent::Added(file) => {
            if !files.iter().any(|f| f.id == file.id) {
                files.push(file.clone());
            }
        }
        StoreEvent::Updated(file) => {
            if let Some(existing) = files.iter_mut().find(|f| f.id == file.id) {
                *existing = file.clone();
            }
        }
        StoreEvent::Removed(file) => files.retain(|f| f.id != file.id),
    }
}

/// 批次上传进度列表
pub struct FileProgressListViewModel {
    batch_id: BatchId,
    manager: Arc<dyn UploadManager>,
    delegate: Arc<dyn FileProgressListDelegate>,
    subscription: SubscriptionId,
    files: watch::Receiver<Vec<File>>,
}

impl FileProgressListViewModel {
    /// 开始观察一个批次
    pub async fn observe(
        batch_id: BatchId,
        manager: Arc<dyn UploadManager>,
        delegate: Arc<dyn FileProgressListDelegate>,
    ) -> AppResult<Self> {
        let (tx, files) = watch::channel(Vec::new());
        let observer = move |event: &StoreEvent| {
            tx.send_modify(|files| apply(files, event));
        };
        let (subscription, _) = manager.subscribe(&batch_id, Arc::new(observer)).await?;
        debug!("[批次 {}] 开始观察上传进度", batch_id);

        Ok(Self {
            batch_id,
            manager,
            delegate,
            subscription,
            files,
        })
    }

    pub fn batch_id(&self) -> &BatchId {
        &self.batch_id
    }

    /// 当前已提交状态的文件
    pub fn files(&self) -> Vec<File> {
        self.files.borrow().clone()
    }

    pub fn items(&self) -> Vec<FileProgressItemViewModel> {
        self.files
            .borrow()
            .iter()
            .map(|file| FileProgressItemViewModel::new(file, self.delegate.clone()))
            .collect()
    }

    pub fn summary(&self) -> ListSummary {
        ListSummary::from_files(&self.files.borrow())
    }

    /// 等待下一次变更
    pub async fn changed(&mut self) -> AppResult<()> {
        self.files
            .changed()
            .await
            .map_err(|_| StoreError::Closed.into())
    }

    /// 等待所有文件结束（完成或出错）
    pub async fn settled(&mut self) -> AppResult<ListSummary> {
        loop {
            let summary = self.summary();
            if summary.state != ListState::Uploading {
                return Ok(summary);
            }
            self.changed().await?;
        }
    }

    pub async fn cancel(&self) -> AppResult<()> {
        self.delegate.cancel_batch(&self.batch_id).await
    }

    pub async fn retry(&self) -> AppResult<()> {
        self.delegate.retry_batch(&self.batch_id).await
    }

    pub async fn remove(&self, file_id: FileId) -> AppResult<()> {
        self.delegate.delete_file(file_id).await
    }

    pub async fn clear(&self) -> AppResult<()> {
        self.delegate.clear_batch(&self.batch_id).await
    }
}

impl Drop for FileProgressListViewModel {
    fn drop(&mut self) {
        self.manager.unsubscribe(self.subscription);
    }
}
