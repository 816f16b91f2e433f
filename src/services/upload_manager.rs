//! 上传管理 - 业务能力层
//!
//! 拥有实体存储和所有进行中的传输。编排层只通过 [`UploadManager`]
//! 注册文件、请求上传、取消和重试，从不直接修改实体。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::error::{AppResult, RegistrationError, StoreError};
use crate::infrastructure::{EntityStore, Notifier, StoreObserver, SubscriptionId};
use crate::model::{BatchId, File, FileId, UploadContext, UploadState};
use crate::services::transport::{ProgressSink, Transport};

/// 上传管理端口
#[async_trait]
pub trait UploadManager: Send + Sync {
    /// 开始批次的新代次，已有文件全部取消
    async fn begin_batch(&self, batch_id: &BatchId, context: Arc<UploadContext>) -> AppResult<u64>;

    /// 注册一个本地文件
    async fn add(
        &self,
        url: &Url,
        batch_id: &BatchId,
        generation: u64,
    ) -> Result<File, RegistrationError>;

    /// 请求上传，立即返回，进度通过订阅观察
    async fn upload(&self, file_id: FileId, context: Arc<UploadContext>) -> AppResult<()>;

    /// 取消整个批次，批次不存在时什么也不做
    async fn cancel_batch(&self, batch_id: &BatchId) -> AppResult<()>;

    /// 取消并移除单个文件
    async fn cancel_file(&self, file_id: FileId) -> AppResult<()>;

    /// 重新上传批次内出错的文件
    async fn retry(&self, batch_id: &BatchId) -> AppResult<()>;

    /// 撤销尚未派发的注册
    async fn rollback(&self, file_ids: &[FileId]) -> AppResult<()>;

    async fn mark_failed(&self, batch_id: &BatchId) -> AppResult<()>;

    /// 批次是否仍处在 `generation` 这一代
    async fn is_current(&self, batch_id: &BatchId, generation: u64) -> AppResult<bool>;

    /// 清理所有文件都已完成的批次
    async fn clear(&self, batch_id: &BatchId) -> AppResult<()>;

    async fn files(&self, batch_id: &BatchId) -> AppResult<Vec<File>>;

    async fn subscribe(
        &self,
        batch_id: &BatchId,
        observer: Arc<dyn StoreObserver>,
    ) -> AppResult<(SubscriptionId, Vec<File>)>;

    fn unsubscribe(&self, id: SubscriptionId);

    /// 提交失败时使用的通知通道
    fn notifier(&self) -> Arc<dyn Notifier>;
}

struct Transfer {
    ticket: u64,
    handle: AbortHandle,
}

struct Inner {
    store: EntityStore,
    transport: Arc<dyn Transport>,
    notifier: Arc<dyn Notifier>,
    permits: Arc<Semaphore>,
    transfers: Mutex<HashMap<FileId, Transfer>>,
    next_ticket: AtomicU64,
}

/// 进程内上传管理器
pub struct LocalUploadManager {
    inner: Arc<Inner>,
}

impl LocalUploadManager {
    pub fn new(
        config: &Config,
        store: EntityStore,
        transport: Arc<dyn Transport>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                transport,
                notifier,
                permits: Arc::new(Semaphore::new(config.max_concurrent_uploads.max(1))),
                transfers: Mutex::new(HashMap::new()),
                next_ticket: AtomicU64::new(0),
            }),
        }
    }

    pub fn store(&self) -> &EntityStore {
        &self.inner.store
    }

    async fn abort(&self, file_id: FileId) {
        if let Some(transfer) = self.inner.transfers.lock().await.remove(&file_id) {
            transfer.handle.abort();
        }
    }
}

#[async_trait]
impl UploadManager for LocalUploadManager {
    async fn begin_batch(&self, batch_id: &BatchId, context: Arc<UploadContext>) -> AppResult<u64> {
        let (generation, superseded) = self
            .inner
            .store
            .begin_batch(batch_id.clone(), context)
            .await?;
        for file in &superseded {
            self.abort(file.id).await;
        }
        if !superseded.is_empty() {
            info!(
                "[批次 {}] 新提交替代了 {} 个旧文件",
                batch_id,
                superseded.len()
            );
        }
        Ok(generation)
    }

    async fn add(
        &self,
        url: &Url,
        batch_id: &BatchId,
        generation: u64,
    ) -> Result<File, RegistrationError> {
        let uri = url.to_string();
        if url.scheme() != "file" {
            return Err(RegistrationError::NotAFileUrl { uri });
        }
        let path = url
            .to_file_path()
            .map_err(|_| RegistrationError::NotAFileUrl { uri: uri.clone() })?;

        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| RegistrationError::Unreadable {
                uri: uri.clone(),
                reason: e.to_string(),
            })?;
        if !metadata.is_file() {
            return Err(RegistrationError::Unreadable {
                uri,
                reason: "不是普通文件".to_string(),
            });
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| uri.clone());
        let file = File::new(url.clone(), name, metadata.len(), batch_id.clone());

        self.inner
            .store
            .add(file, generation)
            .await
            .map_err(|e| match e {
                StoreError::BatchSuperseded(batch_id) => {
                    RegistrationError::BatchSuperseded { batch_id, uri }
                }
                other => RegistrationError::StoreUnavailable(other.to_string()),
            })
    }

    async fn upload(&self, file_id: FileId, context: Arc<UploadContext>) -> AppResult<()> {
        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
        // 持锁期间 spawn，保证任务结束时的清理一定发生在登记之后
        let mut transfers = self.inner.transfers.lock().await;
        if let Some(previous) = transfers.remove(&file_id) {
            previous.handle.abort();
        }
        let handle = tokio::spawn(run_transfer(self.inner.clone(), file_id, context, ticket));
        transfers.insert(
            file_id,
            Transfer {
                ticket,
                handle: handle.abort_handle(),
            },
        );
        Ok(())
    }

    async fn cancel_batch(&self, batch_id: &BatchId) -> AppResult<()> {
        let removed = self.inner.store.cancel_batch(batch_id.clone()).await?;
        for file in &removed {
            self.abort(file.id).await;
        }
        if !removed.is_empty() {
            info!("[批次 {}] 🛑 已取消 {} 个文件", batch_id, removed.len());
        }
        Ok(())
    }

    async fn cancel_file(&self, file_id: FileId) -> AppResult<()> {
        self.abort(file_id).await;
        let file = self.inner.store.remove(file_id).await?;
        info!("[批次 {}] 🗑️ 已移除文件 {}", file.batch_id, file.name);
        // 移除最后一个未完成的文件后批次随之完成
        if file.state != UploadState::Completed {
            notify_if_completed(&self.inner, &file.batch_id).await;
        }
        Ok(())
    }

    async fn retry(&self, batch_id: &BatchId) -> AppResult<()> {
        let Some(batch) = self.inner.store.batch(batch_id.clone()).await? else {
            debug!("[批次 {}] 批次不存在，无需重试", batch_id);
            return Ok(());
        };

        let failed: Vec<&File> = batch
            .files
            .iter()
            .filter(|f| f.state == UploadState::Error)
            .collect();
        info!("[批次 {}] 🔁 重试 {} 个失败文件", batch_id, failed.len());

        for file in failed {
            // 快照之后被删除或已被并发的重试重新排队的文件跳过
            match self.inner.store.transition(file.id, UploadState::Queued).await {
                Ok(_) => self.upload(file.id, batch.context.clone()).await?,
                Err(e @ (StoreError::FileNotFound(_) | StoreError::InvalidTransition { .. })) => {
                    debug!("[批次 {}] 跳过 {}: {}", batch_id, file.name, e);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn rollback(&self, file_ids: &[FileId]) -> AppResult<()> {
        for file_id in file_ids {
            self.abort(*file_id).await;
            match self.inner.store.remove(*file_id).await {
                Ok(_) | Err(StoreError::FileNotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn mark_failed(&self, batch_id: &BatchId) -> AppResult<()> {
        self.inner.store.mark_failed(batch_id.clone()).await?;
        Ok(())
    }

    async fn is_current(&self, batch_id: &BatchId, generation: u64) -> AppResult<bool> {
        let batch = self.inner.store.batch(batch_id.clone()).await?;
        Ok(batch.is_some_and(|batch| batch.generation == generation))
    }

    async fn clear(&self, batch_id: &BatchId) -> AppResult<()> {
        self.inner.store.clear_batch(batch_id.clone()).await?;
        Ok(())
    }

    async fn files(&self, batch_id: &BatchId) -> AppResult<Vec<File>> {
        Ok(self
            .inner
            .store
            .batch(batch_id.clone())
            .await?
            .map(|batch| batch.files)
            .unwrap_or_default())
    }

    async fn subscribe(
        &self,
        batch_id: &BatchId,
        observer: Arc<dyn StoreObserver>,
    ) -> AppResult<(SubscriptionId, Vec<File>)> {
        Ok(self.inner.store.subscribe(batch_id.clone(), observer).await?)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.store.unsubscribe(id);
    }

    fn notifier(&self) -> Arc<dyn Notifier> {
        self.inner.notifier.clone()
    }
}

/// 单个文件的传输任务
async fn run_transfer(inner: Arc<Inner>, file_id: FileId, context: Arc<UploadContext>, ticket: u64) {
    let Ok(_permit) = inner.permits.clone().acquire_owned().await else {
        return;
    };

    match inner.store.transition(file_id, UploadState::uploading(0.0)).await {
        Ok(file) => {
            let sink = ProgressSink::new(inner.store.clone(), file_id);
            match inner.transport.send(&file, &context, &sink).await {
                Ok(()) => complete(&inner, &file).await,
                Err(e) => {
                    warn!("[批次 {}] ⚠️ {} 上传失败: {}", file.batch_id, file.name, e);
                    if let Err(e) = inner.store.fail(file_id, e.message).await {
                        debug!("无法标记失败 {}: {}", file_id, e);
                    }
                }
            }
        }
        Err(e) => debug!("文件 {} 不再需要上传: {}", file_id, e),
    }

    let mut transfers = inner.transfers.lock().await;
    if transfers.get(&file_id).map(|t| t.ticket) == Some(ticket) {
        transfers.remove(&file_id);
    }
}

async fn complete(inner: &Inner, file: &File) {
    // 进度必须先到 1.0 才能完成
    let finished = match inner
        .store
        .transition(file.id, UploadState::uploading(1.0))
        .await
    {
        Ok(_) => inner.store.transition(file.id, UploadState::Completed).await,
        Err(e) => Err(e),
    };
    if let Err(e) = finished {
        debug!("文件 {} 完成状态未写入: {}", file.id, e);
        return;
    }
    info!("[批次 {}] ✓ {} 上传完成", file.batch_id, file.name);
    notify_if_completed(inner, &file.batch_id).await;
}

/// 批次内所有文件都已完成时发送完成通知
///
/// 注册阶段被标记失败的批次不发送，即使之后全部重试成功
async fn notify_if_completed(inner: &Inner, batch_id: &BatchId) {
    match inner.store.batch(batch_id.clone()).await {
        Ok(Some(batch))
            if !batch.failed
                && !batch.files.is_empty()
                && batch.files.iter().all(|f| f.state == UploadState::Completed) =>
        {
            inner.notifier.send_completed_notification(&batch.id);
        }
        Ok(_) => {}
        Err(e) => debug!("无法读取批次 {}: {}", batch_id, e),
    }
}
