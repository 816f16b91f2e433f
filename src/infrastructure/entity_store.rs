//! 文件/批次实体存储 - 基础设施层
//!
//! 唯一持有 File / Batch 可变状态的地方。所有注册、状态迁移和删除
//! 都通过一个 actor 任务串行执行，外部只拿到 [`EntityStore`] 句柄。
//!
//! 每次提交变更后，actor 会同步通知订阅了该批次的观察者。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::error::StoreError;
use crate::model::{Batch, BatchId, File, FileId, UploadContext, UploadState};

/// 已提交的变更
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Added(File),
    Updated(File),
    Removed(File),
}

impl StoreEvent {
    pub fn file(&self) -> &File {
        match self {
            StoreEvent::Added(file) | StoreEvent::Updated(file) | StoreEvent::Removed(file) => file,
        }
    }
}

/// 存储变更观察者
///
/// 在存储 actor 内同步调用，实现中不要阻塞
pub trait StoreObserver: Send + Sync {
    fn on_event(&self, event: &StoreEvent);
}

impl<F> StoreObserver for F
where
    F: Fn(&StoreEvent) + Send + Sync,
{
    fn on_event(&self, event: &StoreEvent) {
        self(event)
    }
}

/// 订阅标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// 批次的只读快照
#[derive(Debug, Clone)]
pub struct BatchSnapshot {
    pub id: BatchId,
    pub context: Arc<UploadContext>,
    pub generation: u64,
    pub failed: bool,
    pub files: Vec<File>,
}

type Reply<T> = oneshot::Sender<T>;

enum Command {
    BeginBatch {
        batch_id: BatchId,
        context: Arc<UploadContext>,
        reply: Reply<(u64, Vec<File>)>,
    },
    Add {
        file: File,
        generation: u64,
        reply: Reply<Result<File, StoreError>>,
    },
    Transition {
        file_id: FileId,
        state: UploadState,
        error_message: Option<String>,
        reply: Reply<Result<File, StoreError>>,
    },
    Remove {
        file_id: FileId,
        reply: Reply<Result<File, StoreError>>,
    },
    CancelBatch {
        batch_id: BatchId,
        reply: Reply<Vec<File>>,
    },
    MarkFailed {
        batch_id: BatchId,
        reply: Reply<Result<(), StoreError>>,
    },
    ClearBatch {
        batch_id: BatchId,
        reply: Reply<Result<Vec<File>, StoreError>>,
    },
    GetFile {
        file_id: FileId,
        reply: Reply<Option<File>>,
    },
    GetBatch {
        batch_id: BatchId,
        reply: Reply<Option<BatchSnapshot>>,
    },
    Subscribe {
        batch_id: BatchId,
        observer: Arc<dyn StoreObserver>,
        reply: Reply<(SubscriptionId, Vec<File>)>,
    },
    Unsubscribe {
        id: SubscriptionId,
    },
}

/// 实体存储句柄
///
/// 可以随意 clone，所有 clone 指向同一个 actor
#[derive(Clone)]
pub struct EntityStore {
    tx: mpsc::UnboundedSender<Command>,
}

impl EntityStore {
    /// 启动存储 actor，需要在 tokio 运行时内调用
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx));
        Self { tx }
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(build(reply)).map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)
    }

    /// 开始一个批次的新代次
    ///
    /// 已有文件全部移除，返回新代次号和被移除的文件
    pub async fn begin_batch(
        &self,
        batch_id: BatchId,
        context: Arc<UploadContext>,
    ) -> Result<(u64, Vec<File>), StoreError> {
        self.request(|reply| Command::BeginBatch {
            batch_id,
            context,
            reply,
        })
        .await
    }

    /// 注册文件，`generation` 必须是批次当前代次
    pub async fn add(&self, file: File, generation: u64) -> Result<File, StoreError> {
        self.request(|reply| Command::Add {
            file,
            generation,
            reply,
        })
        .await?
    }

    pub async fn transition(
        &self,
        file_id: FileId,
        state: UploadState,
    ) -> Result<File, StoreError> {
        self.request(|reply| Command::Transition {
            file_id,
            state,
            error_message: None,
            reply,
        })
        .await?
    }

    /// 标记文件传输失败并记录原因
    pub async fn fail(&self, file_id: FileId, message: impl Into<String>) -> Result<File, StoreError> {
        let error_message = Some(message.into());
        self.request(|reply| Command::Transition {
            file_id,
            state: UploadState::Error,
            error_message,
            reply,
        })
        .await?
    }

    pub async fn remove(&self, file_id: FileId) -> Result<File, StoreError> {
        self.request(|reply| Command::Remove { file_id, reply }).await?
    }

    /// 取消整个批次，返回被移除的文件。批次不存在时返回空列表
    pub async fn cancel_batch(&self, batch_id: BatchId) -> Result<Vec<File>, StoreError> {
        self.request(|reply| Command::CancelBatch { batch_id, reply })
            .await
    }

    pub async fn mark_failed(&self, batch_id: BatchId) -> Result<(), StoreError> {
        self.request(|reply| Command::MarkFailed { batch_id, reply })
            .await?
    }

    /// 清理全部完成的批次，返回被清理的文件
    ///
    /// 代次保留，之后带旧代次的注册仍会被拒绝。批次不存在时返回空列表
    pub async fn clear_batch(&self, batch_id: BatchId) -> Result<Vec<File>, StoreError> {
        self.request(|reply| Command::ClearBatch { batch_id, reply })
            .await?
    }

    pub async fn file(&self, file_id: FileId) -> Result<Option<File>, StoreError> {
        self.request(|reply| Command::GetFile { file_id, reply }).await
    }

    pub async fn batch(&self, batch_id: BatchId) -> Result<Option<BatchSnapshot>, StoreError> {
        self.request(|reply| Command::GetBatch { batch_id, reply })
            .await
    }

    /// 订阅批次变更
    ///
    /// 已有文件先以 `Added` 事件回放给观察者，同时返回同一份列表
    pub async fn subscribe(
        &self,
        batch_id: BatchId,
        observer: Arc<dyn StoreObserver>,
    ) -> Result<(SubscriptionId, Vec<File>), StoreError> {
        self.request(|reply| Command::Subscribe {
            batch_id,
            observer,
            reply,
        })
        .await
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        // actor 已停止时订阅也随之失效
        let _ = self.tx.send(Command::Unsubscribe { id });
    }
}

struct Subscription {
    id: SubscriptionId,
    batch_id: BatchId,
    observer: Arc<dyn StoreObserver>,
}

#[derive(Default)]
struct StoreState {
    files: HashMap<FileId, File>,
    batches: HashMap<BatchId, Batch>,
    /// 批次取消后仍保留代次，用于拒绝过期的注册
    generations: HashMap<BatchId, u64>,
    subscriptions: Vec<Subscription>,
    next_subscription: u64,
}

async fn run(mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut state = StoreState::default();
    while let Some(command) = rx.recv().await {
        state.handle(command);
    }
    debug!("实体存储已关闭");
}

impl StoreState {
    fn handle(&mut self, command: Command) {
        // 调用方放弃等待时 reply 发送失败，忽略即可
        match command {
            Command::BeginBatch {
                batch_id,
                context,
                reply,
            } => {
                let removed = self.drop_batch(&batch_id);
                let generation = self.bump_generation(&batch_id);
                self.batches.insert(
                    batch_id.clone(),
                    Batch::new(batch_id, context, generation),
                );
                let _ = reply.send((generation, removed));
            }
            Command::Add {
                file,
                generation,
                reply,
            } => {
                let _ = reply.send(self.add(file, generation));
            }
            Command::Transition {
                file_id,
                state,
                error_message,
                reply,
            } => {
                let _ = reply.send(self.transition(file_id, state, error_message));
            }
            Command::Remove { file_id, reply } => {
                let _ = reply.send(self.remove(file_id));
            }
            Command::CancelBatch { batch_id, reply } => {
                let removed = self.drop_batch(&batch_id);
                self.bump_generation(&batch_id);
                let _ = reply.send(removed);
            }
            Command::MarkFailed { batch_id, reply } => {
                let result = match self.batches.get_mut(&batch_id) {
                    Some(batch) => {
                        batch.failed = true;
                        Ok(())
                    }
                    None => Err(StoreError::BatchNotFound(batch_id)),
                };
                let _ = reply.send(result);
            }
            Command::ClearBatch { batch_id, reply } => {
                let _ = reply.send(self.clear_batch(&batch_id));
            }
            Command::GetFile { file_id, reply } => {
                let _ = reply.send(self.files.get(&file_id).cloned());
            }
            Command::GetBatch { batch_id, reply } => {
                let _ = reply.send(self.snapshot(&batch_id));
            }
            Command::Subscribe {
                batch_id,
                observer,
                reply,
            } => {
                self.next_subscription += 1;
                let id = SubscriptionId(self.next_subscription);
                let files = self.batch_files(&batch_id);
                // 先回放已有文件，新观察者无需另行合并快照
                for file in &files {
                    observer.on_event(&StoreEvent::Added(file.clone()));
                }
                self.subscriptions.push(Subscription {
                    id,
                    batch_id,
                    observer,
                });
                let _ = reply.send((id, files));
            }
            Command::Unsubscribe { id } => {
                self.subscriptions.retain(|s| s.id != id);
            }
        }
    }

    fn bump_generation(&mut self, batch_id: &BatchId) -> u64 {
        let generation = self.generations.entry(batch_id.clone()).or_insert(0);
        *generation += 1;
        *generation
    }

    fn add(&mut self, file: File, generation: u64) -> Result<File, StoreError> {
        let current = self.generations.get(&file.batch_id).copied();
        let Some(batch) = self.batches.get_mut(&file.batch_id) else {
            return Err(StoreError::BatchSuperseded(file.batch_id));
        };
        if current != Some(generation) {
            return Err(StoreError::BatchSuperseded(file.batch_id));
        }
        if batch.files.contains(&file.id) {
            return Err(StoreError::InvalidTransition {
                file_id: file.id,
                from: "registered".to_string(),
                to: "registered".to_string(),
            });
        }

        batch.files.push(file.id);
        self.files.insert(file.id, file.clone());
        trace!("[批次 {}] 注册文件 {}", file.batch_id, file.name);
        self.notify(StoreEvent::Added(file.clone()));
        Ok(file)
    }

    fn transition(
        &mut self,
        file_id: FileId,
        next: UploadState,
        error_message: Option<String>,
    ) -> Result<File, StoreError> {
        let file = self
            .files
            .get_mut(&file_id)
            .ok_or(StoreError::FileNotFound(file_id))?;

        if !file.state.can_transition_to(&next) {
            return Err(StoreError::InvalidTransition {
                file_id,
                from: file.state.to_string(),
                to: next.to_string(),
            });
        }

        // 进度没有变化时不产生事件
        if file.state == next {
            return Ok(file.clone());
        }

        file.state = next;
        match next {
            UploadState::Error => file.error_message = error_message,
            UploadState::Queued => file.error_message = None,
            _ => {}
        }
        let file = file.clone();
        self.notify(StoreEvent::Updated(file.clone()));
        Ok(file)
    }

    fn remove(&mut self, file_id: FileId) -> Result<File, StoreError> {
        let file = self
            .files
            .remove(&file_id)
            .ok_or(StoreError::FileNotFound(file_id))?;
        if let Some(batch) = self.batches.get_mut(&file.batch_id) {
            batch.files.retain(|id| *id != file_id);
        }
        self.notify(StoreEvent::Removed(file.clone()));
        Ok(file)
    }

    fn clear_batch(&mut self, batch_id: &BatchId) -> Result<Vec<File>, StoreError> {
        let Some(batch) = self.batches.get(batch_id) else {
            return Ok(Vec::new());
        };
        let settled = batch
            .files
            .iter()
            .filter_map(|id| self.files.get(id))
            .all(|file| file.state.is_terminal());
        if !settled {
            return Err(StoreError::BatchNotSettled(batch_id.clone()));
        }
        let cleared = self.drop_batch(batch_id);
        debug!("[批次 {}] 🧹 已清理 {} 个完成的文件", batch_id, cleared.len());
        Ok(cleared)
    }

    fn drop_batch(&mut self, batch_id: &BatchId) -> Vec<File> {
        let Some(batch) = self.batches.remove(batch_id) else {
            return Vec::new();
        };
        let mut removed = Vec::with_capacity(batch.files.len());
        for file_id in batch.files {
            if let Some(file) = self.files.remove(&file_id) {
                self.notify(StoreEvent::Removed(file.clone()));
                removed.push(file);
            }
        }
        removed
    }

    fn batch_files(&self, batch_id: &BatchId) -> Vec<File> {
        self.batches
            .get(batch_id)
            .map(|batch| {
                batch
                    .files
                    .iter()
                    .filter_map(|id| self.files.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn snapshot(&self, batch_id: &BatchId) -> Option<BatchSnapshot> {
        let batch = self.batches.get(batch_id)?;
        Some(BatchSnapshot {
            id: batch.id.clone(),
            context: batch.context.clone(),
            generation: batch.generation,
            failed: batch.failed,
            files: self.batch_files(batch_id),
        })
    }

    fn notify(&self, event: StoreEvent) {
        let batch_id = &event.file().batch_id;
        for subscription in self
            .subscriptions
            .iter()
            .filter(|s| &s.batch_id == batch_id)
        {
            subscription.observer.on_event(&event);
        }
    }
}
