//! 传输能力 - 业务能力层
//!
//! 只负责"把一个文件送到目标位置"，不关心批次和重试

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::error::TransportError;
use crate::infrastructure::EntityStore;
use crate::model::{File, FileId, UploadContext, UploadState};

/// 传输进度上报
///
/// 进度写回实体存储，文件被删除后上报会失败，传输应随之停止
#[derive(Clone)]
pub struct ProgressSink {
    store: EntityStore,
    file_id: FileId,
}

impl ProgressSink {
    pub fn new(store: EntityStore, file_id: FileId) -> Self {
        Self { store, file_id }
    }

    pub async fn report(&self, progress: f64) -> Result<(), TransportError> {
        self.store
            .transition(self.file_id, UploadState::uploading(progress))
            .await
            .map(|_| ())
            .map_err(|e| TransportError::new(format!("进度上报失败: {}", e)))
    }
}

/// 传输端口
#[async_trait]
pub trait Transport: Send + Sync {
    /// 传输单个文件，期间通过 `progress` 上报非递减的进度
    async fn send(
        &self,
        file: &File,
        context: &UploadContext,
        progress: &ProgressSink,
    ) -> Result<(), TransportError>;
}

/// 本地传输：按块把文件复制到发件箱目录
///
/// 目标路径为 `<outbox>/<course>/<assignment>/<file_id>-<name>`
pub struct LocalFileTransport {
    outbox: PathBuf,
    chunk_size: usize,
}

impl LocalFileTransport {
    pub fn new(outbox: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self {
            outbox: outbox.into(),
            chunk_size: chunk_size.max(1),
        }
    }

    fn destination(&self, file: &File, context: &UploadContext) -> PathBuf {
        self.outbox
            .join(&context.course_id)
            .join(&context.assignment_id)
            .join(format!("{}-{}", file.id, file.name))
    }
}

#[async_trait]
impl Transport for LocalFileTransport {
    async fn send(
        &self,
        file: &File,
        context: &UploadContext,
        progress: &ProgressSink,
    ) -> Result<(), TransportError> {
        let source = file
            .url
            .to_file_path()
            .map_err(|_| TransportError::new(format!("不是本地文件地址: {}", file.url)))?;
        let destination = self.destination(file, context);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut reader = fs::File::open(&source).await?;
        let mut writer = fs::File::create(&destination).await?;
        let total = reader.metadata().await?.len();
        let mut sent: u64 = 0;
        let mut buf = vec![0u8; self.chunk_size];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            writer.write_all(&buf[..n]).await?;
            sent += n as u64;
            if total > 0 {
                progress.report(sent as f64 / total as f64).await?;
            }
        }
        writer.flush().await?;
        progress.report(1.0).await?;

        debug!(
            "{} 已写入 {} ({} 字节)",
            file.name,
            destination.display(),
            sent
        );
        Ok(())
    }
}
