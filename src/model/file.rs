//! 待上传文件实体

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use url::Url;
use uuid::Uuid;

use crate::model::batch::BatchId;
use crate::model::file_kind::FileKind;

/// 文件标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId(Uuid);

impl FileId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 单个文件的上传状态
///
/// 合法迁移：
/// - `Queued -> Uploading(p)`
/// - `Uploading(p) -> Uploading(p')`，要求 `p' >= p`
/// - `Uploading(1.0) -> Completed`
/// - `Queued | Uploading -> Error`
/// - `Error -> Queued`（仅在重试时）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum UploadState {
    Queued,
    Uploading { progress: f64 },
    Completed,
    Error,
}

impl UploadState {
    /// 构造上传中状态，进度被限制在 0.0–1.0
    pub fn uploading(progress: f64) -> Self {
        let progress = if progress.is_nan() {
            0.0
        } else {
            progress.clamp(0.0, 1.0)
        };
        UploadState::Uploading { progress }
    }

    /// 当前进度，只有上传中状态才有定义
    pub fn progress(&self) -> Option<f64> {
        match self {
            UploadState::Uploading { progress } => Some(*progress),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: &UploadState) -> bool {
        use UploadState::*;
        match (self, next) {
            (Queued, Uploading { .. }) => true,
            (Uploading { progress: from }, Uploading { progress: to }) => to >= from,
            (Uploading { progress }, Completed) => *progress >= 1.0,
            (Queued | Uploading { .. }, Error) => true,
            (Error, Queued) => true,
            _ => false,
        }
    }

    /// 成功结束，可以随批次一起清理
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadState::Completed)
    }
}

impl Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadState::Queued => write!(f, "queued"),
            UploadState::Uploading { progress } => write!(f, "uploading({:.2})", progress),
            UploadState::Completed => write!(f, "completed"),
            UploadState::Error => write!(f, "error"),
        }
    }
}

/// 一个待上传或正在上传的本地文件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct File {
    pub id: FileId,
    /// 本地文件地址 (file://)
    pub url: Url,
    /// 显示名称
    pub name: String,
    /// 字节数
    pub size: u64,
    pub batch_id: BatchId,
    pub state: UploadState,
    /// 最近一次传输失败的原因
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl File {
    /// 新注册的文件，初始状态为 `Queued`
    pub fn new(url: Url, name: impl Into<String>, size: u64, batch_id: BatchId) -> Self {
        Self {
            id: FileId::new(),
            url,
            name: name.into(),
            size,
            batch_id,
            state: UploadState::Queued,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> FileKind {
        FileKind::from_file_name(&self.name)
    }
}
