//! 单个文件的进度展示

use std::sync::Arc;

use bytesize::ByteSize;

use crate::error::AppResult;
use crate::model::{BatchId, File, FileId, FileKind, UploadState};
use crate::view_model::file_progress_list::FileProgressListDelegate;

/// 前置图标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Icon {
    /// 按文件类别选择
    Kind(FileKind),
    /// 出错时的警告图标
    Warning,
}

/// 展示状态，与 [`UploadState`] 一一对应
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ItemState {
    Waiting,
    Uploading(f64),
    Completed,
    Error,
}

impl From<UploadState> for ItemState {
    fn from(state: UploadState) -> Self {
        match state {
            UploadState::Queued => ItemState::Waiting,
            UploadState::Uploading { progress } => ItemState::Uploading(progress),
            UploadState::Completed => ItemState::Completed,
            UploadState::Error => ItemState::Error,
        }
    }
}

/// 单个文件的展示数据
#[derive(Clone)]
pub struct FileProgressItemViewModel {
    pub file_id: FileId,
    pub batch_id: BatchId,
    pub file_name: String,
    /// 可读的文件大小
    pub size: String,
    pub icon: Icon,
    pub state: ItemState,
    pub error_message: Option<String>,
    pub accessibility_label: String,
    delegate: Arc<dyn FileProgressListDelegate>,
}

impl FileProgressItemViewModel {
    pub fn new(file: &File, delegate: Arc<dyn FileProgressListDelegate>) -> Self {
        let state = ItemState::from(file.state);
        let size = ByteSize(file.size).to_string();
        let icon = match state {
            ItemState::Error => Icon::Warning,
            _ => Icon::Kind(file.kind()),
        };
        Self {
            file_id: file.id,
            batch_id: file.batch_id.clone(),
            file_name: file.name.clone(),
            accessibility_label: accessibility_label(&file.name, &size, state),
            size,
            icon,
            state,
            error_message: file.error_message.clone(),
            delegate,
        }
    }

    /// 出错时显示移除按钮
    pub fn is_removable(&self) -> bool {
        self.state == ItemState::Error
    }

    /// 从提交中移除该文件
    pub async fn remove(&self) -> AppResult<()> {
        self.delegate.delete_file(self.file_id).await
    }
}

fn accessibility_label(name: &str, size: &str, state: ItemState) -> String {
    let status = match state {
        ItemState::Waiting => "等待上传".to_string(),
        ItemState::Uploading(progress) => format!("正在上传 {}%", (progress * 100.0).round() as u32),
        ItemState::Completed => "上传完成".to_string(),
        ItemState::Error => "上传失败".to_string(),
    };
    format!("{}，{}，{}", name, size, status)
}
