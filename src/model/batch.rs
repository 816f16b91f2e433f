use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::sync::Arc;

use crate::model::file::FileId;
use crate::model::upload_context::UploadContext;

/// 批次标识，由调用方提供（通常对应一次提交尝试）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BatchId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for BatchId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// 一起提交的一组文件
///
/// 同一批次的所有文件共享同一个上传目标
#[derive(Debug, Clone)]
pub struct Batch {
    pub id: BatchId,
    pub context: Arc<UploadContext>,
    /// 按注册顺序排列的文件
    pub files: Vec<FileId>,
    /// 代次，每次重新开始或取消时递增
    pub generation: u64,
    /// 有文件注册失败
    pub failed: bool,
}

impl Batch {
    pub fn new(id: BatchId, context: Arc<UploadContext>, generation: u64) -> Self {
        Self {
            id,
            context,
            files: Vec::new(),
            generation,
            failed: false,
        }
    }
}
