//! 提交上下文
//!
//! 封装"我正在为哪个批次、哪个目标注册文件"这一信息

use std::fmt::Display;
use std::sync::Arc;

use crate::model::{BatchId, UploadContext};

/// 一次 submit 调用的上下文
#[derive(Debug, Clone)]
pub struct SubmissionCtx {
    pub batch_id: BatchId,

    /// 批次内所有文件共享的上传目标
    pub context: Arc<UploadContext>,

    /// 本次提交开始时批次的代次
    pub generation: u64,
}

impl SubmissionCtx {
    pub fn new(batch_id: BatchId, context: Arc<UploadContext>, generation: u64) -> Self {
        Self {
            batch_id,
            context,
            generation,
        }
    }
}

impl Display for SubmissionCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[批次 {} 课程#{} 作业#{} 代次#{}]",
            self.batch_id, self.context.course_id, self.context.assignment_id, self.generation
        )
    }
}
