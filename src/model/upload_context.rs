//! 上传目标描述

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// 上传目标类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UploadKind {
    /// 作为作业提交
    Submission,
    /// 作为提交评论的附件
    Comment,
}

/// 上传目标
///
/// 每次 submit 构造一次，由批次内所有文件只读共享
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadContext {
    pub kind: UploadKind,
    pub course_id: String,
    pub assignment_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl UploadContext {
    pub fn submission(
        course_id: impl Into<String>,
        assignment_id: impl Into<String>,
        comment: Option<String>,
    ) -> Self {
        Self {
            kind: UploadKind::Submission,
            course_id: course_id.into(),
            assignment_id: assignment_id.into(),
            comment,
        }
    }

    pub fn comment(
        course_id: impl Into<String>,
        assignment_id: impl Into<String>,
        comment: impl Into<String>,
    ) -> Self {
        Self {
            kind: UploadKind::Comment,
            course_id: course_id.into(),
            assignment_id: assignment_id.into(),
            comment: Some(comment.into()),
        }
    }

    /// 序列化为 JSON 描述
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!(self)
    }
}

impl Display for UploadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            UploadKind::Submission => "提交",
            UploadKind::Comment => "评论",
        };
        write!(
            f,
            "[{} 课程#{} 作业#{}]",
            kind, self.course_id, self.assignment_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_submission_shape_omits_missing_comment() {
        let ctx = UploadContext::submission("1", "2", None);
        assert_eq!(
            ctx.to_json(),
            json!({"kind": "submission", "courseId": "1", "assignmentId": "2"})
        );
    }

    #[test]
    fn test_comment_shape() {
        let ctx = UploadContext::comment("1", "2", "见附件");
        assert_eq!(
            ctx.to_json(),
            json!({"kind": "comment", "courseId": "1", "assignmentId": "2", "comment": "见附件"})
        );
    }
}
