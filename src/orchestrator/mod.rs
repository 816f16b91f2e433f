//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责提交流程的调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `submission_service` - 附件提交服务
//! - 参数检查、替代旧批次
//! - 申请后台时间，失败时只发一次通知
//! - 委托 `SubmissionFlow` 注册和派发
//! - 处理进度列表的取消 / 重试 / 移除
//!
//! ### `app` - 应用入口
//! - 组装存储、传输、上传管理器
//! - 观察批次进度直到结束
//! - 输出统计信息
//!
//! ## 层次关系
//!
//! ```text
//! app (命令行提交)
//!     ↓
//! submission_service (submit / cancel / retry / delete)
//!     ↓
//! workflow::SubmissionFlow (注册 → 派发)
//!     ↓
//! services (能力层：UploadManager / Transport)
//!     ↓
//! infrastructure (基础设施：EntityStore / ExpiringActivity / Notifier)
//! ```

pub mod app;
pub mod submission_service;

pub use app::{App, SubmitRequest};
pub use submission_service::{AttachmentSubmissionService, SubmitReport};
