//! # Attachment Submit
//!
//! 作业附件上传的提交与进度管理
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构，外加一个展示层：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有共享资源，只暴露能力
//! - `EntityStore` - 唯一的 File / Batch 持有者，所有变更串行执行
//! - `ExpiringActivity` - 限时后台执行时间
//! - `Notifier` / `Analytics` - 通知与埋点端口
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - `UploadManager` - 注册、上传、取消、重试
//! - `Transport` - 传输单个文件
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一批文件"的注册与派发流程
//! - `SubmissionCtx` - 上下文封装（batch_id + 上传目标 + 代次）
//! - `SubmissionFlow` - 流程编排（注册 → 派发 / 撤销）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/submission_service` - 附件提交服务
//! - `orchestrator/app` - 命令行入口
//!
//! ### 展示层（View Model）
//! - `view_model/` - 把文件状态投影成进度列表
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod infrastructure;
pub mod model;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod view_model;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::EntityStore;
pub use model::{BatchId, File, FileId, UploadContext, UploadState};
pub use orchestrator::{App, AttachmentSubmissionService, SubmitReport, SubmitRequest};
pub use services::{LocalUploadManager, UploadManager};
pub use view_model::{FileProgressListViewModel, FileProgressItemViewModel};
pub use workflow::{SubmissionCtx, SubmissionFlow};
