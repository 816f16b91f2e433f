//! 通知与埋点端口
//!
//! 编排层和视图模型在构造时注入这两个端口，不依赖任何全局单例。

use std::sync::Mutex;

use tracing::{error, info, warn};

use crate::model::BatchId;

/// 面向用户的通知
pub trait Notifier: Send + Sync {
    /// 整体提交失败
    fn send_failed_notification(&self, batch_id: &BatchId, detail: Option<&str>);
    /// 批次内所有文件上传完成
    fn send_completed_notification(&self, batch_id: &BatchId);
}

/// 埋点
pub trait Analytics: Send + Sync {
    fn log_error(&self, name: &str);
}

/// 只写日志的通知实现
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send_failed_notification(&self, batch_id: &BatchId, detail: Option<&str>) {
        error!(
            "[批次 {}] ❌ 提交失败{}",
            batch_id,
            detail.map(|d| format!(": {}", d)).unwrap_or_default()
        );
    }

    fn send_completed_notification(&self, batch_id: &BatchId) {
        info!("[批次 {}] ✅ 所有文件上传完成", batch_id);
    }
}

/// 只写日志的埋点实现
#[derive(Debug, Default)]
pub struct LogAnalytics;

impl Analytics for LogAnalytics {
    fn log_error(&self, name: &str) {
        warn!("📉 错误埋点: {}", name);
    }
}

/// 通知记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Failed {
        batch_id: BatchId,
        detail: Option<String>,
    },
    Completed {
        batch_id: BatchId,
    },
}

/// 把通知保存在内存中，便于检查发出了哪些通知
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    pub fn failed_count(&self) -> usize {
        self.sent()
            .iter()
            .filter(|n| matches!(n, Notification::Failed { .. }))
            .count()
    }

    fn push(&self, notification: Notification) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification);
        }
    }
}

impl Notifier for MemoryNotifier {
    fn send_failed_notification(&self, batch_id: &BatchId, detail: Option<&str>) {
        self.push(Notification::Failed {
            batch_id: batch_id.clone(),
            detail: detail.map(str::to_string),
        });
    }

    fn send_completed_notification(&self, batch_id: &BatchId) {
        self.push(Notification::Completed {
            batch_id: batch_id.clone(),
        });
    }
}

/// 把埋点保存在内存中
#[derive(Debug, Default)]
pub struct MemoryAnalytics {
    errors: Mutex<Vec<String>>,
}

impl MemoryAnalytics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl Analytics for MemoryAnalytics {
    fn log_error(&self, name: &str) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(name.to_string());
        }
    }
}
