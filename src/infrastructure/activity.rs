//! 限时后台活动
//!
//! 在调用方随时可能被挂起的环境里，为一段短任务申请有保证的执行时间。

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::ActivityError;

/// 后台活动提供者
pub trait ExpiringActivity: Send + Sync {
    /// 申请一段执行时间，被拒绝时返回 [`ActivityError::Denied`]
    fn begin(&self, reason: &str) -> Result<ActivityGuard, ActivityError>;
}

/// 已获批的后台活动，超过截止时间即视为过期
#[derive(Debug, Clone)]
pub struct ActivityGuard {
    reason: String,
    deadline: Instant,
}

impl ActivityGuard {
    pub fn with_deadline(reason: impl Into<String>, deadline: Instant) -> Self {
        Self {
            reason: reason.into(),
            deadline,
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// 过期时返回错误，供 `?` 使用
    pub fn ensure_active(&self) -> Result<(), ActivityError> {
        if self.is_expired() {
            Err(ActivityError::Expired)
        } else {
            Ok(())
        }
    }
}

/// 按固定时长放行的后台活动
///
/// 预算为零时一律拒绝
#[derive(Debug, Clone)]
pub struct TimeBoxedActivity {
    budget: Duration,
}

impl TimeBoxedActivity {
    pub fn new(budget: Duration) -> Self {
        Self { budget }
    }
}

impl ExpiringActivity for TimeBoxedActivity {
    fn begin(&self, reason: &str) -> Result<ActivityGuard, ActivityError> {
        if self.budget.is_zero() {
            return Err(ActivityError::Denied);
        }
        debug!("开始后台活动: {} (预算 {:?})", reason, self.budget);
        Ok(ActivityGuard::with_deadline(
            reason,
            Instant::now() + self.budget,
        ))
    }
}
