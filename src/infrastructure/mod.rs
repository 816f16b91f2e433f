//! 基础设施层
//!
//! 持有共享资源（实体存储、后台执行时间、通知通道），只暴露能力

pub mod activity;
pub mod entity_store;
pub mod notification;

pub use activity::{ActivityGuard, ExpiringActivity, TimeBoxedActivity};
pub use entity_store::{BatchSnapshot, EntityStore, StoreEvent, StoreObserver, SubscriptionId};
pub use notification::{
    Analytics, LogAnalytics, LogNotifier, MemoryAnalytics, MemoryNotifier, Notification, Notifier,
};
