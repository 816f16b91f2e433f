use thiserror::Error;

use crate::model::{BatchId, FileId};

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 文件注册错误
    #[error("注册错误: {0}")]
    Registration(#[from] RegistrationError),
    /// 后台活动被拒绝或过期
    #[error("后台活动错误: {0}")]
    ActivityDenied(#[from] ActivityError),
    /// 实体存储错误
    #[error("存储错误: {0}")]
    Store(#[from] StoreError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 请求参数不合法
    #[error("请求不合法: {0}")]
    InvalidRequest(String),
}

/// 单个文件注册失败
///
/// 只影响当前文件，不会阻止同批次其他文件的注册
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistrationError {
    /// 不是本地文件 URL
    #[error("不是本地文件地址: {uri}")]
    NotAFileUrl { uri: String },
    /// 文件无法读取
    #[error("无法读取文件 ({uri}): {reason}")]
    Unreadable { uri: String, reason: String },
    /// 批次已被新的提交或取消替代
    #[error("批次 {batch_id} 已被替代，文件 {uri} 未注册")]
    BatchSuperseded { batch_id: BatchId, uri: String },
    /// 存储已关闭
    #[error("存储不可用: {0}")]
    StoreUnavailable(String),
}

/// 后台活动错误，对整个 submit 调用是致命的
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ActivityError {
    /// 系统拒绝给予后台执行时间
    #[error("后台活动被拒绝")]
    Denied,
    /// 派发上传之前后台时间已用完
    #[error("后台活动已过期")]
    Expired,
}

/// 传输错误（来自上传通道，对调用方不透明）
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::new(err.to_string())
    }
}

/// 实体存储错误
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    /// 文件不存在（已删除或从未注册）
    #[error("文件不存在: {0}")]
    FileNotFound(FileId),
    /// 批次不存在
    #[error("批次不存在: {0}")]
    BatchNotFound(BatchId),
    /// 非法的状态迁移
    #[error("非法状态迁移 ({file_id}): {from} -> {to}")]
    InvalidTransition {
        file_id: FileId,
        from: String,
        to: String,
    },
    /// 批次代次已过期
    #[error("批次 {0} 已被替代")]
    BatchSuperseded(BatchId),
    /// 批次还有未完成的文件
    #[error("批次 {0} 仍有未完成的文件")]
    BatchNotSettled(BatchId),
    /// 存储 actor 已停止
    #[error("存储已关闭")]
    Closed,
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 读取配置文件失败
    #[error("读取配置文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建请求参数错误
    pub fn invalid_request(message: impl Into<String>) -> Self {
        AppError::InvalidRequest(message.into())
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
