use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// 程序配置文件
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 上传管理器标识
    pub upload_identifier: String,
    /// 共享容器标识（主程序与分享扩展共用）
    pub shared_container_identifier: String,
    /// 后台活动时长（毫秒），为 0 时后台活动一律被拒绝
    pub activity_timeout_ms: u64,
    /// 本地传输的块大小（字节）
    pub chunk_size: usize,
    /// 同时进行的传输数量
    pub max_concurrent_uploads: usize,
    /// 本地传输的发件箱目录
    pub outbox_dir: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 输出日志文件
    pub output_log_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upload_identifier: "com.instructure.icanvas.SubmitAssignment.file-uploads".to_string(),
            shared_container_identifier: "group.instructure.shared".to_string(),
            activity_timeout_ms: 30_000,
            chunk_size: 64 * 1024,
            max_concurrent_uploads: 4,
            outbox_dir: "outbox".to_string(),
            verbose_logging: false,
            output_log_file: "upload.log".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            upload_identifier: std::env::var("UPLOAD_IDENTIFIER").unwrap_or(default.upload_identifier),
            shared_container_identifier: std::env::var("SHARED_CONTAINER_IDENTIFIER").unwrap_or(default.shared_container_identifier),
            activity_timeout_ms: std::env::var("ACTIVITY_TIMEOUT_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.activity_timeout_ms),
            chunk_size: std::env::var("UPLOAD_CHUNK_SIZE").ok().and_then(|v| v.parse().ok()).unwrap_or(default.chunk_size),
            max_concurrent_uploads: std::env::var("MAX_CONCURRENT_UPLOADS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_concurrent_uploads),
            outbox_dir: std::env::var("OUTBOX_DIR").unwrap_or(default.outbox_dir),
            verbose_logging: std::env::var("VERBOSE_LOGGING").ok().and_then(|v| v.parse().ok()).unwrap_or(default.verbose_logging),
            output_log_file: std::env::var("OUTPUT_LOG_FILE").unwrap_or(default.output_log_file),
        }
    }

    /// 从 TOML 文件加载，缺失的键使用默认值
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|source| ConfigError::TomlParseFailed {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// 设置了 `CONFIG_FILE` 时从 TOML 文件加载，否则读取环境变量
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var("CONFIG_FILE") {
            Ok(path) => Self::from_toml_file(path),
            Err(_) => Ok(Self::from_env()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            activity_timeout_ms = 500
            outbox_dir = "/tmp/outbox"
            "#,
        )
        .unwrap();

        assert_eq!(config.activity_timeout_ms, 500);
        assert_eq!(config.outbox_dir, "/tmp/outbox");
        assert_eq!(config.chunk_size, Config::default().chunk_size);
        assert_eq!(
            config.upload_identifier,
            "com.instructure.icanvas.SubmitAssignment.file-uploads"
        );
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(Config::from_toml_str("chunk_size = \"big\"").is_err());
    }
}
