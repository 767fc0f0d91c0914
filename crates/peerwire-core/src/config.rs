use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::error::{CoreError, ErrorCategory, codes};

/// 配置解析与校验错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse transport configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid transport configuration: `{field}` {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

impl From<ConfigError> for CoreError {
    fn from(error: ConfigError) -> Self {
        CoreError::new(codes::CONFIG_INVALID, error.to_string())
            .with_category(ErrorCategory::Configuration)
            .with_cause(error)
    }
}

/// 传输层配置。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - `idle_timeout_secs`：空闲阈值（秒），默认 5；
/// - `connection_limit`：并发连接上限，默认 1024；
/// - `connection_label`：诊断标签，默认 `"peerwire"`；
/// - `receive_buffer_size`：单次流读取的最大字节数，即一片的上限，默认 8192；
/// - `idle_check_interval_ms`：接收任务投递空闲检查节拍的间隔，默认 250 毫秒；
/// - 构造后不可变，组件按需复制所需字段。
///
/// ## 示例
/// ```
/// use peerwire_core::TransportConfig;
///
/// let config = TransportConfig::from_toml_str("idle_timeout_secs = 10").unwrap();
/// assert_eq!(config.idle_timeout().as_secs(), 10);
/// assert_eq!(config.connection_limit, 1024);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    pub idle_timeout_secs: u64,
    pub connection_limit: usize,
    pub connection_label: String,
    pub receive_buffer_size: usize,
    pub idle_check_interval_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 5,
            connection_limit: 1024,
            connection_label: "peerwire".to_owned(),
            receive_buffer_size: 8192,
            idle_check_interval_ms: 250,
        }
    }
}

impl TransportConfig {
    /// 解析 TOML 文本并校验。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason| Err(ConfigError::Invalid { field, reason });
        if self.idle_timeout_secs == 0 {
            return invalid("idle_timeout_secs", "must be greater than zero");
        }
        if self.connection_limit == 0 {
            return invalid("connection_limit", "must be greater than zero");
        }
        if self.receive_buffer_size == 0 {
            return invalid("receive_buffer_size", "must be greater than zero");
        }
        if self.idle_check_interval_ms == 0 {
            return invalid("idle_check_interval_ms", "must be greater than zero");
        }
        if self.connection_label.trim().is_empty() {
            return invalid("connection_label", "must not be blank");
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_millis(self.idle_check_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = TransportConfig::from_toml_str("").expect("defaults");
        assert_eq!(config, TransportConfig::default());
        assert_eq!(config.idle_check_interval(), Duration::from_millis(250));
    }

    #[test]
    fn zero_limit_is_rejected() {
        let err = TransportConfig::from_toml_str("connection_limit = 0").expect_err("zero");
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "connection_limit",
                ..
            }
        ));
        let core: CoreError = err.into();
        assert_eq!(core.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn unknown_field_is_a_parse_error() {
        let err = TransportConfig::from_toml_str("idle_timeout = 3").expect_err("unknown");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn full_document_parses() {
        let config = TransportConfig::from_toml_str(
            r#"
            idle_timeout_secs = 30
            connection_limit = 2
            connection_label = "dht-server"
            receive_buffer_size = 256
            idle_check_interval_ms = 100
            "#,
        )
        .expect("full");
        assert_eq!(config.idle_timeout(), Duration::from_secs(30));
        assert_eq!(config.connection_label, "dht-server");
        assert_eq!(config.receive_buffer_size, 256);
    }
}
