//! 日志初始化
//!
//! `RUST_LOG` 优先于配置中的日志级别。

use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LoggingConfig;

/// 从配置初始化日志系统
///
/// 已经初始化过时返回错误而不是 panic，方便测试与嵌入方重复调用。
///
/// ```rust,ignore
/// use proxus_core::config::LoggingConfig;
/// use proxus_core::tracing::init_tracing_from_config;
///
/// let config = LoggingConfig {
///     level: "debug".to_string(),
///     ..Default::default()
/// };
/// init_tracing_from_config(Some(&config))?;
/// ```
pub fn init_tracing_from_config(
    logging_config: Option<&LoggingConfig>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let default_config = LoggingConfig::default();
    let config = logging_config.unwrap_or(&default_config);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let builder = fmt::Subscriber::builder()
        .with_target(config.with_target)
        .with_thread_ids(config.with_thread_ids)
        .with_file(config.with_file)
        .with_line_number(config.with_line_number)
        .with_env_filter(env_filter);

    if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    }
}
