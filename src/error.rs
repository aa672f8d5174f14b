//! Proxus Core 错误模块
//!
//! - 启动期错误（配置、规则加载、分类）直接终止启动
//! - 请求期错误（谓词、解析器、超时）只让当前这次 Hook 调用失败
//! - 持久化错误交给管理命令的调用方处理

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::hooks::HookKind;

/// 错误分类码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigurationError,
    ModuleLoadError,
    PredicateError,
    ResolverError,
    OperationTimeout,
    PersistenceError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigurationError => "configuration_error",
            ErrorCode::ModuleLoadError => "module_load_error",
            ErrorCode::PredicateError => "predicate_error",
            ErrorCode::ResolverError => "resolver_error",
            ErrorCode::OperationTimeout => "operation_timeout",
            ErrorCode::PersistenceError => "persistence_error",
        }
    }
}

/// 规则执行阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RulePhase {
    Predicate,
    Resolver,
}

impl std::fmt::Display for RulePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RulePhase::Predicate => write!(f, "shouldResolve"),
            RulePhase::Resolver => write!(f, "resolve"),
        }
    }
}

/// Proxus 错误类型
#[derive(Debug, Error)]
pub enum ProxusError {
    /// 配置文件缺失字段或 JSON/TOML 格式错误
    #[error("Configuration error at {path}: {message}")]
    Config { path: PathBuf, message: String },

    /// 配置的启用规则在规则目录下不存在
    #[error(
        "No rule found with the name \"{rule}\", please review the configs at \"{config_file}\""
    )]
    RuleNotFound { rule: String, config_file: PathBuf },

    /// 管理命令试图启用一个不存在的规则
    #[error("Unknown rule \"{rule}\", valid rules are: [{}]", .available.join(", "))]
    InvalidRule {
        rule: String,
        available: Vec<String>,
    },

    /// 规则模块结构不合法
    #[error("Malformed rule module \"{rule}\": {message}")]
    ModuleLoad { rule: String, message: String },

    /// 规则的谓词或解析器抛出错误
    #[error("Rule \"{rule}\" failed in {phase} for hook {hook}: {source:#}")]
    RuleFailed {
        rule: String,
        hook: HookKind,
        phase: RulePhase,
        #[source]
        source: anyhow::Error,
    },

    /// 规则的谓词或解析器超时
    #[error("Rule \"{rule}\" timed out in {phase} for hook {hook} after {timeout:?}")]
    RuleTimeout {
        rule: String,
        hook: HookKind,
        phase: RulePhase,
        timeout: Duration,
    },

    /// 文件系统读写失败
    #[error("Persistence error at {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Proxus 结果类型
pub type Result<T> = std::result::Result<T, ProxusError>;

impl ProxusError {
    pub fn config<P: Into<PathBuf>, M: Into<String>>(path: P, message: M) -> Self {
        ProxusError::Config {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn module_load<R: Into<String>, M: Into<String>>(rule: R, message: M) -> Self {
        ProxusError::ModuleLoad {
            rule: rule.into(),
            message: message.into(),
        }
    }

    pub fn persistence<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Self {
        ProxusError::Persistence {
            path: path.into(),
            source,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ProxusError::Config { .. }
            | ProxusError::RuleNotFound { .. }
            | ProxusError::InvalidRule { .. } => ErrorCode::ConfigurationError,
            ProxusError::ModuleLoad { .. } => ErrorCode::ModuleLoadError,
            ProxusError::RuleFailed {
                phase: RulePhase::Predicate,
                ..
            } => ErrorCode::PredicateError,
            ProxusError::RuleFailed {
                phase: RulePhase::Resolver,
                ..
            } => ErrorCode::ResolverError,
            ProxusError::RuleTimeout { .. } => ErrorCode::OperationTimeout,
            ProxusError::Persistence { .. } => ErrorCode::PersistenceError,
        }
    }

    /// 出错的规则名（仅请求期错误与模块错误携带）
    pub fn rule(&self) -> Option<&str> {
        match self {
            ProxusError::RuleFailed { rule, .. }
            | ProxusError::RuleTimeout { rule, .. }
            | ProxusError::ModuleLoad { rule, .. }
            | ProxusError::RuleNotFound { rule, .. } => Some(rule.as_str()),
            _ => None,
        }
    }

    /// 启动期错误不可恢复，进程必须终止启动
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::ConfigurationError | ErrorCode::ModuleLoadError
        )
    }
}

/// 便捷宏：构造配置错误并提前返回
#[macro_export]
macro_rules! bail_config {
    ($path:expr, $($arg:tt)*) => {
        return Err($crate::error::ProxusError::config($path, format!($($arg)*)))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_not_found_message_names_rule_and_config() {
        let err = ProxusError::RuleNotFound {
            rule: "missing".to_string(),
            config_file: PathBuf::from("/tmp/proxus/config.json"),
        };
        let message = err.to_string();
        assert!(message.contains("\"missing\""));
        assert!(message.contains("/tmp/proxus/config.json"));
        assert!(err.is_startup_fatal());
    }

    #[test]
    fn test_rule_failed_code_follows_phase() {
        let err = ProxusError::RuleFailed {
            rule: "r".to_string(),
            hook: HookKind::BeforeSendRequest,
            phase: RulePhase::Predicate,
            source: anyhow::anyhow!("boom"),
        };
        assert_eq!(err.code(), ErrorCode::PredicateError);
        assert_eq!(err.rule(), Some("r"));
        assert!(!err.is_startup_fatal());
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_invalid_rule_lists_available() {
        let err = ProxusError::InvalidRule {
            rule: "nope".to_string(),
            available: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Unknown rule \"nope\", valid rules are: [a, b]"
        );
    }
}
