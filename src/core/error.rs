//! 错误处理模块
//!
//! 定义了分发器中使用的统一错误类型，使用 `thiserror` 提供友好的错误消息。
//!
//! # 设计原则
//!
//! - 使用 `thiserror` 自动实现 `Error` trait
//! - 为每种错误类型提供清晰的上下文信息
//! - 支持错误链（error source）
//! - 易于模式匹配和错误处理
//!
//! 注意：准入拒绝（队列已满或分发器已释放）不是错误，而是静默丢弃。

use thiserror::Error;

/// 分发器统一的 Result 类型
///
/// 所有可能返回错误的函数都应该使用这个类型。
pub type Result<T> = std::result::Result<T, DispatchError>;

/// 分发器的错误类型
#[derive(Debug, Error)]
pub enum DispatchError {
    /// 构造调用时没有提供可调用对象
    #[error("The invocation callable can't be null")]
    NullCallable,

    /// 内联执行时可调用对象返回了错误
    ///
    /// 内联执行没有工作线程居中协调，因此错误直接交给调用者。
    #[error("Invocation failed: {0:#}")]
    Invocation(anyhow::Error),

    /// `ExceptionPolicy::Rethrow` 下工作线程因调用失败而终止
    #[error("Dispatcher '{dispatcher}' terminated by invocation #{invocation}: {message}")]
    WorkerFault {
        dispatcher: String,
        invocation: u64,
        message: String,
    },

    /// 已经存在工作线程，无法在当前线程上运行分发循环
    #[error("Dispatcher '{0}' already has an active worker thread")]
    WorkerActive(String),

    /// 操作系统拒绝创建工作线程
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 配置相关的错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 配置文件未找到
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    /// 配置文件解析失败
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// 配置值无效
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl DispatchError {
    /// 是否为工作线程致命错误
    pub fn is_worker_fault(&self) -> bool {
        matches!(self, DispatchError::WorkerFault { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DispatchError::WorkerFault {
            dispatcher: "render".to_string(),
            invocation: 7,
            message: "boom".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Dispatcher 'render' terminated by invocation #7: boom"
        );
        assert!(err.is_worker_fault());
        assert!(!DispatchError::NullCallable.is_worker_fault());
    }

    #[test]
    fn test_config_error_conversion() {
        let err: DispatchError = ConfigError::InvalidValue {
            field: "dispatcher.queue_cap".to_string(),
            reason: "must be greater than 0".to_string(),
        }
        .into();
        assert!(matches!(err, DispatchError::Config(_)));
        assert!(err.to_string().contains("dispatcher.queue_cap"));
    }

    #[test]
    fn test_invocation_error_keeps_context() {
        let inner = anyhow::anyhow!("texture missing").context("upload failed");
        let err = DispatchError::Invocation(inner);
        assert_eq!(err.to_string(), "Invocation failed: upload failed: texture missing");
    }
}
