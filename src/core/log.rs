//! 日志系统模块
//!
//! 基于 `tracing` 提供结构化的日志记录功能。
//!
//! # 特性
//!
//! - 结构化日志：支持键值对
//! - 灵活输出：支持控制台和文件输出
//! - 日志级别：trace, debug, info, warn, error
//! - 按目标区分：分发器内部日志使用 `dist_dispatch::dispatch`，
//!   应用层日志使用 `dist_dispatch::app`
//!
//! # 使用示例
//!
//! ```no_run
//! use dist_dispatch::core::log::{self, LogLevel};
//!
//! log::init_logger(LogLevel::Info, false, None);
//! dist_dispatch::app_info!(producers = 4, "Demo started");
//! ```

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use std::path::Path;

pub use super::config::LogLevel;

/// 初始化日志系统
///
/// 必须在程序开始时调用一次。重复调用会被忽略（全局 subscriber 已安装）。
///
/// # 参数
///
/// * `level` - 日志级别（`RUST_LOG` 存在时优先使用环境变量）
/// * `file_output` - 是否输出到文件
/// * `log_file_path` - 日志文件路径（可选，默认为 "distdispatch.log"）
pub fn init_logger(level: LogLevel, file_output: bool, log_file_path: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_directive()));

    // 工作线程的名字就是分发器名，控制台输出线程名便于排查
    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true);

    let result = if file_output {
        let log_path = log_file_path.unwrap_or("distdispatch.log");
        let path = Path::new(log_path);
        let directory = path.parent().unwrap_or(Path::new("."));
        let filename = path.file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("distdispatch.log");

        // 创建滚动文件 appender（每天滚动）
        let file_appender = RollingFileAppender::new(Rotation::DAILY, directory, filename);

        let file_layer = fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .try_init()
    };

    if let Err(e) = result {
        tracing::debug!("Logger already initialized: {}", e);
    }
}

/// 初始化简单的日志系统（仅控制台输出，Info 级别）
pub fn init_simple() {
    init_logger(LogLevel::Info, false, None);
}

impl LogLevel {
    /// 转换为 `EnvFilter` 指令
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// 分发器内部日志 - Debug 级别
#[macro_export]
macro_rules! dispatch_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: "dist_dispatch::dispatch", $($arg)*)
    };
}

/// 分发器内部日志 - Info 级别
#[macro_export]
macro_rules! dispatch_info {
    ($($arg:tt)*) => {
        tracing::info!(target: "dist_dispatch::dispatch", $($arg)*)
    };
}

/// 分发器内部日志 - Warn 级别
#[macro_export]
macro_rules! dispatch_warn {
    ($($arg:tt)*) => {
        tracing::warn!(target: "dist_dispatch::dispatch", $($arg)*)
    };
}

/// 分发器内部日志 - Error 级别
#[macro_export]
macro_rules! dispatch_error {
    ($($arg:tt)*) => {
        tracing::error!(target: "dist_dispatch::dispatch", $($arg)*)
    };
}

/// 应用层日志 - Info 级别
#[macro_export]
macro_rules! app_info {
    ($($arg:tt)*) => {
        tracing::info!(target: "dist_dispatch::app", $($arg)*)
    };
}

/// 应用层日志 - Warn 级别
#[macro_export]
macro_rules! app_warn {
    ($($arg:tt)*) => {
        tracing::warn!(target: "dist_dispatch::app", $($arg)*)
    };
}

/// 应用层日志 - Error 级别
#[macro_export]
macro_rules! app_error {
    ($($arg:tt)*) => {
        tracing::error!(target: "dist_dispatch::app", $($arg)*)
    };
}

/// 日志级别转换
impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(Level::from(LogLevel::Info), Level::INFO);
        assert_eq!(Level::from(LogLevel::Error), Level::ERROR);
    }

    #[test]
    fn test_directives() {
        assert_eq!(LogLevel::Trace.as_directive(), "trace");
        assert_eq!(LogLevel::Warn.as_directive(), "warn");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_simple();
        init_simple();
        crate::dispatch_info!(test = true, "logger initialized twice");
    }
}
