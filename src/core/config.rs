//! 配置管理模块
//!
//! 提供分发器配置的加载、解析和管理功能。
//! 支持从 TOML 配置文件加载，也支持命令行参数覆盖。
//!
//! # 配置文件格式 (config.toml)
//!
//! ```toml
//! [dispatcher]
//! name = "render-context"
//! is_background = true
//! exception_policy = "log"     # log, rethrow, ignore
//! thread_priority = "normal"   # lowest, below_normal, normal, above_normal, highest
//! queue_cap = 1024             # 省略表示不限制
//! mode = "on_separate_thread"  # 或 "on_current_thread"
//! log_on_deadlock_resolve = true
//!
//! [logging]
//! level = "info"      # trace, debug, info, warn, error
//! file_output = false
//!
//! [demo]
//! producers = 4
//! frames = 60
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::{ConfigError, Result};
use crate::dispatch::{DispatchMode, ExceptionPolicy, ThreadPriority};

/// 全局配置
///
/// 包含了分发器和演示程序运行所需的所有配置项。
/// 可以从配置文件加载，也可以通过代码构建。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// 分发器配置
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,

    /// 演示程序配置
    #[serde(default)]
    pub demo: DemoConfig,
}

/// 分发器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// 名称，仅用于诊断（同时作为工作线程名）
    #[serde(default = "default_name")]
    pub name: String,

    /// 是否为后台线程
    ///
    /// 前台分发器在被丢弃时会同步等待工作线程退出。
    #[serde(default = "default_is_background")]
    pub is_background: bool,

    /// 调用失败时的处理策略
    #[serde(default = "default_exception_policy")]
    pub exception_policy: ExceptionPolicy,

    /// 工作线程优先级提示
    #[serde(default)]
    pub thread_priority: ThreadPriority,

    /// 队列长度上限，`None` 表示不限制
    #[serde(default)]
    pub queue_cap: Option<usize>,

    /// 分发循环所在的线程
    #[serde(default)]
    pub mode: DispatchMode,

    /// 检测并化解死锁时是否记录日志
    #[serde(default = "default_log_on_deadlock_resolve")]
    pub log_on_deadlock_resolve: bool,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// 是否输出到文件
    #[serde(default = "default_file_output")]
    pub file_output: bool,

    /// 日志文件路径
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// 演示程序配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    /// 生产者线程数
    #[serde(default = "default_producers")]
    pub producers: usize,

    /// 模拟的帧数
    #[serde(default = "default_frames")]
    pub frames: u32,

    /// 每个生产者每帧提交的上传任务数
    #[serde(default = "default_uploads_per_frame")]
    pub uploads_per_frame: u32,

    /// 每帧等待渲染线程的时间预算（毫秒）
    #[serde(default = "default_frame_budget_ms")]
    pub frame_budget_ms: u64,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

// 默认值函数
fn default_name() -> String { "dispatcher".to_string() }
fn default_is_background() -> bool { true }
fn default_exception_policy() -> ExceptionPolicy { ExceptionPolicy::Rethrow }
fn default_log_on_deadlock_resolve() -> bool { true }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_file_output() -> bool { false }
fn default_log_file() -> String { "distdispatch.log".to_string() }
fn default_producers() -> usize { 4 }
fn default_frames() -> u32 { 60 }
fn default_uploads_per_frame() -> u32 { 8 }
fn default_frame_budget_ms() -> u64 { 16 }

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            is_background: default_is_background(),
            exception_policy: default_exception_policy(),
            thread_priority: ThreadPriority::default(),
            queue_cap: None,
            mode: DispatchMode::default(),
            log_on_deadlock_resolve: default_log_on_deadlock_resolve(),
        }
    }
}

impl DispatcherConfig {
    /// 使用默认值创建指定名称的配置
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// 实际生效的队列上限
    pub fn effective_queue_cap(&self) -> usize {
        self.queue_cap.unwrap_or(usize::MAX)
    }

    /// 验证分发器配置
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "dispatcher.name".to_string(),
                reason: "Dispatcher name must not be empty".to_string(),
            }.into());
        }

        if self.queue_cap == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "dispatcher.queue_cap".to_string(),
                reason: "Queue cap must be greater than 0".to_string(),
            }.into());
        }

        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: default_file_output(),
            log_file: default_log_file(),
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            producers: default_producers(),
            frames: default_frames(),
            uploads_per_frame: default_uploads_per_frame(),
            frame_budget_ms: default_frame_budget_ms(),
        }
    }
}

impl Config {
    /// 从配置文件加载
    ///
    /// # 参数
    ///
    /// * `path` - 配置文件路径
    ///
    /// # 返回值
    ///
    /// 成功返回 `Config` 实例，失败返回错误
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let contents = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path_str.clone()))?;

        Self::from_toml_str(&contents)
    }

    /// 从 TOML 字符串解析配置
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()).into())
    }

    /// 从配置文件加载，如果文件不存在则使用默认配置
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_default()
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// 从命令行参数覆盖配置
    ///
    /// # 说明
    ///
    /// 支持的参数：
    /// - `--queue-cap <value>`: 设置队列上限
    /// - `--policy <log|rethrow|ignore>`: 设置调用失败策略
    /// - `--producers <value>`: 设置演示程序的生产者线程数
    /// - `--frames <value>`: 设置演示程序的帧数
    /// - `--foreground`: 使用前台工作线程
    pub fn apply_args<I>(&mut self, args: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();
        let value_of = |flag: &str| {
            args.iter()
                .position(|a| a == flag)
                .and_then(|idx| args.get(idx + 1))
        };

        if let Some(cap) = value_of("--queue-cap").and_then(|v| v.parse().ok()) {
            self.dispatcher.queue_cap = Some(cap);
        }

        if let Some(policy) = value_of("--policy").and_then(|v| ExceptionPolicy::parse(v)) {
            self.dispatcher.exception_policy = policy;
        }

        if let Some(producers) = value_of("--producers").and_then(|v| v.parse().ok()) {
            self.demo.producers = producers;
        }

        if let Some(frames) = value_of("--frames").and_then(|v| v.parse().ok()) {
            self.demo.frames = frames;
        }

        if args.iter().any(|a| a == "--foreground") {
            self.dispatcher.is_background = false;
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        self.dispatcher.validate()?;

        if self.demo.producers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "demo.producers".to_string(),
                reason: "At least one producer thread is required".to_string(),
            }.into());
        }

        Ok(())
    }
}
