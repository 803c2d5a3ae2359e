//! 分发器和调用的状态枚举

use serde::{Deserialize, Serialize};
use std::fmt;

/// 分发循环所在的线程
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// 分发循环运行在调用 `run_on_current_thread` 的线程上，该线程阻塞直到分发器被释放
    OnCurrentThread,
    /// 分发器在首次提交时创建独立的工作线程
    #[default]
    OnSeparateThread,
}

/// 分发器的运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DispatcherState {
    /// 工作线程已创建，尚未进入分发循环
    Starting = 0,
    /// 正在等待调用（或尚未创建工作线程）
    Idle = 1,
    /// 正在执行调用
    Busy = 2,
    /// 已请求释放，工作线程尚未退出
    Disposing = 3,
    /// 已释放
    Disposed = 4,
}

impl DispatcherState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => DispatcherState::Starting,
            1 => DispatcherState::Idle,
            2 => DispatcherState::Busy,
            3 => DispatcherState::Disposing,
            _ => DispatcherState::Disposed,
        }
    }
}

/// 单次调用的状态
///
/// 状态只会单调前进：Idle → Queued → Started → {Completed | Errored}。
/// 内联执行跳过 Queued。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum InvokeState {
    /// 尚未使用
    Idle = 0,
    /// 已进入队列
    Queued = 1,
    /// 已开始执行
    Started = 2,
    /// 已完成
    Completed = 3,
    /// 执行出错
    Errored = 4,
}

impl InvokeState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => InvokeState::Idle,
            1 => InvokeState::Queued,
            2 => InvokeState::Started,
            3 => InvokeState::Completed,
            _ => InvokeState::Errored,
        }
    }

    /// 是否已到达终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, InvokeState::Completed | InvokeState::Errored)
    }
}

/// 工作线程上调用失败时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExceptionPolicy {
    /// 记录错误日志，分发循环继续
    Log,
    /// 终止分发循环，错误成为工作线程的返回值
    Rethrow,
    /// 忽略
    Ignore,
}

impl ExceptionPolicy {
    /// 从字符串解析（不区分大小写）
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "log" => Some(Self::Log),
            "rethrow" | "throw" => Some(Self::Rethrow),
            "ignore" => Some(Self::Ignore),
            _ => None,
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            ExceptionPolicy::Log => 0,
            ExceptionPolicy::Rethrow => 1,
            ExceptionPolicy::Ignore => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => ExceptionPolicy::Log,
            1 => ExceptionPolicy::Rethrow,
            _ => ExceptionPolicy::Ignore,
        }
    }
}

/// 工作线程优先级
///
/// 只是调度提示：记录在日志和状态中，标准库不提供设置线程优先级的接口。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadPriority {
    Lowest,
    BelowNormal,
    #[default]
    Normal,
    AboveNormal,
    Highest,
}

impl fmt::Display for ThreadPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThreadPriority::Lowest => "lowest",
            ThreadPriority::BelowNormal => "below_normal",
            ThreadPriority::Normal => "normal",
            ThreadPriority::AboveNormal => "above_normal",
            ThreadPriority::Highest => "highest",
        };
        f.write_str(name)
    }
}
