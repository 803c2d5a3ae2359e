//! 调用分发模块
//!
//! 把任意工作编组到一个专用的线程亲和工作线程上执行。典型用途是只能在
//! 单个线程上使用的资源（例如渲染上下文）：生产者线程提交上传任务，
//! 主循环阻塞等待每帧的同步调用。
//!
//! # 模块组织
//!
//! - `dispatcher`：分发器和分发循环
//! - `invocation`：单次调用（可调用对象、参数、结果槽和完成信号）
//! - `registry`：进程级等待登记表，用于死锁规避
//! - `signal`：等待原语
//! - `state`：状态与策略枚举

pub mod dispatcher;
pub mod invocation;
pub mod registry;
pub mod signal;
pub mod state;

pub use dispatcher::{leaked_dispatchers, Dispatcher};
pub use invocation::{Invocation, InvokeInterceptor};
pub use registry::{waiting_count, CallerId};
pub use signal::CompletionEvent;
pub use state::{DispatchMode, DispatcherState, ExceptionPolicy, InvokeState, ThreadPriority};
