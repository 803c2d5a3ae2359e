//! DistDispatch - 线程亲和的调用分发库
//!
//! 把工作从任意数量的生产者线程编组到一个专用工作线程上执行，
//! 支持即发即弃和阻塞的请求/响应两种调用方式、双优先级队列、
//! 有界背压以及跨分发器的死锁规避。
//!
//! # 模块结构
//!
//! - `core`: 核心功能模块（日志、配置、错误处理）
//! - `dispatch`: 分发器、调用和等待原语
//!
//! # 使用示例
//!
//! ```no_run
//! use dist_dispatch::dispatch::Dispatcher;
//! use std::time::Duration;
//!
//! let dispatcher = Dispatcher::with_name("render-context");
//!
//! // 即发即弃
//! dispatcher.begin_invoke(|bytes: Vec<u8>| Ok(bytes.len()), vec![0u8; 64], false)?;
//!
//! // 阻塞等待结果，最多 16 毫秒
//! let frame = dispatcher.invoke(|n: u32| Ok(n + 1), 41, Some(Duration::from_millis(16)), true)?;
//! println!("frame = {:?}", frame);
//!
//! dispatcher.dispose(true, None);
//! # Ok::<(), dist_dispatch::core::DispatchError>(())
//! ```

pub mod core;
pub mod dispatch;
