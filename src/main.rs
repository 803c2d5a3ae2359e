//! DistDispatch 演示程序
//!
//! 模拟一个只能在单线程上使用的渲染上下文：若干生产者线程把缓冲区上传
//! 任务异步提交给上下文线程，主线程每帧发起一次带帧预算超时的阻塞调用。
//!
//! # 使用方法
//!
//! ```bash
//! # 使用配置文件
//! cargo run
//!
//! # 命令行覆盖
//! cargo run -- --producers 8 --frames 120 --queue-cap 64 --policy log
//! ```
//!
//! # 架构概览
//!
//! ```text
//! ┌────────────┐ ┌────────────┐     ┌────────────┐
//! │ producer 0 │ │ producer 1 │ ... │ producer N │   begin_invoke(upload)
//! └─────┬──────┘ └─────┬──────┘     └─────┬──────┘
//!       └──────────────┼──────────────────┘
//!                ┌─────▼──────┐
//!                │ Dispatcher │ ◄──── main: invoke(present, 帧预算)
//!                └─────┬──────┘
//!                ┌─────▼──────┐
//!                │ 上下文线程   │  线程局部的 RenderContext
//!                └────────────┘
//! ```

use anyhow::Context;
use std::cell::RefCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use dist_dispatch::core::{log, Config};
use dist_dispatch::dispatch::{leaked_dispatchers, Dispatcher};
use dist_dispatch::{app_error, app_info, app_warn};

/// 只能在创建它的线程上使用的渲染上下文
struct RenderContext {
    owner: ThreadId,
    uploaded_bytes: usize,
    uploads: usize,
    frames: u32,
}

impl RenderContext {
    fn new() -> Self {
        Self {
            owner: thread::current().id(),
            uploaded_bytes: 0,
            uploads: 0,
            frames: 0,
        }
    }

    fn check_thread(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.owner == thread::current().id(),
            "render context used from a foreign thread"
        );
        Ok(())
    }

    fn upload(&mut self, payload: &[u8]) -> anyhow::Result<usize> {
        self.check_thread()?;
        self.uploaded_bytes += payload.len();
        self.uploads += 1;
        Ok(self.uploads)
    }

    fn present(&mut self) -> anyhow::Result<u32> {
        self.check_thread()?;
        self.frames += 1;
        Ok(self.frames)
    }
}

thread_local! {
    static CONTEXT: RefCell<Option<RenderContext>> = const { RefCell::new(None) };
}

/// 在上下文线程上访问渲染上下文，第一次访问时创建
fn with_context<T>(f: impl FnOnce(&mut RenderContext) -> anyhow::Result<T>) -> anyhow::Result<T> {
    CONTEXT.with(|slot| {
        let mut slot = slot.borrow_mut();
        let context = slot.get_or_insert_with(RenderContext::new);
        f(context)
    })
}

#[derive(Default)]
struct Stats {
    submitted: AtomicUsize,
    dropped: AtomicUsize,
}

fn main() -> anyhow::Result<()> {
    // 1. 加载配置（在初始化日志之前）
    let mut config = Config::from_file_or_default("config.toml");

    // 2. 应用命令行参数
    config.apply_args(std::env::args());

    // 3. 验证配置
    config.validate().context("Invalid configuration")?;

    // 4. 初始化日志系统
    let log_file = config
        .logging
        .file_output
        .then_some(config.logging.log_file.as_str());
    log::init_logger(config.logging.level, config.logging.file_output, log_file);
    app_info!(version = env!("CARGO_PKG_VERSION"), "DistDispatch demo starting");
    app_info!(
        dispatcher = %config.dispatcher.name,
        policy = ?config.dispatcher.exception_policy,
        queue_cap = ?config.dispatcher.queue_cap,
        producers = config.demo.producers,
        frames = config.demo.frames,
        "Demo configuration"
    );

    // 5. 创建上下文线程的分发器
    let dispatcher = Arc::new(Dispatcher::new(config.dispatcher.clone()));
    let stats = Arc::new(Stats::default());
    let demo = config.demo.clone();
    let pause = Duration::from_millis(demo.frame_budget_ms / 2);
    let (frames, uploads_per_frame) = (demo.frames, demo.uploads_per_frame);

    // 6. 启动生产者线程
    let producers: Vec<_> = (0..demo.producers)
        .map(|index| {
            let dispatcher = Arc::clone(&dispatcher);
            let stats = Arc::clone(&stats);
            thread::Builder::new()
                .name(format!("producer-{index}"))
                .spawn(move || -> anyhow::Result<()> {
                    for frame in 0..frames {
                        for upload in 0..uploads_per_frame {
                            let size = 256 * (1 + (index + upload as usize) % 4);
                            let payload = vec![frame as u8; size];
                            let accepted = dispatcher.begin_invoke(
                                |payload: Vec<u8>| with_context(|ctx| ctx.upload(&payload)),
                                payload,
                                false,
                            )?;
                            let counter = if accepted.is_some() { &stats.submitted } else { &stats.dropped };
                            counter.fetch_add(1, Ordering::Relaxed);
                        }
                        thread::sleep(pause);
                    }
                    Ok(())
                })
                .context("Failed to spawn producer thread")
        })
        .collect::<anyhow::Result<_>>()?;

    // 7. 主循环：每帧一次带预算的阻塞调用
    let budget = Duration::from_millis(demo.frame_budget_ms);
    let mut missed = 0u32;
    for frame in 0..demo.frames {
        let start = Instant::now();
        match dispatcher.invoke(|_| with_context(|ctx| ctx.present()), (), Some(budget), true)? {
            Some(presented) => tracing::trace!(frame, presented, "Frame presented"),
            None => {
                missed += 1;
                app_warn!(frame, "Frame missed its budget");
            }
        }
        if let Some(rest) = budget.checked_sub(start.elapsed()) {
            thread::sleep(rest);
        }
    }

    for producer in producers {
        match producer.join() {
            Ok(result) => result?,
            Err(_) => app_error!("Producer thread panicked"),
        }
    }

    // 8. 排空之后读取上下文统计
    let (uploads, bytes, frames) = dispatcher
        .invoke(
            |_| with_context(|ctx| Ok((ctx.uploads, ctx.uploaded_bytes, ctx.frames))),
            (),
            None,
            false,
        )?
        .unwrap_or_default();

    app_info!(
        submitted = stats.submitted.load(Ordering::Relaxed),
        dropped = stats.dropped.load(Ordering::Relaxed),
        uploads,
        bytes,
        frames,
        missed,
        "Demo finished"
    );

    // 9. 释放分发器
    dispatcher.dispose(true, Some(Duration::from_secs(1)));
    if let Some(fault) = dispatcher.fault() {
        app_error!(%fault, "Dispatcher terminated by a failed invocation");
    }
    app_info!(leaked = leaked_dispatchers(), "Shutdown complete");
    Ok(())
}
