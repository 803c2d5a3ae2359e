//! 线程亲和的调用分发器
//!
//! 把任意工作从多个调用线程编组到一个专用工作线程上执行，支持即发即弃
//! （`begin_invoke`）和阻塞的请求/响应（`invoke` / `end_invoke`）两种方式。
//!
//! # 分发循环
//!
//! ```text
//!            ┌──────────── 队列为空或已暂停 ────────────┐
//!            ▼                                          │
//!   ┌──────────────┐  唤醒   ┌──────────────────────────┴───┐
//!   │     Idle     │ ──────► │ Draining                     │
//!   │ (等待唤醒信号) │         │ 排空优先队列 → 执行一个普通调用 │
//!   └──────┬───────┘         │ → 再排空优先队列 → ...         │
//!          │                 └──────────────┬───────────────┘
//!          │ 已释放 / 被中断 / Rethrow 失败   │
//!          ▼                                ▼
//!   ┌──────────────────────────────────────────┐
//!   │                Terminated                │
//!   └──────────────────────────────────────────┘
//! ```
//!
//! 优先调用最多只会被一个普通调用延迟。
//!
//! # 死锁规避
//!
//! 阻塞等待前调用者会登记到进程级等待登记表，记下它在等哪个分发器。如果目标
//! 分发器的工作线程（直接或沿着等待链间接地）正在等调用者自己，阻塞就会形成
//! 环：此时调用被无条件放入优先队列并立即返回，不再阻塞，用严格的 FIFO 公平性
//! 换取前进保证。这是尽力而为的缓解措施，被改道的调用仍会排在已有的优先调用
//! 之后。没有成环的嵌套阻塞调用照常等待。
//!
//! # 释放
//!
//! `dispose` 之后新的提交被静默丢弃；队列中尚未执行的调用不会被排空，
//! 永远停留在 Queued 状态。

use crossbeam_queue::SegQueue;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::invocation::{Invocation, InvokeInterceptor, Job};
use super::registry::{self, CallerId, WorkerSlot};
use super::signal::{CompletionEvent, WakeHandle, WakeSignal};
use super::state::{DispatchMode, DispatcherState, ExceptionPolicy, ThreadPriority};
use crate::core::config::DispatcherConfig;
use crate::core::error::{DispatchError, Result};
use crate::{dispatch_debug, dispatch_error, dispatch_info, dispatch_warn};

/// 阻塞等待时检查分发器是否已释放的间隔
const DISPOSAL_POLL: Duration = Duration::from_millis(25);

static LEAKED_DISPATCHERS: AtomicUsize = AtomicUsize::new(0);

/// 没有调用 `dispose` 就被丢弃的分发器数量
pub fn leaked_dispatchers() -> usize {
    LEAKED_DISPATCHERS.load(Ordering::Acquire)
}

/// 线程亲和的调用分发器
///
/// 每个实例最多拥有一个工作线程，在第一次提交时惰性创建。
/// 工作线程上的回调需要访问分发器时，把它包在 `Arc` 里共享。
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    is_background: bool,
    mode: DispatchMode,

    normal: SegQueue<Arc<dyn Job>>,
    priority: SegQueue<Arc<dyn Job>>,

    running: AtomicBool,
    disposed: AtomicBool,
    executing: AtomicBool,
    state: AtomicU8,

    queue_cap: AtomicUsize,
    policy: AtomicU8,
    log_on_deadlock_resolve: AtomicBool,
    thread_priority: Mutex<ThreadPriority>,
    interceptor: RwLock<Option<Arc<dyn InvokeInterceptor>>>,

    /// 惰性创建工作线程的互斥区
    worker: Mutex<Option<Worker>>,
    worker_thread: Arc<WorkerSlot>,
    wake: RwLock<Option<WakeHandle>>,
    generation: AtomicU64,
    ever_started: AtomicBool,
    fault: Mutex<Option<String>>,
}

struct Worker {
    /// 在当前线程上运行分发循环时为 `None`；Rethrow 失败是线程的返回值
    handle: Option<JoinHandle<Result<()>>>,
    exited: Arc<CompletionEvent>,
    generation: u64,
}

impl Dispatcher {
    /// 创建分发器，此时还没有工作线程
    pub fn new(config: DispatcherConfig) -> Self {
        let inner = Inner {
            queue_cap: AtomicUsize::new(config.effective_queue_cap()),
            name: config.name,
            is_background: config.is_background,
            mode: config.mode,
            normal: SegQueue::new(),
            priority: SegQueue::new(),
            running: AtomicBool::new(true),
            disposed: AtomicBool::new(false),
            executing: AtomicBool::new(false),
            state: AtomicU8::new(DispatcherState::Idle as u8),
            policy: AtomicU8::new(config.exception_policy.to_u8()),
            log_on_deadlock_resolve: AtomicBool::new(config.log_on_deadlock_resolve),
            thread_priority: Mutex::new(config.thread_priority),
            interceptor: RwLock::new(None),
            worker: Mutex::new(None),
            worker_thread: Arc::new(WorkerSlot::default()),
            wake: RwLock::new(None),
            generation: AtomicU64::new(0),
            ever_started: AtomicBool::new(false),
            fault: Mutex::new(None),
        };

        dispatch_debug!(
            dispatcher = %inner.name,
            background = inner.is_background,
            mode = ?inner.mode,
            "Dispatcher created"
        );

        Self { inner: Arc::new(inner) }
    }

    /// 使用默认配置创建指定名称的分发器
    pub fn with_name(name: impl Into<String>) -> Self {
        Self::new(DispatcherConfig::named(name))
    }

    // ------------------------------------------------------------------
    // 提交
    // ------------------------------------------------------------------

    /// 异步提交调用
    ///
    /// 调用线程就是工作线程时立即内联执行。分发器已释放或队列已满时静默丢弃，
    /// 返回 `Ok(None)`。否则返回共享的调用句柄，可以交给 `end_invoke` 取结果。
    ///
    /// 只有内联执行失败或工作线程无法创建时返回错误。
    pub fn begin_invoke<A, R, F>(
        &self,
        callable: F,
        argument: A,
        priority: bool,
    ) -> Result<Option<Arc<Invocation<A, R>>>>
    where
        A: Send + 'static,
        R: Clone + Send + Sync + 'static,
        F: FnOnce(A) -> anyhow::Result<R> + Send + 'static,
    {
        let invocation = Arc::new(Invocation::new(callable, argument));
        let admitted = self.begin_invoke_with(&invocation, priority)?;
        Ok(admitted.then_some(invocation))
    }

    /// 异步提交一个已经构造好的调用，返回是否被接收（或内联执行）
    pub fn begin_invoke_with<A, R>(
        &self,
        invocation: &Arc<Invocation<A, R>>,
        priority: bool,
    ) -> Result<bool>
    where
        A: Send + 'static,
        R: Clone + Send + Sync + 'static,
    {
        let inner = &self.inner;
        if inner.is_worker_thread() {
            invocation.run_inline()?;
            return Ok(true);
        }

        if !inner.admits(invocation.id()) {
            return Ok(false);
        }
        inner.ensure_worker()?;

        if !invocation.mark_queued(priority) {
            dispatch_debug!(
                dispatcher = %inner.name,
                invocation = invocation.id(),
                "Invocation already submitted, ignored"
            );
            return Ok(false);
        }
        inner.enqueue(Arc::clone(invocation) as Arc<dyn Job>, priority);
        Ok(true)
    }

    /// 同步调用
    ///
    /// 调用线程就是工作线程时内联执行，错误直接返回。分发器已释放或队列已满
    /// 时返回 `Ok(None)`。否则阻塞最多 `timeout`（`None` 为无限等待），然后
    /// 返回结果槽的当前值；超时不会取消调用。
    pub fn invoke<A, R, F>(
        &self,
        callable: F,
        argument: A,
        timeout: Option<Duration>,
        priority: bool,
    ) -> Result<Option<R>>
    where
        A: Send + 'static,
        R: Clone + Send + Sync + 'static,
        F: FnOnce(A) -> anyhow::Result<R> + Send + 'static,
    {
        let invocation = Arc::new(Invocation::new(callable, argument));
        self.invoke_with(&invocation, timeout, priority)
    }

    /// 同步执行一个已经构造好的调用，超时后仍然可以通过句柄观察它的状态
    pub fn invoke_with<A, R>(
        &self,
        invocation: &Arc<Invocation<A, R>>,
        timeout: Option<Duration>,
        priority: bool,
    ) -> Result<Option<R>>
    where
        A: Send + 'static,
        R: Clone + Send + Sync + 'static,
    {
        let inner = &self.inner;
        if inner.is_worker_thread() {
            return invocation.run_inline();
        }

        if !inner.admits(invocation.id()) {
            return Ok(invocation.result());
        }
        inner.ensure_worker()?;

        let registration = registry::try_register(CallerId::current(), &inner.worker_thread);
        let reroute = registration.is_none();

        if !invocation.mark_queued(priority || reroute) {
            return Ok(invocation.result());
        }

        if reroute {
            // 工作线程（间接地）在等调用者：排到优先队列，不再等待
            inner.enqueue(Arc::clone(invocation) as Arc<dyn Job>, true);
            inner.report_deadlock(invocation.id());
            return Ok(invocation.result());
        }

        inner.enqueue(Arc::clone(invocation) as Arc<dyn Job>, priority);
        let result = inner.await_completion(invocation, timeout);
        drop(registration);

        invocation.mark_completed_synchronously();
        Ok(result)
    }

    /// 等待之前用 `begin_invoke` 提交的调用完成
    ///
    /// 从未创建过工作线程或分发器已释放时立即返回当前结果。
    pub fn end_invoke<A, R>(
        &self,
        invocation: &Arc<Invocation<A, R>>,
        timeout: Option<Duration>,
    ) -> Option<R>
    where
        A: Send + 'static,
        R: Clone + Send + Sync + 'static,
    {
        let inner = &self.inner;
        if inner.is_disposed() || !inner.ever_started.load(Ordering::Acquire) {
            return invocation.result();
        }

        if inner.is_worker_thread() {
            invocation.mark_completed_synchronously();
            return invocation.result();
        }
        if !(invocation.is_queued() || invocation.is_started()) {
            return invocation.result();
        }

        let Some(registration) = registry::try_register(CallerId::current(), &inner.worker_thread) else {
            inner.report_deadlock(invocation.id());
            return invocation.result();
        };

        let result = inner.await_completion(invocation, timeout);
        drop(registration);
        invocation.mark_completed_synchronously();
        result
    }

    // ------------------------------------------------------------------
    // 生命周期
    // ------------------------------------------------------------------

    /// 暂停或恢复分发
    ///
    /// 暂停期间调用继续排队但不会执行；恢复时如果有待处理的调用则唤醒工作线程。
    pub fn set_running(&self, running: bool) {
        let inner = &self.inner;
        if inner.running.swap(running, Ordering::AcqRel) == running {
            return;
        }
        dispatch_debug!(dispatcher = %inner.name, running, "Dispatcher running state changed");
        if running && inner.queue_count() != 0 {
            inner.notify();
        }
    }

    /// 中断正常执行（强烈不推荐）
    ///
    /// - `clear_queue`：丢弃两个队列中的调用，它们永远停留在 Queued
    /// - `abort_current`：放弃当前工作线程。线程无法被强制终止，它会在当前调用
    ///   结束后退出；期间它不再处理任何队列
    /// - `restart`：创建新的工作线程
    ///
    /// 放弃工作线程而不重新创建等同于释放分发器。
    pub fn interrupt(&self, abort_current: bool, restart: bool, clear_queue: bool) {
        let inner = &self.inner;

        if clear_queue {
            let discarded = inner.clear_queues();
            dispatch_warn!(dispatcher = %inner.name, discarded, "Dispatch queues cleared");
        }

        if abort_current {
            let abandoned = inner.worker.lock().take();
            if let Some(worker) = abandoned {
                inner.generation.fetch_add(1, Ordering::AcqRel);
                if let Some(wake) = inner.wake.write().take() {
                    wake.notify();
                }
                inner.worker_thread.set(None);
                inner.executing.store(false, Ordering::Release);
                dispatch_warn!(
                    dispatcher = %inner.name,
                    generation = worker.generation,
                    "Worker thread abandoned"
                );
                // 分离线程，它会在当前调用结束后自行退出
                drop(worker);
            }

            if !restart {
                self.dispose(false, None);
                return;
            }
        }

        if restart {
            if let Err(e) = inner.ensure_worker() {
                dispatch_error!(dispatcher = %inner.name, error = %e, "Failed to restart worker thread");
            }
        }
    }

    /// 释放分发器
    ///
    /// 停止接收新的调用并唤醒工作线程让它退出循环。`sync` 为 `true` 时等待
    /// 工作线程结束（最多 `timeout`，`None` 为无限等待）；在工作线程自己身上
    /// 调用时自动降级为异步释放。重复调用无效果。
    pub fn dispose(&self, sync: bool, timeout: Option<Duration>) {
        let inner = &self.inner;
        if inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let sync = sync && !inner.is_worker_thread();
        let worker = inner.worker.lock().take();

        match worker {
            None => inner.set_state(DispatcherState::Disposed),
            Some(worker) => {
                inner.set_state(DispatcherState::Disposing);
                inner.notify();

                if sync {
                    if worker.exited.wait(timeout) {
                        match worker.handle.map(JoinHandle::join) {
                            Some(Ok(Err(fault))) => {
                                dispatch_debug!(dispatcher = %inner.name, error = %fault, "Worker thread joined with fault");
                            }
                            Some(Err(_)) => {
                                dispatch_error!(dispatcher = %inner.name, "Worker thread panicked");
                            }
                            _ => {}
                        }
                        inner.set_state(DispatcherState::Disposed);
                    } else {
                        dispatch_warn!(
                            dispatcher = %inner.name,
                            timeout_ms = timeout.map(|t| t.as_millis() as u64),
                            "Timed out waiting for worker thread, detaching"
                        );
                    }
                }
            }
        }

        dispatch_info!(
            dispatcher = %inner.name,
            sync,
            abandoned = inner.queue_count(),
            "Dispatcher disposed"
        );
    }

    /// 让当前线程成为工作线程并运行分发循环，直到分发器被释放
    ///
    /// 已经存在工作线程时返回 `DispatchError::WorkerActive`。
    /// Rethrow 策略下的调用失败作为错误返回。
    pub fn run_on_current_thread(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.is_disposed() {
            return Ok(());
        }

        let (signal, generation, exited) = {
            let mut slot = inner.worker.lock();
            if slot.is_some() {
                return Err(DispatchError::WorkerActive(inner.name.clone()));
            }
            let generation = inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
            let (signal, wake) = WakeSignal::pair();
            let exited = Arc::new(CompletionEvent::new());
            *inner.wake.write() = Some(wake);
            *slot = Some(Worker {
                handle: None,
                exited: Arc::clone(&exited),
                generation,
            });
            (signal, generation, exited)
        };
        inner.ever_started.store(true, Ordering::Release);

        inner.set_state(DispatcherState::Starting);
        let result = inner.run_loop(signal, generation);
        exited.set();
        result
    }

    // ------------------------------------------------------------------
    // 配置与观察
    // ------------------------------------------------------------------

    /// 安装或移除调用拦截器
    pub fn set_interceptor(&self, interceptor: Option<Arc<dyn InvokeInterceptor>>) {
        *self.inner.interceptor.write() = interceptor;
    }

    pub fn set_queue_cap(&self, cap: usize) {
        self.inner.queue_cap.store(cap, Ordering::Release);
    }

    pub fn queue_cap(&self) -> usize {
        self.inner.queue_cap.load(Ordering::Acquire)
    }

    pub fn set_exception_policy(&self, policy: ExceptionPolicy) {
        self.inner.policy.store(policy.to_u8(), Ordering::Release);
    }

    pub fn exception_policy(&self) -> ExceptionPolicy {
        self.inner.policy()
    }

    pub fn set_log_on_deadlock_resolve(&self, enabled: bool) {
        self.inner.log_on_deadlock_resolve.store(enabled, Ordering::Release);
    }

    pub fn log_on_deadlock_resolve(&self) -> bool {
        self.inner.log_on_deadlock_resolve.load(Ordering::Acquire)
    }

    /// 设置工作线程优先级提示
    pub fn set_thread_priority(&self, priority: ThreadPriority) {
        let mut current = self.inner.thread_priority.lock();
        if *current != priority {
            *current = priority;
            dispatch_debug!(dispatcher = %self.inner.name, %priority, "Thread priority hint changed");
        }
    }

    pub fn thread_priority(&self) -> ThreadPriority {
        *self.inner.thread_priority.lock()
    }

    /// 队列中等待的调用数（两个队列之和）
    pub fn queue_count(&self) -> usize {
        self.inner.queue_count()
    }

    /// 工作线程是否正在执行调用
    pub fn is_executing(&self) -> bool {
        self.inner.executing.load(Ordering::Acquire)
    }

    /// 调用线程是否需要编组到工作线程（即不是工作线程本身）
    ///
    /// 分发器已释放后返回 `false`。
    pub fn invoke_required(&self) -> bool {
        !self.inner.is_disposed() && !self.inner.is_worker_thread()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    pub fn state(&self) -> DispatcherState {
        DispatcherState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_background(&self) -> bool {
        self.inner.is_background
    }

    pub fn mode(&self) -> DispatchMode {
        self.inner.mode
    }

    /// Rethrow 策略下终止工作线程的错误描述
    pub fn fault(&self) -> Option<String> {
        self.inner.fault.lock().clone()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if self.inner.is_disposed() {
            return;
        }
        LEAKED_DISPATCHERS.fetch_add(1, Ordering::AcqRel);
        dispatch_warn!(dispatcher = %self.inner.name, "Dispatcher dropped without dispose()");
        self.dispose(!self.inner.is_background, None);
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("queue_count", &self.queue_count())
            .finish()
    }
}

impl Inner {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn is_worker_thread(&self) -> bool {
        self.worker_thread.is(thread::current().id())
    }

    fn policy(&self) -> ExceptionPolicy {
        ExceptionPolicy::from_u8(self.policy.load(Ordering::Acquire))
    }

    fn queue_count(&self) -> usize {
        self.normal.len() + self.priority.len()
    }

    /// 准入检查：已释放或队列已满时丢弃
    fn admits(&self, invocation: u64) -> bool {
        if self.is_disposed() {
            dispatch_debug!(dispatcher = %self.name, invocation, "Dispatcher disposed, invocation dropped");
            return false;
        }
        let count = self.queue_count();
        if count >= self.queue_cap.load(Ordering::Acquire) {
            dispatch_debug!(dispatcher = %self.name, invocation, count, "Queue full, invocation dropped");
            return false;
        }
        true
    }

    fn enqueue(&self, job: Arc<dyn Job>, priority: bool) {
        if priority {
            self.priority.push(job);
        } else {
            self.normal.push(job);
        }
        self.notify();
    }

    fn notify(&self) {
        if let Some(wake) = self.wake.read().as_ref() {
            wake.notify();
        }
    }

    fn clear_queues(&self) -> usize {
        let mut discarded = 0;
        while self.priority.pop().is_some() {
            discarded += 1;
        }
        while self.normal.pop().is_some() {
            discarded += 1;
        }
        discarded
    }

    fn report_deadlock(&self, invocation: u64) {
        if self.log_on_deadlock_resolve.load(Ordering::Acquire) {
            dispatch_warn!(
                dispatcher = %self.name,
                invocation,
                "A deadlock has been detected and resolved"
            );
        }
    }

    fn set_state(&self, next: DispatcherState) {
        let _ = self.state.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            let settled = current >= DispatcherState::Disposing as u8 && next as u8 <= current;
            (!settled).then_some(next as u8)
        });
    }

    /// 阻塞等待调用完成
    ///
    /// 分发器在等待期间被释放且调用还在排队时提前返回：它已经不会再被执行。
    fn await_completion<A, R>(&self, invocation: &Invocation<A, R>, timeout: Option<Duration>) -> Option<R>
    where
        A: Send + 'static,
        R: Clone + Send + Sync + 'static,
    {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let slice = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    remaining.min(DISPOSAL_POLL)
                }
                None => DISPOSAL_POLL,
            };

            if invocation.wait_signal(Some(slice)) {
                break;
            }
            if self.is_disposed() && invocation.is_queued() {
                dispatch_debug!(
                    dispatcher = %self.name,
                    invocation = invocation.id(),
                    "Dispatcher disposed while waiting, invocation abandoned"
                );
                break;
            }
        }
        invocation.result()
    }

    /// 惰性创建工作线程
    fn ensure_worker(self: &Arc<Self>) -> Result<()> {
        if self.mode == DispatchMode::OnCurrentThread {
            return Ok(());
        }

        let mut slot = self.worker.lock();
        if slot.is_some() || self.is_disposed() {
            return Ok(());
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let (signal, wake) = WakeSignal::pair();
        let exited = Arc::new(CompletionEvent::new());

        let inner = Arc::clone(self);
        let exited_by_worker = Arc::clone(&exited);
        *self.wake.write() = Some(wake);
        self.set_state(DispatcherState::Starting);

        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                let result = inner.run_loop(signal, generation);
                exited_by_worker.set();
                result
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                *self.wake.write() = None;
                self.set_state(DispatcherState::Idle);
                dispatch_error!(dispatcher = %self.name, error = %e, "Failed to spawn worker thread");
                return Err(DispatchError::Spawn(e));
            }
        };

        self.ever_started.store(true, Ordering::Release);
        let priority = *self.thread_priority.lock();
        dispatch_info!(
            dispatcher = %self.name,
            generation,
            background = self.is_background,
            %priority,
            "Worker thread started"
        );

        *slot = Some(Worker {
            handle: Some(handle),
            exited,
            generation,
        });
        Ok(())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    fn is_live(&self, generation: u64) -> bool {
        !self.is_disposed() && self.is_current(generation)
    }

    fn can_continue(&self, generation: u64) -> bool {
        self.running.load(Ordering::Acquire) && self.is_live(generation)
    }

    /// 工作线程入口：登记线程身份，运行循环，收尾
    fn run_loop(&self, signal: WakeSignal, generation: u64) -> Result<()> {
        let span = tracing::debug_span!("dispatch_worker", dispatcher = %self.name, generation);
        let _enter = span.enter();

        let me = thread::current().id();
        self.worker_thread.set(Some(me));

        let result = self.dispatch(&signal, generation);

        if self.is_current(generation) {
            self.executing.store(false, Ordering::Release);
            self.worker_thread.clear_if(me);
        }

        if let Err(fault) = &result {
            dispatch_error!(dispatcher = %self.name, error = %fault, "Dispatch loop terminated");
            *self.fault.lock() = Some(fault.to_string());
            self.disposed.store(true, Ordering::Release);
        }

        if self.is_disposed() && self.is_current(generation) {
            self.set_state(DispatcherState::Disposed);
        }
        dispatch_debug!(dispatcher = %self.name, generation, "Worker thread exiting");
        result
    }

    fn dispatch(&self, signal: &WakeSignal, generation: u64) -> Result<()> {
        loop {
            if !self.is_live(generation) {
                return Ok(());
            }

            if self.queue_count() == 0 || !self.running.load(Ordering::Acquire) {
                self.executing.store(false, Ordering::Release);
                self.set_state(DispatcherState::Idle);
                signal.wait();
                continue;
            }

            self.executing.store(true, Ordering::Release);
            self.set_state(DispatcherState::Busy);

            self.drain_priority(generation)?;
            while self.can_continue(generation) {
                let Some(job) = self.normal.pop() else {
                    break;
                };
                self.run_job(job.as_ref())?;
                self.drain_priority(generation)?;
            }
        }
    }

    fn drain_priority(&self, generation: u64) -> Result<()> {
        while self.can_continue(generation) {
            let Some(job) = self.priority.pop() else {
                break;
            };
            self.run_job(job.as_ref())?;
        }
        Ok(())
    }

    /// 执行一个调用并按策略处理失败
    ///
    /// 只有 Rethrow 策略会返回错误，由循环驱动者终止循环。
    fn run_job(&self, job: &dyn Job) -> Result<()> {
        let interceptor = self.interceptor.read().clone();
        let Err(message) = job.execute(interceptor.as_deref()) else {
            return Ok(());
        };

        match self.policy() {
            ExceptionPolicy::Log => {
                dispatch_error!(
                    dispatcher = %self.name,
                    invocation = job.id(),
                    error = %message,
                    "An error occurred while invoking a method"
                );
                Ok(())
            }
            ExceptionPolicy::Ignore => Ok(()),
            ExceptionPolicy::Rethrow => Err(DispatchError::WorkerFault {
                dispatcher: self.name.clone(),
                invocation: job.id(),
                message,
            }),
        }
    }
}
