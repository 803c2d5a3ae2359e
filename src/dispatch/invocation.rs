//! 调用模块
//!
//! [`Invocation`] 是一次排队/执行中的工作单元：不可变的可调用对象和参数，
//! 加上可变的完成状态、只写一次的结果槽和等待原语。
//!
//! # 所有权
//!
//! 调用由调用者创建，通过 `Arc` 与分发器队列共享。执行它的线程（工作线程，
//! 或内联执行时的调用者自己）是状态和结果的唯一写入者。等待原语随最后一个
//! `Arc` 一起释放。
//!
//! # 完成信号
//!
//! 无论可调用对象成功、返回错误还是 panic，等待原语都由 `CompletionGuard`
//! 在析构时置位，且只置位一次。

use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use super::signal::CompletionEvent;
use super::state::InvokeState;
use crate::core::error::{DispatchError, Result};

type Callable<A, R> = Box<dyn FnOnce(A) -> anyhow::Result<R> + Send>;

static NEXT_INVOCATION_ID: AtomicU64 = AtomicU64::new(1);

/// 调用拦截器
///
/// 包裹工作线程上的每一次执行。`proceed` 运行真正的可调用对象；
/// 不调用 `proceed` 会跳过它，调用以空结果完成。
pub trait InvokeInterceptor: Send + Sync {
    fn intercept(&self, invocation: u64, proceed: &mut dyn FnMut());
}

impl<F> InvokeInterceptor for F
where
    F: Fn(u64, &mut dyn FnMut()) + Send + Sync,
{
    fn intercept(&self, invocation: u64, proceed: &mut dyn FnMut()) {
        self(invocation, proceed)
    }
}

/// 一次调用
pub struct Invocation<A, R> {
    id: u64,
    work: Mutex<Option<(Callable<A, R>, A)>>,
    result: OnceLock<R>,
    error: OnceLock<String>,
    state: AtomicU8,
    priority: AtomicBool,
    completed_synchronously: AtomicBool,
    done: CompletionEvent,
}

impl<A, R> Invocation<A, R>
where
    A: Send + 'static,
    R: Send + Sync + 'static,
{
    /// 创建一个 Idle 状态的调用
    pub fn new<F>(callable: F, argument: A) -> Self
    where
        F: FnOnce(A) -> anyhow::Result<R> + Send + 'static,
    {
        Self {
            id: NEXT_INVOCATION_ID.fetch_add(1, Ordering::Relaxed),
            work: Mutex::new(Some((Box::new(callable), argument))),
            result: OnceLock::new(),
            error: OnceLock::new(),
            state: AtomicU8::new(InvokeState::Idle as u8),
            priority: AtomicBool::new(false),
            completed_synchronously: AtomicBool::new(false),
            done: CompletionEvent::new(),
        }
    }

    /// 创建调用，可调用对象缺失时返回 `DispatchError::NullCallable`
    pub fn create<F>(callable: Option<F>, argument: A) -> Result<Self>
    where
        F: FnOnce(A) -> anyhow::Result<R> + Send + 'static,
    {
        callable
            .map(|f| Self::new(f, argument))
            .ok_or(DispatchError::NullCallable)
    }

    /// 在当前线程上同步执行
    ///
    /// 可调用对象的错误直接返回给调用者，panic 也会继续传播；
    /// 两种情况下调用都会被标记为 Errored 并置位等待原语。
    /// 已经开始过的调用不会再次执行，直接返回当前结果。
    pub fn run_inline(&self) -> Result<Option<R>>
    where
        R: Clone,
    {
        if !self.begin() {
            return Ok(self.result());
        }

        let guard = CompletionGuard { invocation: self };
        let outcome = self.run_callable();
        self.completed_synchronously.store(true, Ordering::Release);

        let result = match outcome {
            Ok(()) => {
                self.set_state(InvokeState::Completed);
                Ok(self.result())
            }
            Err(e) => {
                let _ = self.error.set(format!("{e:#}"));
                self.set_state(InvokeState::Errored);
                Err(DispatchError::Invocation(e))
            }
        };
        drop(guard);
        result
    }

    /// 等待调用完成
    ///
    /// 最多阻塞 `timeout`（`None` 为无限等待），然后返回结果槽的当前值。
    /// 超时并不会取消调用。
    pub fn wait(&self, timeout: Option<Duration>) -> Option<R>
    where
        R: Clone,
    {
        self.done.wait(timeout);
        self.result()
    }

    /// 结果槽的当前值
    pub fn result(&self) -> Option<R>
    where
        R: Clone,
    {
        self.result.get().cloned()
    }

    /// 结果槽的引用
    pub fn result_ref(&self) -> Option<&R> {
        self.result.get()
    }

    /// 执行出错时的错误描述
    pub fn error(&self) -> Option<&str> {
        self.error.get().map(String::as_str)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> InvokeState {
        InvokeState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_queued(&self) -> bool {
        self.state() == InvokeState::Queued
    }

    pub fn is_started(&self) -> bool {
        self.state() == InvokeState::Started
    }

    /// 是否已完成（包括出错）
    pub fn is_completed(&self) -> bool {
        self.state().is_terminal()
    }

    /// 是否通过优先队列提交
    pub fn is_priority(&self) -> bool {
        self.priority.load(Ordering::Acquire)
    }

    /// 结果是否由同步路径（内联执行或阻塞等待）取得
    pub fn completed_synchronously(&self) -> bool {
        self.completed_synchronously.load(Ordering::Acquire)
    }

    /// 等待原语是否已置位
    pub fn is_signaled(&self) -> bool {
        self.done.is_set()
    }

    /// 只等待信号，不读取结果
    pub(crate) fn wait_signal(&self, timeout: Option<Duration>) -> bool {
        self.done.wait(timeout)
    }

    pub(crate) fn mark_completed_synchronously(&self) {
        self.completed_synchronously.store(true, Ordering::Release);
    }

    /// Idle → Queued，调用已经被提交过时返回 `false`
    pub(crate) fn mark_queued(&self, priority: bool) -> bool {
        let queued = self
            .state
            .compare_exchange(
                InvokeState::Idle as u8,
                InvokeState::Queued as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if queued {
            self.priority.store(priority, Ordering::Release);
        }
        queued
    }

    /// 在工作线程上执行
    ///
    /// 返回 `Err(message)` 表示可调用对象失败或 panic，由分发循环按策略处理。
    pub(crate) fn execute(
        &self,
        interceptor: Option<&dyn InvokeInterceptor>,
    ) -> std::result::Result<(), String> {
        if !self.begin() {
            return Ok(());
        }
        let guard = CompletionGuard { invocation: self };

        let mut outcome: anyhow::Result<()> = Ok(());
        let caught = panic::catch_unwind(AssertUnwindSafe(|| match interceptor {
            Some(hook) => {
                let mut proceed = || outcome = self.run_callable();
                hook.intercept(self.id, &mut proceed);
            }
            None => outcome = self.run_callable(),
        }));

        let failure = match caught {
            Ok(()) => outcome.err().map(|e| format!("{e:#}")),
            Err(payload) => Some(panic_message(payload.as_ref())),
        };

        match &failure {
            None => self.set_state(InvokeState::Completed),
            Some(message) => {
                let _ = self.error.set(message.clone());
                self.set_state(InvokeState::Errored);
            }
        }
        drop(guard);

        failure.map_or(Ok(()), Err)
    }

    /// 进入 Started，已经开始过时返回 `false`
    fn begin(&self) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                (s < InvokeState::Started as u8).then_some(InvokeState::Started as u8)
            })
            .is_ok()
    }

    fn run_callable(&self) -> anyhow::Result<()> {
        let Some((callable, argument)) = self.work.lock().take() else {
            return Ok(());
        };
        let value = callable(argument)?;
        let _ = self.result.set(value);
        Ok(())
    }

    fn set_state(&self, state: InvokeState) {
        self.state.fetch_max(state as u8, Ordering::AcqRel);
    }
}

impl<A, R> std::fmt::Debug for Invocation<A, R>
where
    A: Send + 'static,
    R: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("priority", &self.is_priority())
            .field("signaled", &self.is_signaled())
            .finish()
    }
}

/// 保证等待原语被置位恰好一次
struct CompletionGuard<'a, A, R>
where
    A: Send + 'static,
    R: Send + Sync + 'static,
{
    invocation: &'a Invocation<A, R>,
}

impl<A, R> Drop for CompletionGuard<'_, A, R>
where
    A: Send + 'static,
    R: Send + Sync + 'static,
{
    fn drop(&mut self) {
        let invocation = self.invocation;
        // 没有到达终态说明可调用对象 panic 了
        if !invocation.state().is_terminal() {
            let _ = invocation.error.set("invocation panicked".to_string());
            invocation.set_state(InvokeState::Errored);
        }
        let first = invocation.done.set();
        debug_assert!(first, "invocation #{} signaled twice", invocation.id);
    }
}

/// 队列中保存的类型擦除的调用
pub(crate) trait Job: Send + Sync {
    fn id(&self) -> u64;
    fn execute(&self, interceptor: Option<&dyn InvokeInterceptor>) -> std::result::Result<(), String>;
}

impl<A, R> Job for Invocation<A, R>
where
    A: Send + 'static,
    R: Send + Sync + 'static,
{
    fn id(&self) -> u64 {
        self.id
    }

    fn execute(&self, interceptor: Option<&dyn InvokeInterceptor>) -> std::result::Result<(), String> {
        Invocation::execute(self, interceptor)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_new_invocation_is_idle() {
        let invocation = Invocation::new(|x: i32| Ok(x * 2), 21);
        assert_eq!(invocation.state(), InvokeState::Idle);
        assert!(!invocation.is_signaled());
        assert_eq!(invocation.result(), None);
    }

    #[test]
    fn test_create_rejects_missing_callable() {
        let missing: Option<fn(i32) -> anyhow::Result<i32>> = None;
        let err = Invocation::create(missing, 1).unwrap_err();
        assert!(matches!(err, DispatchError::NullCallable));

        let present = Invocation::create(Some(|x: i32| Ok(x + 1)), 1).unwrap();
        assert_eq!(present.run_inline().unwrap(), Some(2));
    }

    #[test]
    fn test_run_inline_completes() {
        let invocation = Invocation::new(|s: String| Ok(s.len()), "texture".to_string());
        assert_eq!(invocation.run_inline().unwrap(), Some(7));
        assert_eq!(invocation.state(), InvokeState::Completed);
        assert!(invocation.is_signaled());
        assert!(invocation.completed_synchronously());

        // 第二次运行不会再执行，只返回已有结果
        assert_eq!(invocation.run_inline().unwrap(), Some(7));
    }

    #[test]
    fn test_run_inline_propagates_error() {
        let invocation: Invocation<(), u32> =
            Invocation::new(|_| Err(anyhow::anyhow!("shader compile failed")), ());
        let err = invocation.run_inline().unwrap_err();
        assert!(matches!(err, DispatchError::Invocation(_)));
        assert_eq!(invocation.state(), InvokeState::Errored);
        assert_eq!(invocation.error(), Some("shader compile failed"));
        assert!(invocation.is_signaled());
    }

    #[test]
    fn test_run_inline_panic_still_signals() {
        let invocation = Arc::new(Invocation::<(), ()>::new(|_| panic!("context lost"), ()));
        let inner = Arc::clone(&invocation);
        let result = panic::catch_unwind(AssertUnwindSafe(|| inner.run_inline()));
        assert!(result.is_err());
        assert_eq!(invocation.state(), InvokeState::Errored);
        assert!(invocation.is_signaled());
    }

    #[test]
    fn test_execute_catches_panic() {
        let invocation = Invocation::<(), ()>::new(|_| panic!("bad frame"), ());
        assert!(invocation.mark_queued(false));
        let failure = invocation.execute(None).unwrap_err();
        assert_eq!(failure, "panicked: bad frame");
        assert_eq!(invocation.state(), InvokeState::Errored);
        assert!(invocation.is_signaled());
    }

    #[test]
    fn test_mark_queued_only_once() {
        let invocation = Invocation::new(|x: u8| Ok(x), 1);
        assert!(invocation.mark_queued(true));
        assert!(invocation.is_queued());
        assert!(invocation.is_priority());
        assert!(!invocation.mark_queued(false));
        assert!(invocation.is_priority());
    }

    #[test]
    fn test_interceptor_wraps_execution() {
        let seen = Arc::new(AtomicU64::new(0));
        let seen_in_hook = Arc::clone(&seen);
        let hook = move |id: u64, proceed: &mut dyn FnMut()| {
            seen_in_hook.store(id, Ordering::SeqCst);
            proceed();
        };
        let hook: &dyn InvokeInterceptor = &hook;

        let invocation = Invocation::new(|x: i32| Ok(x + 1), 41);
        invocation.execute(Some(hook)).unwrap();
        assert_eq!(invocation.result(), Some(42));
        assert_eq!(seen.load(Ordering::SeqCst), invocation.id());

        let skip = |_: u64, _: &mut dyn FnMut()| {};
        let skip: &dyn InvokeInterceptor = &skip;
        let skipped = Invocation::new(|x: i32| Ok(x + 1), 1);
        skipped.execute(Some(skip)).unwrap();
        assert_eq!(skipped.state(), InvokeState::Completed);
        assert_eq!(skipped.result(), None);
    }

    #[test]
    fn test_wait_timeout_does_not_cancel() {
        let invocation = Arc::new(Invocation::new(
            |x: u32| {
                thread::sleep(Duration::from_millis(50));
                Ok(x)
            },
            9,
        ));

        let worker = {
            let invocation = Arc::clone(&invocation);
            thread::spawn(move || invocation.execute(None))
        };

        let start = Instant::now();
        assert_eq!(invocation.wait(Some(Duration::from_millis(1))), None);
        assert!(start.elapsed() < Duration::from_millis(45));

        worker.join().unwrap().unwrap();
        assert_eq!(invocation.wait(None), Some(9));
        assert_eq!(invocation.state(), InvokeState::Completed);
    }
}
