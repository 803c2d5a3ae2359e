//! 等待原语
//!
//! - [`CompletionEvent`]：手动复位事件，每个调用一个，只会被置位一次
//! - [`WakeSignal`]：工作线程的唤醒信号，基于 `crossbeam_utils` 的 Parker/Unparker，
//!   唤醒令牌保证先 `notify` 后 `wait` 不会丢失唤醒（自动复位语义）

use crossbeam_utils::sync::{Parker, Unparker};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// 手动复位事件
///
/// 置位之后所有等待者被唤醒，之后的等待立即返回。
/// 互斥锁保证置位之前的写入对被唤醒的等待者可见。
#[derive(Debug, Default)]
pub struct CompletionEvent {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl CompletionEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// 置位事件
    ///
    /// 返回 `true` 表示本次调用完成了 未置位 → 已置位 的转换。
    pub fn set(&self) -> bool {
        let mut signaled = self.signaled.lock();
        if *signaled {
            return false;
        }
        *signaled = true;
        self.cond.notify_all();
        true
    }

    /// 是否已置位
    pub fn is_set(&self) -> bool {
        *self.signaled.lock()
    }

    /// 等待事件置位
    ///
    /// `timeout` 为 `None` 时无限等待。返回事件是否已置位。
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut signaled = self.signaled.lock();
        match timeout {
            None => {
                while !*signaled {
                    self.cond.wait(&mut signaled);
                }
                true
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while !*signaled {
                    if self.cond.wait_until(&mut signaled, deadline).timed_out() {
                        break;
                    }
                }
                *signaled
            }
        }
    }
}

/// 工作线程唤醒信号的等待端，只能由工作线程持有
pub struct WakeSignal {
    parker: Parker,
}

/// 工作线程唤醒信号的通知端，可以在任意线程上使用
#[derive(Clone)]
pub struct WakeHandle {
    unparker: Unparker,
}

impl WakeSignal {
    /// 创建一对唤醒信号
    pub fn pair() -> (WakeSignal, WakeHandle) {
        let parker = Parker::new();
        let unparker = parker.unparker().clone();
        (WakeSignal { parker }, WakeHandle { unparker })
    }

    /// 阻塞直到收到通知（消费掉唤醒令牌）
    pub fn wait(&self) {
        self.parker.park();
    }
}

impl WakeHandle {
    /// 唤醒工作线程；工作线程没有在等待时保留一个令牌
    pub fn notify(&self) {
        self.unparker.unpark();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_completion_event_set_once() {
        let event = CompletionEvent::new();
        assert!(!event.is_set());
        assert!(event.set());
        assert!(!event.set());
        assert!(event.is_set());
        assert!(event.wait(None));
    }

    #[test]
    fn test_completion_event_timeout() {
        let event = CompletionEvent::new();
        let start = Instant::now();
        assert!(!event.wait(Some(Duration::from_millis(20))));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_completion_event_wakes_waiters() {
        let event = Arc::new(CompletionEvent::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let event = Arc::clone(&event);
                thread::spawn(move || event.wait(Some(Duration::from_secs(5))))
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        event.set();

        for waiter in waiters {
            assert!(waiter.join().unwrap());
        }
    }

    #[test]
    fn test_wake_token_is_not_lost() {
        let (signal, handle) = WakeSignal::pair();
        // 先通知后等待：令牌被保留，wait 立即返回
        handle.notify();
        let start = Instant::now();
        signal.wait();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_wake_from_other_thread() {
        let (signal, handle) = WakeSignal::pair();
        let notifier = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            handle.notify();
        });
        signal.wait();
        notifier.join().unwrap();
    }
}
