//! 进程级等待登记表
//!
//! 记录"当前正阻塞在某个分发器的同步调用里"的线程，以及它在等待哪个分发器
//! 的工作线程，所有分发器实例共享。只用于死锁规避：调用者准备阻塞等待时，
//! 沿着"工作线程 → 它正在等待的工作线程 → ..."的链条查找，链条回到调用者
//! 自己说明一旦阻塞就会形成环，此时不能再阻塞。
//!
//! 没有形成环的嵌套调用（A 的工作线程同步调用空闲的 B）照常阻塞。

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// 调用者身份
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallerId(ThreadId);

type WaitMap = HashMap<CallerId, Arc<WorkerSlot>>;

static WAIT_REGISTRY: Mutex<Option<WaitMap>> = parking_lot::const_mutex(None);

impl CallerId {
    /// 当前线程的身份
    pub fn current() -> Self {
        CallerId(thread::current().id())
    }

    /// 是否正阻塞在某个分发器的同步调用里
    pub fn is_waiting(&self) -> bool {
        WAIT_REGISTRY
            .lock()
            .as_ref()
            .is_some_and(|waits| waits.contains_key(self))
    }
}

impl From<ThreadId> for CallerId {
    fn from(id: ThreadId) -> Self {
        CallerId(id)
    }
}

/// 分发器当前工作线程的身份
///
/// 等待者登记的是目标分发器的槽位而不是某个具体线程：
/// 工作线程可能尚未启动，也可能被 `interrupt` 替换。
#[derive(Debug, Default)]
pub(crate) struct WorkerSlot(RwLock<Option<ThreadId>>);

impl WorkerSlot {
    pub(crate) fn get(&self) -> Option<CallerId> {
        (*self.0.read()).map(CallerId)
    }

    pub(crate) fn is(&self, id: ThreadId) -> bool {
        *self.0.read() == Some(id)
    }

    pub(crate) fn set(&self, id: Option<ThreadId>) {
        *self.0.write() = id;
    }

    /// 仍然是 `id` 时才清空
    pub(crate) fn clear_if(&self, id: ThreadId) {
        let mut current = self.0.write();
        if *current == Some(id) {
            *current = None;
        }
    }
}

/// 登记凭证，离开作用域（包括栈展开）时自动注销
#[must_use = "dropping the registration unregisters the caller immediately"]
pub(crate) struct WaitRegistration {
    caller: CallerId,
}

impl Drop for WaitRegistration {
    fn drop(&mut self) {
        if let Some(waits) = WAIT_REGISTRY.lock().as_mut() {
            waits.remove(&self.caller);
        }
    }
}

/// 原子地检查并登记：`caller` 准备阻塞等待 `target` 的工作线程
///
/// 调用者已经登记，或者等待会让阻塞链回到调用者自己时返回 `None`
/// （检测到死锁）。
pub(crate) fn try_register(caller: CallerId, target: &Arc<WorkerSlot>) -> Option<WaitRegistration> {
    let mut guard = WAIT_REGISTRY.lock();
    let waits = guard.get_or_insert_with(HashMap::new);

    if waits.contains_key(&caller) || closes_cycle(waits, caller, target) {
        return None;
    }
    waits.insert(caller, Arc::clone(target));
    Some(WaitRegistration { caller })
}

fn closes_cycle(waits: &WaitMap, caller: CallerId, target: &WorkerSlot) -> bool {
    let mut next = target.get();
    let mut hops = 0;
    while let Some(worker) = next {
        if worker == caller {
            return true;
        }
        hops += 1;
        if hops > waits.len() {
            return false;
        }
        next = waits.get(&worker).and_then(|slot| slot.get());
    }
    false
}

/// 当前登记的调用者数量
pub fn waiting_count() -> usize {
    WAIT_REGISTRY.lock().as_ref().map_or(0, HashMap::len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn slot_of(id: ThreadId) -> Arc<WorkerSlot> {
        let slot = Arc::new(WorkerSlot::default());
        slot.set(Some(id));
        slot
    }

    fn foreign_thread() -> ThreadId {
        thread::spawn(|| thread::current().id()).join().unwrap()
    }

    #[test]
    fn test_register_is_exclusive() {
        let caller = CallerId::current();
        let target = slot_of(foreign_thread());

        let first = try_register(caller, &target).expect("first registration succeeds");
        assert!(caller.is_waiting());
        assert!(waiting_count() >= 1);
        assert!(try_register(caller, &target).is_none());

        drop(first);
        assert!(!caller.is_waiting());
        assert!(try_register(caller, &target).is_some());
    }

    #[test]
    fn test_registration_released_on_unwind() {
        let target = slot_of(foreign_thread());
        let caller = thread::spawn(move || {
            let caller = CallerId::current();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                let _registration = try_register(caller, &target).unwrap();
                panic!("callback failed");
            }));
            assert!(result.is_err());
            caller
        })
        .join()
        .unwrap();

        assert!(!caller.is_waiting());
    }

    #[test]
    fn test_cycle_back_to_caller_is_refused() {
        // worker 线程阻塞在 me 所服务的分发器上，me 再去等 worker 就成环
        let me = thread::current().id();
        let my_slot = slot_of(me);
        let (registered_tx, registered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let worker = thread::spawn(move || {
            let registration = try_register(CallerId::current(), &my_slot).unwrap();
            registered_tx.send(thread::current().id()).unwrap();
            release_rx.recv().ok();
            drop(registration);
        });
        let worker_id = registered_rx.recv().unwrap();

        let worker_slot = slot_of(worker_id);
        assert!(try_register(CallerId::current(), &worker_slot).is_none());

        release_tx.send(()).unwrap();
        worker.join().unwrap();
        assert!(try_register(CallerId::current(), &worker_slot).is_some());
    }

    #[test]
    fn test_chain_without_cycle_is_allowed() {
        // other 在等一个空闲分发器，me 等 other 不会成环
        let (registered_tx, registered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let other = thread::spawn(move || {
            let idle = slot_of(foreign_thread());
            let registration = try_register(CallerId::current(), &idle).unwrap();
            registered_tx.send(thread::current().id()).unwrap();
            release_rx.recv().ok();
            drop(registration);
        });
        let other_id = registered_rx.recv().unwrap();

        let registration = try_register(CallerId::current(), &slot_of(other_id));
        assert!(registration.is_some());

        release_tx.send(()).unwrap();
        other.join().unwrap();
    }

    #[test]
    fn test_worker_slot_clear_if() {
        let me = thread::current().id();
        let slot = slot_of(me);
        assert!(slot.is(me));

        slot.clear_if(foreign_thread());
        assert_eq!(slot.get(), Some(CallerId::from(me)));

        slot.clear_if(me);
        assert_eq!(slot.get(), None);
    }
}
