use parking_lot::Mutex;

use crate::thread::{ThreadHandle, ThreadId};

/// Reentrant lock owned by a logical JVM thread, with the wait set of `Object.wait`.
/// Acquisition never blocks the host thread: contention is reported to the caller, which parks the JVM thread.
#[derive(Default)]
pub(crate) struct Monitor {
    state: Mutex<MonitorState>,
}

#[derive(Default)]
struct MonitorState {
    owner: Option<ThreadId>,
    count: u32,
    /// Threads in `Object.wait`, longest waiting first
    waiting: Vec<ThreadHandle>,
}

impl Monitor {
    /// Acquires the monitor or increments its entry count. Returns false if another thread owns it.
    pub fn try_enter(&self, thread: ThreadId) -> bool {
        self.try_enter_times(thread, 1)
    }

    /// Enters the monitor `count` times at once, as when reacquiring it after `Object.wait`
    pub fn try_enter_times(&self, thread: ThreadId, count: u32) -> bool {
        let mut state = self.state.lock();
        match state.owner {
            Some(owner) if owner != thread => false,
            _ => {
                state.owner = Some(thread);
                state.count += count;
                true
            }
        }
    }

    /// Decrements the entry count, releasing the monitor when it reaches zero.
    /// Returns false if `thread` is not the owner.
    pub fn exit(&self, thread: ThreadId) -> bool {
        let mut state = self.state.lock();
        if state.owner != Some(thread) {
            return false;
        }
        state.count -= 1;
        if state.count == 0 {
            state.owner = None;
        }
        true
    }

    /// Releases the monitor entirely and adds `thread` to the wait set.
    /// Returns the entry count to restore once it is reacquired, or None if `thread` is not the owner.
    pub fn release_to_wait(&self, thread: &ThreadHandle) -> Option<u32> {
        let mut state = self.state.lock();
        if state.owner != Some(thread.id()) {
            return None;
        }
        state.owner = None;
        state.waiting.push(thread.clone());
        Some(std::mem::take(&mut state.count))
    }

    /// Wakes the longest waiting thread, or all of them. Returns false if `thread` is not the owner.
    pub fn notify(&self, thread: ThreadId, all: bool) -> bool {
        let woken = {
            let mut state = self.state.lock();
            if state.owner != Some(thread) {
                return false;
            }
            let count = if all { state.waiting.len() } else { state.waiting.len().min(1) };
            state.waiting.drain(..count).collect::<Vec<_>>()
        };
        for waiter in woken {
            waiter.unpark();
        }
        true
    }

    /// Removes `thread` from the wait set, e.g. once its wait timed out
    pub fn leave_wait_set(&self, thread: ThreadId) {
        self.state.lock().waiting.retain(|waiter| waiter.id() != thread);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::Thread;

    #[test]
    fn reentrant_per_thread() {
        let monitor = Monitor::default();
        let (a, b) = (ThreadId(1), ThreadId(2));
        assert!(monitor.try_enter(a));
        assert!(monitor.try_enter(a));
        assert!(!monitor.try_enter(b));
        assert!(!monitor.exit(b));
        assert!(monitor.exit(a));
        assert!(!monitor.try_enter(b));
        assert!(monitor.exit(a));
        assert!(!monitor.exit(a));
        assert!(monitor.try_enter(b));
    }

    #[test]
    fn waiting_releases_every_entry() {
        let monitor = Monitor::default();
        let waiter = Thread::new(ThreadId(1));
        let other = ThreadId(2);
        assert!(monitor.release_to_wait(&waiter.handle()).is_none());

        assert!(monitor.try_enter_times(waiter.id(), 2));
        assert_eq!(monitor.release_to_wait(&waiter.handle()), Some(2));
        assert!(monitor.try_enter(other));
        assert!(!monitor.try_enter_times(waiter.id(), 2));
        assert!(monitor.exit(other));
        assert!(monitor.try_enter_times(waiter.id(), 2));
        assert!(monitor.exit(waiter.id()));
        assert!(monitor.exit(waiter.id()));
        assert!(!monitor.exit(waiter.id()));
    }

    #[test]
    fn notify_wakes_the_longest_waiting_thread() {
        let monitor = Monitor::default();
        let first = Thread::new(ThreadId(1));
        let second = Thread::new(ThreadId(2));
        for thread in [&first, &second] {
            thread.set_status(crate::ThreadStatus::Waiting);
            assert!(monitor.try_enter(thread.id()));
            assert_eq!(monitor.release_to_wait(&thread.handle()), Some(1));
        }

        let owner = ThreadId(3);
        assert!(!monitor.notify(owner, false));
        assert!(monitor.try_enter(owner));
        assert!(monitor.notify(owner, false));
        assert_eq!(first.status(), crate::ThreadStatus::Runnable);
        assert_eq!(second.status(), crate::ThreadStatus::Waiting);

        monitor.leave_wait_set(second.id());
        assert!(monitor.notify(owner, true));
        assert_eq!(second.status(), crate::ThreadStatus::Waiting);
    }
}
