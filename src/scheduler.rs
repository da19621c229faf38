use std::{sync::Arc, time::Instant};

use tracing::{debug, instrument};

use crate::{
    error::Error,
    jvm::Jvm,
    method::Method,
    thread::{Thread, ThreadId, ThreadStatus},
    Value,
};

/// Runs several logical threads on the calling host thread, one quantum each in turn
#[derive(Default)]
pub struct Scheduler {
    threads: Vec<Thread>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts `method` on a new thread and queues it
    pub fn spawn(&mut self, jvm: &Jvm, method: &Arc<Method>, args: &[Value]) -> Result<ThreadId, Error> {
        let mut thread = jvm.new_thread();
        thread.start(jvm, method, args)?;
        let id = thread.id();
        self.threads.push(thread);
        Ok(id)
    }

    /// Queues an already started thread
    pub fn add(&mut self, thread: Thread) {
        self.threads.push(thread);
    }

    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    pub fn thread(&self, id: ThreadId) -> Option<&Thread> {
        self.threads.iter().find(|thread| thread.id() == id)
    }

    pub fn into_threads(self) -> Vec<Thread> {
        self.threads
    }

    /// Runs the queued threads until all of them terminated.
    ///
    /// Fails with [`Error::Suspended`] once none can make progress: every remaining thread
    /// waits for an unpark or for a monitor whose owner waits as well.
    /// Uncaught exceptions only terminate their thread; see [`Thread::uncaught_exception`].
    #[instrument(skip_all, fields(threads = self.threads.len()))]
    pub fn run(&mut self, jvm: &Jvm) -> Result<(), Error> {
        loop {
            let mut progress = false;
            let mut next_wake: Option<Instant> = None;
            let mut stuck = None;
            for thread in &mut self.threads {
                if thread.status() == ThreadStatus::Terminated {
                    continue;
                }
                let before = position(thread);
                let status = thread.run_for(jvm, jvm.options().quantum)?;
                progress |= status == ThreadStatus::Runnable || position(thread) != before;
                match status {
                    ThreadStatus::TimedWaiting => {
                        let wake_at = thread.wake_at().unwrap_or_else(Instant::now);
                        next_wake = Some(next_wake.map_or(wake_at, |at| at.min(wake_at)));
                    }
                    ThreadStatus::Blocked => stuck = Some(ThreadStatus::Blocked),
                    ThreadStatus::Waiting | ThreadStatus::New => {
                        stuck = stuck.or(Some(status));
                    }
                    ThreadStatus::Runnable | ThreadStatus::Terminated => {}
                }
            }

            if progress {
                continue;
            }
            if let Some(wake_at) = next_wake {
                if let Some(remaining) = wake_at.checked_duration_since(Instant::now()) {
                    std::thread::sleep(remaining);
                }
                continue;
            }
            return match stuck {
                None => Ok(()),
                Some(status) => {
                    debug!(?status, "no thread can continue");
                    Err(Error::Suspended(status))
                }
            };
        }
    }
}

/// Changes whenever a thread executed an instruction or changed state
fn position(thread: &Thread) -> (usize, Option<u32>, ThreadStatus) {
    (
        thread.frames().len(),
        thread.current_frame().map(|frame| frame.pc()),
        thread.status(),
    )
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.threads.iter().map(|thread| (thread.id(), thread.status())))
            .finish()
    }
}
