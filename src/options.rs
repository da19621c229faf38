/// What happens when a thread's call stack reaches [`JvmOptions::max_call_depth`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StackOverflowPolicy {
    /// Throw `java/lang/StackOverflowError` in the calling frame
    Throw,
    /// Abort the thread with [`FatalError::CallStackOverflow`](crate::FatalError::CallStackOverflow)
    Fatal,
}

#[derive(Clone, Debug)]
pub struct JvmOptions {
    pub max_call_depth: usize,
    pub stack_overflow: StackOverflowPolicy,
    /// Instance method invoked on the thread object with exceptions that escape the outermost frame
    pub uncaught_handler_class: String,
    pub uncaught_handler_name: String,
    pub uncaught_handler_descriptor: String,
    /// Class instantiated for `Thread.currentThread()`
    pub thread_class: String,
    /// Instructions a thread executes per [`Thread::run_for`](crate::Thread::run_for) slice
    /// in [`Thread::run`](crate::Thread::run) and [`Scheduler::run`](crate::Scheduler::run)
    pub quantum: usize,
}

impl Default for JvmOptions {
    fn default() -> Self {
        Self {
            max_call_depth: 1024,
            stack_overflow: StackOverflowPolicy::Throw,
            uncaught_handler_class: "java/lang/Thread".into(),
            uncaught_handler_name: "dispatchUncaughtException".into(),
            uncaught_handler_descriptor: "(Ljava/lang/Throwable;)V".into(),
            thread_class: "java/lang/Thread".into(),
            quantum: 10_000,
        }
    }
}
