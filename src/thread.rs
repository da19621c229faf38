use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crossbeam_utils::atomic::AtomicCell;
use parking_lot::Mutex;
use tracing::{debug, instrument, trace};

use crate::{
    class::{Class, InitCheck},
    error::{Error, FatalError},
    exception::{self, ExceptionKind, Fault},
    frame::{Frame, FrameKind, MonitorOwner},
    instructions,
    interpreter::{self, Effect},
    invoke,
    jvm::{JVMResult, Jvm},
    method::Method,
    native::NativeOutcome,
    object::Object,
    options::StackOverflowPolicy,
    Value,
};

/// Identifies a logical JVM thread; monitors and class initialization are owned per id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(pub(crate) u64);

impl ThreadId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    /// No method started yet
    New,
    Runnable,
    /// Waiting for a monitor or for another thread to initialize a class.
    /// The blocked instruction is retried when the thread runs again.
    Blocked,
    /// Parked by a native until [`ThreadHandle::unpark`]
    Waiting,
    /// Parked by a native until a deadline, e.g. `Thread.sleep`
    TimedWaiting,
    Terminated,
}

struct Shared {
    id: ThreadId,
    status: AtomicCell<ThreadStatus>,
    /// Raised at the next instruction boundary
    pending_stop: Mutex<Option<Fault>>,
    parking: Mutex<Parking>,
}

#[derive(Default)]
struct Parking {
    /// Deadline of a timed wait
    wake_at: Option<Instant>,
    /// Set by an unpark that arrived while the thread was not parked; its next park returns at once
    permit: bool,
}

/// Lets other host threads observe, stop or wake a [`Thread`]
#[derive(Clone)]
pub struct ThreadHandle(Arc<Shared>);

impl ThreadHandle {
    pub fn id(&self) -> ThreadId {
        self.0.id
    }

    pub fn status(&self) -> ThreadStatus {
        self.0.status.load()
    }

    /// Raises `ThreadDeath` in the thread at its next instruction
    pub fn stop(&self) {
        *self.0.pending_stop.lock() = Some(ExceptionKind::ThreadDeath.into());
        self.unpark();
    }

    /// Makes a waiting or sleeping thread runnable again.
    /// If it isn't parked, its next park returns immediately.
    pub fn unpark(&self) {
        let mut parking = self.0.parking.lock();
        parking.wake_at = None;
        match self.status() {
            ThreadStatus::Waiting | ThreadStatus::TimedWaiting => {
                self.0.status.store(ThreadStatus::Runnable)
            }
            _ => parking.permit = true,
        }
    }
}

impl std::fmt::Debug for ThreadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Thread#{} ({:?})", self.0.id.0, self.status())
    }
}

/// A monitor the thread has to hold before it executes its next instruction
struct PendingMonitor {
    owner: MonitorOwner,
    count: u32,
    /// Monitor of a synchronized root method, released when its frame returns
    entry: bool,
}

/// A logical thread: its call stack and the outcome of its root invocation.
/// Driven by the host through [`Thread::step`], [`Thread::run_for`] or [`Thread::run`].
pub struct Thread {
    shared: Arc<Shared>,
    pub(crate) frames: Vec<Frame>,
    java_object: Option<Object>,
    /// Return value of the root method once it completed
    result: Option<Option<Value>>,
    pub(crate) uncaught: Option<Object>,
    pub(crate) in_uncaught_handler: bool,
    /// Outcome of the innermost nested call, set when its entry frame is popped
    pub(crate) nested: Option<Result<Option<Value>, Object>>,
    pending_monitor: Option<PendingMonitor>,
}

impl Thread {
    pub(crate) fn new(id: ThreadId) -> Self {
        Self {
            shared: Arc::new(Shared {
                id,
                status: AtomicCell::new(ThreadStatus::New),
                pending_stop: Mutex::new(None),
                parking: Mutex::new(Parking::default()),
            }),
            frames: Vec::new(),
            java_object: None,
            result: None,
            uncaught: None,
            in_uncaught_handler: false,
            nested: None,
            pending_monitor: None,
        }
    }

    pub fn id(&self) -> ThreadId {
        self.shared.id
    }

    pub fn status(&self) -> ThreadStatus {
        self.shared.status.load()
    }

    pub(crate) fn set_status(&self, status: ThreadStatus) {
        self.shared.status.store(status);
    }

    pub fn handle(&self) -> ThreadHandle {
        ThreadHandle(self.shared.clone())
    }

    /// The call stack, bottom first
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn current_frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Return value of the root method, once the thread terminated normally
    pub fn result(&self) -> Option<&Option<Value>> {
        self.result.as_ref()
    }

    /// The exception that terminated the thread, if any
    pub fn uncaught_exception(&self) -> Option<&Object> {
        self.uncaught.as_ref()
    }

    /// The `java.lang.Thread` object representing this thread, created on first use
    pub fn java_object(&mut self, jvm: &Jvm) -> JVMResult<Object> {
        if let Some(object) = &self.java_object {
            return Ok(object.clone());
        }
        let class = jvm.resolve_class(&jvm.options().thread_class)?;
        let object = jvm.create_object(class);
        self.java_object = Some(object.clone());
        Ok(object)
    }

    /// Sets up the root invocation of `method`. The declaring class is initialized right away.
    /// Natives run to completion immediately.
    /// A synchronized method whose monitor is owned by another thread leaves this thread blocked.
    pub fn start(&mut self, jvm: &Jvm, method: &Arc<Method>, args: &[Value]) -> Result<(), Error> {
        if self.status() != ThreadStatus::New {
            return Err(FatalError::AlreadyStarted.into());
        }
        let args = invoke::marshal(method, args)?;
        self.set_status(ThreadStatus::Runnable);
        let started = self.start_impl(jvm, method, args);
        started.map_err(|fault| {
            self.set_status(ThreadStatus::Terminated);
            jvm.into_error(fault)
        })
    }

    fn start_impl(&mut self, jvm: &Jvm, method: &Arc<Method>, args: Vec<Value>) -> JVMResult<()> {
        if method.is_static() {
            self.initialize_now(jvm, &method.class())?;
        } else if matches!(args.first(), Some(Value::Ref(None))) {
            return Err(Fault::new(
                ExceptionKind::NullPointer,
                format!("Cannot invoke \"{:?}\" because receiver is null", method),
            ));
        }
        if method.is_native() {
            let value = self.call(jvm, method, args)?;
            self.result = Some(value);
            self.set_status(ThreadStatus::Terminated);
            return Ok(());
        }
        let owner = synchronized_owner(method, &args);
        self.frames.push(Frame::new(method.clone(), args, 0, FrameKind::Method)?);
        self.pending_monitor = owner.map(|owner| PendingMonitor {
            owner,
            count: 1,
            entry: true,
        });
        self.acquire_pending()?;
        Ok(())
    }

    /// Takes the pending monitor if it is free. Otherwise blocks the thread and returns false.
    fn acquire_pending(&mut self) -> Result<bool, FatalError> {
        let Some(pending) = self.pending_monitor.take() else {
            return Ok(true);
        };
        if !pending.owner.monitor().try_enter_times(self.id(), pending.count) {
            self.pending_monitor = Some(pending);
            self.set_status(ThreadStatus::Blocked);
            return Ok(false);
        }
        pending.owner.monitor().leave_wait_set(self.id());
        if pending.entry {
            self.top()?.monitor = Some(pending.owner);
        }
        Ok(true)
    }

    /// Releases the monitor of `object` for `Object.wait`. It is reacquired, with the same
    /// entry count, before the thread executes its next instruction.
    /// False if the thread doesn't own the monitor.
    pub(crate) fn wait_on(&mut self, object: &Object) -> bool {
        let Some(count) = object.monitor().release_to_wait(&self.handle()) else {
            return false;
        };
        self.pending_monitor = Some(PendingMonitor {
            owner: MonitorOwner::Object(object.clone()),
            count,
            entry: false,
        });
        true
    }

    /// Executes one instruction, or raises a pending stop request
    pub fn step(&mut self, jvm: &Jvm) -> Result<(), Error> {
        Ok(self.step_impl(jvm)?)
    }

    fn step_impl(&mut self, jvm: &Jvm) -> Result<(), FatalError> {
        let stop = self.shared.pending_stop.lock().take();
        if let Some(fault) = stop {
            debug!(thread = self.id().0, "stop requested");
            if self.pending_monitor.as_ref().is_some_and(|pending| pending.entry) {
                // the root method never started, so the exception goes straight to the host
                self.pending_monitor = None;
                self.frames.clear();
            } else if !self.acquire_pending()? {
                self.shared.pending_stop.lock().get_or_insert(fault);
                return Ok(());
            }
            return self.throw(jvm, fault);
        }
        if !self.acquire_pending()? {
            return Ok(());
        }
        let frame = self.frames.last().ok_or(FatalError::NoFrame)?;
        let pc = frame.pc;
        let opcode = *frame
            .code
            .bytes
            .get(pc as usize)
            .ok_or(FatalError::PcOutOfRange(pc as i64))?;
        trace!(pc, opcode = instructions::name(opcode), method = ?frame.method);
        match interpreter::execute(jvm, self, opcode, pc) {
            Ok(effect) => self.apply(jvm, effect),
            Err(fault) => self.throw(jvm, fault),
        }
    }

    fn top(&mut self) -> Result<&mut Frame, FatalError> {
        self.frames.last_mut().ok_or(FatalError::NoFrame)
    }

    fn apply(&mut self, jvm: &Jvm, effect: Effect) -> Result<(), FatalError> {
        match effect {
            Effect::Advance(n) => self.top()?.pc += n,
            Effect::Jump(pc) => self.top()?.pc = pc,
            Effect::Invoke(frame) => return self.push_frame(jvm, frame),
            Effect::Return(value) => return self.pop_frame(value),
            Effect::Throw(exception) => return self.dispatch(jvm, exception),
            Effect::Park { advance, timeout } => {
                self.top()?.pc += advance;
                self.park(timeout);
            }
            Effect::Block => self.set_status(ThreadStatus::Blocked),
        }
        Ok(())
    }

    fn park(&self, timeout: Option<Duration>) {
        let mut parking = self.shared.parking.lock();
        if std::mem::take(&mut parking.permit) {
            return;
        }
        match timeout {
            Some(timeout) => {
                parking.wake_at = Some(Instant::now() + timeout);
                self.set_status(ThreadStatus::TimedWaiting);
            }
            None => self.set_status(ThreadStatus::Waiting),
        }
    }

    fn push_frame(&mut self, jvm: &Jvm, frame: Frame) -> Result<(), FatalError> {
        if self.frames.len() < jvm.options().max_call_depth {
            debug!(method = ?frame.method, depth = self.frames.len() + 1, "push frame");
            self.frames.push(frame);
            return Ok(());
        }
        if let Some(owner) = &frame.monitor {
            owner.monitor().exit(self.id());
        }
        let error = exception::materialize(jvm, stack_overflow(jvm))?;
        if let FrameKind::Initializer(class) = &frame.kind {
            class.finish_init(false);
        }
        self.dispatch(jvm, error)
    }

    fn pop_frame(&mut self, value: Option<Value>) -> Result<(), FatalError> {
        let frame = self.frames.pop().ok_or(FatalError::NoFrame)?;
        if let Some(owner) = &frame.monitor {
            owner.monitor().exit(self.id());
        }
        debug!(method = ?frame.method, "pop frame");
        match frame.kind {
            FrameKind::Nested => {
                self.nested = Some(Ok(value));
                return Ok(());
            }
            FrameKind::Initializer(class) => {
                debug!(class = class.name(), "initialized");
                class.finish_init(true);
            }
            FrameKind::Method => {}
        }
        match self.frames.last_mut() {
            Some(caller) => {
                caller.pc += frame.return_offset;
                if let Some(value) = value {
                    caller.push_value(value)?;
                }
            }
            None => {
                self.result = Some(value);
                self.set_status(ThreadStatus::Terminated);
            }
        }
        Ok(())
    }

    /// Makes a blocked or sleeping thread runnable once it may continue
    fn wake_if_due(&self) {
        match self.status() {
            ThreadStatus::Blocked => self.set_status(ThreadStatus::Runnable),
            ThreadStatus::TimedWaiting => {
                let mut parking = self.shared.parking.lock();
                if parking.wake_at.map_or(true, |at| at <= Instant::now()) {
                    parking.wake_at = None;
                    self.set_status(ThreadStatus::Runnable);
                }
            }
            _ => {}
        }
    }

    /// Executes up to `quantum` instructions while the thread is runnable
    #[instrument(skip(self, jvm), fields(thread = self.id().0))]
    pub fn run_for(&mut self, jvm: &Jvm, quantum: usize) -> Result<ThreadStatus, Error> {
        self.wake_if_due();
        for _ in 0..quantum {
            if self.status() != ThreadStatus::Runnable {
                break;
            }
            self.step(jvm)?;
        }
        Ok(self.status())
    }

    /// Runs the thread until it terminates, sleeping and retrying as needed.
    /// Fails with [`Error::Suspended`] if it waits for an unpark nobody can deliver.
    /// A monitor owned by another logical thread is retried until it is released, so threads
    /// that depend on each other should be driven by a [`Scheduler`](crate::Scheduler).
    pub fn run(&mut self, jvm: &Jvm) -> Result<Option<Value>, Error> {
        loop {
            match self.run_for(jvm, jvm.options().quantum)? {
                ThreadStatus::Runnable => {}
                ThreadStatus::Blocked => std::thread::yield_now(),
                ThreadStatus::TimedWaiting => self.sleep_until_due(),
                ThreadStatus::Terminated => break,
                status @ (ThreadStatus::Waiting | ThreadStatus::New) => {
                    return Err(Error::Suspended(status))
                }
            }
        }
        match &self.uncaught {
            Some(exception) => {
                let (class, message) = jvm.describe(exception);
                Err(Error::Uncaught {
                    class,
                    message,
                    exception: exception.clone(),
                })
            }
            None => Ok(self.result.clone().flatten()),
        }
    }

    /// Deadline of a timed wait
    pub(crate) fn wake_at(&self) -> Option<Instant> {
        self.shared.parking.lock().wake_at
    }

    fn sleep_until_due(&self) {
        let wake_at = self.wake_at();
        if let Some(remaining) = wake_at.and_then(|at| at.checked_duration_since(Instant::now())) {
            std::thread::sleep(remaining.min(Duration::from_millis(50)));
        }
    }

    /// Calls a method from native or host code on this thread's stack and runs it to completion.
    /// Exceptions it doesn't catch are returned instead of unwinding the caller's frames.
    /// The call can't suspend: waiting for a monitor or an unpark is fatal.
    pub fn call(&mut self, jvm: &Jvm, method: &Arc<Method>, args: Vec<Value>) -> JVMResult<Option<Value>> {
        if method.is_native() {
            let handler = invoke::native_handler(jvm, method)?;
            let descriptor = method.descriptor().clone();
            return match invoke::run_native(jvm, self, &*handler, method, &descriptor, args)? {
                NativeOutcome::Return(value) => Ok(value),
                NativeOutcome::Park(Some(timeout)) => {
                    std::thread::sleep(timeout);
                    if !self.acquire_pending()? {
                        return Err(FatalError::NestedBlock(format!("{:?}", method)).into());
                    }
                    Ok(None)
                }
                NativeOutcome::Park(None) => {
                    Err(FatalError::NestedPark(format!("{:?}", method)).into())
                }
            };
        }

        if self.frames.len() >= jvm.options().max_call_depth {
            return Err(stack_overflow(jvm));
        }
        let monitor = synchronized_owner(method, &args);
        if let Some(owner) = &monitor {
            if !owner.monitor().try_enter(self.id()) {
                return Err(FatalError::NestedBlock(format!("{:?}", method)).into());
            }
        }
        let mut frame = Frame::new(method.clone(), args, 0, FrameKind::Nested)?;
        frame.monitor = monitor;
        let outer = self.nested.take();
        self.frames.push(frame);

        let result = loop {
            if let Some(result) = self.nested.take() {
                break result;
            }
            self.step_impl(jvm)?;
            match self.status() {
                ThreadStatus::Blocked => {
                    return Err(FatalError::NestedBlock(format!("{:?}", method)).into());
                }
                ThreadStatus::TimedWaiting => {
                    self.sleep_until_due();
                    self.wake_if_due();
                }
                ThreadStatus::Waiting => {
                    return Err(FatalError::NestedPark(format!("{:?}", method)).into());
                }
                _ => {}
            }
        };
        self.nested = outer;
        result.map_err(Fault::Thrown)
    }

    /// Initializes `class` synchronously, running `<clinit>` as a nested call.
    /// If another thread is initializing it, the host thread blocks until that completes.
    pub fn initialize_now(&mut self, jvm: &Jvm, class: &Arc<Class>) -> JVMResult<()> {
        if class.is_initialized() {
            return Ok(());
        }
        if !class.is_interface() {
            if let Some(super_class) = &class.super_class {
                self.initialize_now(jvm, super_class)?;
            }
        }
        match class.try_begin_init(self.id()) {
            InitCheck::Ready => Ok(()),
            InitCheck::Failed => invoke::could_not_initialize(class),
            InitCheck::Wait if class.wait_init() => Ok(()),
            InitCheck::Wait => invoke::could_not_initialize(class),
            InitCheck::Begin => {
                debug!(class = class.name(), "initializing");
                let result = invoke::prepare(jvm, class).and_then(|()| match class.initializer() {
                    Some(initializer) => self.call(jvm, &initializer, Vec::new()).map(drop),
                    None => Ok(()),
                });
                match result {
                    Ok(()) => {
                        class.finish_init(true);
                        Ok(())
                    }
                    Err(Fault::Fatal(err)) => Err(err.into()),
                    Err(fault) => {
                        let exception = exception::materialize(jvm, fault)?;
                        let exception = exception::wrap_initializer_failure(jvm, exception)?;
                        class.finish_init(false);
                        Err(Fault::Thrown(exception))
                    }
                }
            }
        }
    }
}

/// Monitor a synchronized method holds while it runs
fn synchronized_owner(method: &Arc<Method>, args: &[Value]) -> Option<MonitorOwner> {
    if !method.is_synchronized() {
        return None;
    }
    Some(match args.first().and_then(Value::as_object) {
        Some(receiver) if !method.is_static() => MonitorOwner::Object(receiver.clone()),
        _ => MonitorOwner::Class(method.class()),
    })
}

/// The fault raised when the call stack is full, depending on the configured policy
fn stack_overflow(jvm: &Jvm) -> Fault {
    match jvm.options().stack_overflow {
        StackOverflowPolicy::Throw => ExceptionKind::StackOverflow.into(),
        StackOverflowPolicy::Fatal => FatalError::CallStackOverflow(jvm.options().max_call_depth).into(),
    }
}

impl std::fmt::Debug for Thread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id().0)
            .field("status", &self.status())
            .field("frames", &self.frames)
            .finish()
    }
}
