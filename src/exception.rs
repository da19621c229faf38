use tracing::{debug, warn};

use crate::{
    error::FatalError,
    frame::{Frame, FrameKind},
    jvm::{JVMResult, Jvm},
    object::Object,
    resolve,
    thread::{Thread, ThreadStatus},
    Value,
};

/// Why an instruction did not complete normally
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// An exception the engine raises itself; the object is created when it is dispatched
    Exception(ExceptionKind, Option<String>),
    /// An existing throwable, e.g. from athrow or a failed class initializer
    Thrown(Object),
    /// Not catchable by bytecode
    Fatal(FatalError),
}

impl Fault {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Fault::Exception(kind, Some(message.into()))
    }
}

impl From<FatalError> for Fault {
    fn from(err: FatalError) -> Self {
        Fault::Fatal(err)
    }
}

impl From<ExceptionKind> for Fault {
    fn from(kind: ExceptionKind) -> Self {
        Fault::Exception(kind, None)
    }
}

impl From<Object> for Fault {
    fn from(exception: Object) -> Self {
        Fault::Thrown(exception)
    }
}

/// Exceptions and errors raised by the engine rather than by athrow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    NullPointer,
    ArrayIndexOutOfBounds,
    Arithmetic,
    NegativeArraySize,
    ClassCast,
    ArrayStore,
    IllegalMonitorState,
    IllegalArgument,
    NoClassDefFound,
    ClassCircularity,
    ClassFormat,
    IncompatibleClassChange,
    NoSuchField,
    NoSuchMethod,
    IllegalAccess,
    AbstractMethod,
    Instantiation,
    UnsatisfiedLink,
    ExceptionInInitializer,
    StackOverflow,
    ThreadDeath,
}

impl ExceptionKind {
    pub fn class_name(self) -> &'static str {
        use ExceptionKind::*;
        match self {
            NullPointer => "java/lang/NullPointerException",
            ArrayIndexOutOfBounds => "java/lang/ArrayIndexOutOfBoundsException",
            Arithmetic => "java/lang/ArithmeticException",
            NegativeArraySize => "java/lang/NegativeArraySizeException",
            ClassCast => "java/lang/ClassCastException",
            ArrayStore => "java/lang/ArrayStoreException",
            IllegalMonitorState => "java/lang/IllegalMonitorStateException",
            IllegalArgument => "java/lang/IllegalArgumentException",
            NoClassDefFound => "java/lang/NoClassDefFoundError",
            ClassCircularity => "java/lang/ClassCircularityError",
            ClassFormat => "java/lang/ClassFormatError",
            IncompatibleClassChange => "java/lang/IncompatibleClassChangeError",
            NoSuchField => "java/lang/NoSuchFieldError",
            NoSuchMethod => "java/lang/NoSuchMethodError",
            IllegalAccess => "java/lang/IllegalAccessError",
            AbstractMethod => "java/lang/AbstractMethodError",
            Instantiation => "java/lang/InstantiationError",
            UnsatisfiedLink => "java/lang/UnsatisfiedLinkError",
            ExceptionInInitializer => "java/lang/ExceptionInInitializerError",
            StackOverflow => "java/lang/StackOverflowError",
            ThreadDeath => "java/lang/ThreadDeath",
        }
    }
}

impl std::fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.class_name())
    }
}

/// Creates the throwable for a fault raised by the engine.
/// If its class can't be loaded, a `NoClassDefFoundError` is thrown instead.
pub(crate) fn materialize(jvm: &Jvm, fault: Fault) -> Result<Object, FatalError> {
    let (kind, message) = match fault {
        Fault::Exception(kind, message) => (kind, message),
        Fault::Thrown(exception) => return Ok(exception),
        Fault::Fatal(err) => return Err(err),
    };
    let (class, message) = match jvm.resolve_class(kind.class_name()) {
        Ok(class) => (class, message),
        Err(_) => match jvm.resolve_class(ExceptionKind::NoClassDefFound.class_name()) {
            Ok(class) => (class, Some(kind.class_name().replace('/', "."))),
            Err(_) => return Err(FatalError::MissingCoreClass(kind.class_name().into())),
        },
    };
    let exception = jvm.create_object(class);
    if let Some(message) = message {
        jvm.set_message(&exception, &message)?;
    }
    Ok(exception)
}

/// Exceptions escaping `<clinit>` that aren't errors get wrapped in an `ExceptionInInitializerError`
pub(crate) fn wrap_initializer_failure(jvm: &Jvm, exception: Object) -> Result<Object, FatalError> {
    let is_error = jvm
        .resolve_class("java/lang/Error")
        .map_or(false, |error| exception.class().is_subclass_of(&error));
    if is_error {
        return Ok(exception);
    }
    let wrapper = materialize(jvm, ExceptionKind::ExceptionInInitializer.into())?;
    jvm.write_field(&wrapper, "cause", "Ljava/lang/Throwable;", exception.into())?;
    Ok(wrapper)
}

/// The handler in `frame` catching `exception` at the current pc, in table order
fn find_handler(jvm: &Jvm, frame: &Frame, exception: &Object) -> JVMResult<Option<u32>> {
    for handler in &frame.code.exception_table {
        if !handler.covers(frame.pc) {
            continue;
        }
        if handler.catch_type == 0 {
            return Ok(Some(handler.handler_pc as u32));
        }
        let catch = resolve::resolve_class_ref(jvm, &frame.class, handler.catch_type)?;
        if exception.class().is_subclass_of(&catch) {
            return Ok(Some(handler.handler_pc as u32));
        }
    }
    Ok(None)
}

impl Thread {
    /// Throws the exception described by `fault` in the current frame
    pub(crate) fn throw(&mut self, jvm: &Jvm, fault: Fault) -> Result<(), FatalError> {
        let exception = materialize(jvm, fault)?;
        self.dispatch(jvm, exception)
    }

    /// Transfers control to the closest handler for `exception`, unwinding frames on the way.
    /// Unwinding stops at the entry frame of a nested call, which then reports the exception.
    pub(crate) fn dispatch(&mut self, jvm: &Jvm, mut exception: Object) -> Result<(), FatalError> {
        debug!(exception = ?exception, "throw");
        loop {
            let Some(frame) = self.frames.last_mut() else {
                return self.uncaught(jvm, exception);
            };
            match find_handler(jvm, frame, &exception) {
                Ok(Some(handler_pc)) => {
                    frame.stack.clear();
                    frame.push_ref(Some(exception))?;
                    frame.pc = handler_pc;
                    return Ok(());
                }
                Ok(None) => {}
                // the catch type failed to resolve: that error replaces the exception
                Err(fault) => exception = materialize(jvm, fault)?,
            }

            let Some(frame) = self.frames.pop() else {
                continue;
            };
            if let Some(owner) = &frame.monitor {
                owner.monitor().exit(self.id());
            }
            match frame.kind {
                FrameKind::Method => {}
                FrameKind::Initializer(class) => {
                    exception = wrap_initializer_failure(jvm, exception)?;
                    debug!(class = class.name(), exception = ?exception, "initialization failed");
                    class.finish_init(false);
                }
                FrameKind::Nested => {
                    self.nested = Some(Err(exception));
                    return Ok(());
                }
            }
        }
    }

    /// The exception escaped the outermost frame: hand it to the uncaught exception handler once
    /// and terminate the thread
    fn uncaught(&mut self, jvm: &Jvm, exception: Object) -> Result<(), FatalError> {
        let (class, message) = jvm.describe(&exception);
        warn!(thread = self.id().as_u64(), class = %class, message = ?message, "uncaught exception");
        self.uncaught = Some(exception.clone());
        if !self.in_uncaught_handler {
            self.in_uncaught_handler = true;
            let handled = self.run_uncaught_handler(jvm, exception);
            self.in_uncaught_handler = false;
            match handled {
                Ok(_) | Err(Fault::Thrown(_) | Fault::Exception(..)) => {}
                Err(Fault::Fatal(err)) => return Err(err),
            }
        }
        self.set_status(ThreadStatus::Terminated);
        Ok(())
    }

    fn run_uncaught_handler(&mut self, jvm: &Jvm, exception: Object) -> JVMResult<Option<Value>> {
        let options = jvm.options();
        let class = jvm.resolve_class(&options.uncaught_handler_class)?;
        let Some(handler) = class.method(
            &options.uncaught_handler_name,
            &options.uncaught_handler_descriptor,
        ) else {
            return Ok(None);
        };
        let mut args = Vec::with_capacity(2);
        if !handler.is_static() {
            args.push(self.java_object(jvm)?.into());
        }
        args.push(exception.into());
        self.call(jvm, &handler, args)
    }
}
