use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::RwLock;

use crate::{
    exception::Fault, jvm::Jvm, method::Method, method::MethodDescriptor, object::Object,
    thread::Thread, Value,
};

/// Arguments of a call to a native method
#[derive(Debug)]
pub struct NativeCall {
    pub method: Arc<Method>,
    /// The call site's descriptor. Differs from the method's own for signature polymorphic calls.
    pub descriptor: MethodDescriptor,
    /// Receiver first for instance methods, converted to the descriptor's types
    pub args: Vec<Value>,
    /// Trailing `MemberName` of `MethodHandle.linkTo*` calls, removed from `args`
    pub alternate: Option<Object>,
}

impl NativeCall {
    /// The argument at `index`, or null
    pub fn object(&self, index: usize) -> Option<&Object> {
        self.args.get(index).and_then(Value::as_object)
    }

    pub fn int(&self, index: usize) -> i32 {
        self.args.get(index).and_then(Value::as_int).unwrap_or(0)
    }

    pub fn long(&self, index: usize) -> i64 {
        self.args.get(index).and_then(Value::as_long).unwrap_or(0)
    }

    pub fn float(&self, index: usize) -> f32 {
        self.args.get(index).and_then(Value::as_float).unwrap_or(0.0)
    }

    pub fn double(&self, index: usize) -> f64 {
        self.args.get(index).and_then(Value::as_double).unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NativeOutcome {
    /// Completed; the value is pushed for the caller (converted to the call site's return type)
    Return(Option<Value>),
    /// Completed, but the thread should stop running until woken.
    /// With a timeout the thread is timed-waiting and wakes by itself.
    Park(Option<Duration>),
}

pub type NativeResult = Result<NativeOutcome, Fault>;

pub(crate) type NativeFn = dyn Fn(&Jvm, &mut Thread, NativeCall) -> NativeResult + Send + Sync;

/// Handlers for native methods, keyed by `class.name(descriptor)`
#[derive(Default)]
pub struct NativeRegistry {
    handlers: RwLock<HashMap<String, Arc<NativeFn>>>,
}

impl NativeRegistry {
    pub fn key(class: &str, name: &str, descriptor: &str) -> String {
        format!("{class}.{name}{descriptor}")
    }

    pub fn register(
        &self,
        class: &str,
        name: &str,
        descriptor: &str,
        handler: impl Fn(&Jvm, &mut Thread, NativeCall) -> NativeResult + Send + Sync + 'static,
    ) {
        self.handlers
            .write()
            .insert(Self::key(class, name, descriptor), Arc::new(handler));
    }

    pub(crate) fn get(&self, key: &str) -> Option<Arc<NativeFn>> {
        self.handlers.read().get(key).cloned()
    }

    pub fn contains(&self, class: &str, name: &str, descriptor: &str) -> bool {
        self.handlers
            .read()
            .contains_key(&Self::key(class, name, descriptor))
    }
}
