//! Execution engine for JVM bytecode.
//!
//! Classes are handed to the [`Jvm`] as already-parsed [`ClassDef`]s by a [`ClassLoader`].
//! The engine links them lazily, runs their bytecode on cooperative [`Thread`]s and
//! propagates exceptions the way the JVM specification describes.

mod builtins;
mod class;
mod class_def;
mod class_loader;
mod code;
mod const_pool;
mod error;
mod exception;
mod field;
mod field_storage;
mod frame;
pub mod instructions;
mod interpreter;
mod invoke;
mod jvm;
mod method;
mod monitor;
mod native;
mod object;
mod options;
mod resolve;
mod scheduler;
mod thread;
mod typ;
mod value;

pub use class::Class;
pub use class_def::{ClassBuilder, ClassDef, ConstantValue, FieldDef, MethodDef};
pub use class_loader::{ClassLoader, MemoryClassLoader};
pub use code::CodeReader;
pub use const_pool::{ConstPool, ConstPoolItem};
pub use error::{Error, FatalError};
pub use exception::{ExceptionKind, Fault};
pub use field::{Field, FieldNaT};
pub use frame::{Frame, FrameKind, Slot};
pub use interpreter::{compare_doubles, compare_floats, compare_longs};
pub use jvm::{JVMResult, Jvm};
pub use method::{Code, ExceptionHandler, Method, MethodDescriptor, MethodNaT};
pub use native::{NativeCall, NativeOutcome, NativeRegistry};
pub use object::Object;
pub use options::{JvmOptions, StackOverflowPolicy};
pub use scheduler::Scheduler;
pub use thread::{Thread, ThreadHandle, ThreadId, ThreadStatus};
pub use typ::Typ;
pub use value::{fround, Value};

bitflags::bitflags! {
    pub struct AccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        /// For classes; methods use SYNCHRONIZED
        const SUPER = 0x0020;
        const SYNCHRONIZED = 0x0020;
        const VOLATILE = 0x0040;
        const BRIDGE = 0x0040;
        const TRANSIENT = 0x0080;
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
    }
}

impl AccessFlags {
    /// Neither public, protected nor private
    pub fn is_package_private(self) -> bool {
        !self.intersects(Self::PUBLIC | Self::PROTECTED | Self::PRIVATE)
    }
}
