use thiserror::Error;

use crate::{object::Object, thread::ThreadStatus};

/// A broken engine invariant. These are not catchable by bytecode and abort the thread.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FatalError {
    #[error("unknown opcode 0x{opcode:02x} at pc {pc}")]
    UnknownOpcode { opcode: u8, pc: u32 },
    #[error("unsupported instruction {0}")]
    Unsupported(&'static str),
    #[error("pop from empty operand stack")]
    StackUnderflow,
    #[error("operand stack exceeds max_stack of {0}")]
    OperandStackOverflow(u16),
    #[error("call stack exceeds {0} frames")]
    CallStackOverflow(usize),
    #[error("local variable {0} out of range")]
    LocalOutOfRange(usize),
    #[error("local variable {0} read before being written")]
    UninitializedLocal(usize),
    #[error("expected {expected} but found {found}")]
    SlotMismatch {
        expected: &'static str,
        found: String,
    },
    #[error("invalid constant pool entry {0}")]
    BadConstant(u16),
    #[error("invalid descriptor {0}")]
    BadDescriptor(String),
    #[error("code offset {0} out of range")]
    PcOutOfRange(i64),
    #[error("argument mismatch calling {0}")]
    ArgumentMismatch(String),
    #[error("method {0} has no code")]
    NoCode(String),
    #[error("missing core class {0}")]
    MissingCoreClass(String),
    #[error("core class lacks field {0}")]
    MissingCoreField(String),
    #[error("{opcode} does not match the return type of {method}")]
    ReturnMismatch { opcode: &'static str, method: String },
    #[error("thread already started")]
    AlreadyStarted,
    #[error("no frame on the call stack")]
    NoFrame,
    #[error("thread cannot wait inside a nested call to {0}")]
    NestedPark(String),
    #[error("monitor needed by a nested call to {0} is owned by another thread")]
    NestedBlock(String),
}

/// Errors reported to the host
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Fatal(#[from] FatalError),
    #[error("uncaught exception {class}{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    Uncaught {
        class: String,
        message: Option<String>,
        exception: Object,
    },
    #[error("thread stopped while {0:?}")]
    Suspended(ThreadStatus),
}
