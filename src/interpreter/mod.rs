//! Instruction dispatch. Every opcode maps to a handler in a 256-entry table;
//! handlers read their operands relative to the instruction start and report
//! what the thread has to do next as an [`Effect`].

mod arrays;
mod control;
mod math;
mod objects;
mod stack;

use std::time::Duration;

use crate::{
    error::FatalError,
    exception::Fault,
    frame::Frame,
    instructions::*,
    jvm::{JVMResult, Jvm},
    thread::Thread,
    Value,
};

pub use math::{compare_doubles, compare_floats, compare_longs};

/// Outcome of a single instruction
#[derive(Debug)]
pub(crate) enum Effect {
    /// Continue with the instruction `n` bytes further
    Advance(u32),
    /// Continue at an absolute pc
    Jump(u32),
    /// Push a new frame; the caller resumes `frame.return_offset` bytes further once it returns
    Invoke(Frame),
    /// Pop the current frame
    Return(Option<Value>),
    /// Dispatch an exception object thrown by athrow
    Throw(crate::object::Object),
    /// Advance, then stop running the thread until it is woken
    Park {
        advance: u32,
        timeout: Option<Duration>,
    },
    /// The instruction couldn't proceed (monitor or class initialization held by another thread);
    /// it is re-executed once the thread is scheduled again
    Block,
}

pub(crate) struct Context<'a> {
    pub jvm: &'a Jvm,
    pub thread: &'a mut Thread,
    pub opcode: u8,
    /// Start of the executing instruction
    pub pc: u32,
}

impl<'a> Context<'a> {
    pub fn frame(&mut self) -> Result<&mut Frame, FatalError> {
        self.thread.frames.last_mut().ok_or(FatalError::NoFrame)
    }

    fn frame_ref(&self) -> Result<&Frame, FatalError> {
        self.thread.frames.last().ok_or(FatalError::NoFrame)
    }

    fn reader(&self) -> Result<crate::CodeReader<'_>, FatalError> {
        Ok(crate::CodeReader::new(&self.frame_ref()?.code.bytes))
    }

    /// Absolute offset of the operand `offset` bytes into the instruction
    fn operand(&self, offset: u32) -> Result<usize, FatalError> {
        self.pc
            .checked_add(offset)
            .map(|at| at as usize)
            .ok_or(FatalError::PcOutOfRange(self.pc as i64 + offset as i64))
    }

    pub fn u8_operand(&self, offset: u32) -> Result<u8, FatalError> {
        self.reader()?.u8_at(self.operand(offset)?)
    }

    pub fn i8_operand(&self, offset: u32) -> Result<i8, FatalError> {
        self.reader()?.i8_at(self.operand(offset)?)
    }

    pub fn u16_operand(&self, offset: u32) -> Result<u16, FatalError> {
        self.reader()?.u16_at(self.operand(offset)?)
    }

    pub fn i16_operand(&self, offset: u32) -> Result<i16, FatalError> {
        self.reader()?.i16_at(self.operand(offset)?)
    }

    pub fn i32_operand(&self, offset: u32) -> Result<i32, FatalError> {
        self.reader()?.i32_at(self.operand(offset)?)
    }

    /// Absolute target of a branch relative to this instruction
    pub fn branch_target(&self, offset: i32) -> Result<u32, FatalError> {
        let target = self.pc as i64 + offset as i64;
        let len = self.frame_ref()?.code.bytes.len() as i64;
        if !(0..len).contains(&target) {
            return Err(FatalError::PcOutOfRange(target));
        }
        Ok(target as u32)
    }

    pub fn jump(&self, offset: i32) -> JVMResult<Effect> {
        Ok(Effect::Jump(self.branch_target(offset)?))
    }
}

type Handler = fn(&mut Context<'_>) -> JVMResult<Effect>;

static DISPATCH: [Handler; 256] = dispatch_table();

/// Executes the instruction at `pc` of the thread's current frame
pub(crate) fn execute(jvm: &Jvm, thread: &mut Thread, opcode: u8, pc: u32) -> JVMResult<Effect> {
    let mut ctx = Context {
        jvm,
        thread,
        opcode,
        pc,
    };
    DISPATCH[opcode as usize](&mut ctx)
}

fn unknown(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    Err(FatalError::UnknownOpcode {
        opcode: ctx.opcode,
        pc: ctx.pc,
    }
    .into())
}

fn nop(_: &mut Context<'_>) -> JVMResult<Effect> {
    Ok(Effect::Advance(1))
}

macro_rules! fill {
    ($table:ident, $first:expr, $last:expr, $handler:expr) => {{
        let mut op = $first as usize;
        while op <= $last as usize {
            $table[op] = $handler;
            op += 1;
        }
    }};
}

const fn dispatch_table() -> [Handler; 256] {
    let mut t = [unknown as Handler; 256];
    t[NOP as usize] = nop;

    // constants
    t[ACONST_NULL as usize] = stack::aconst_null;
    fill!(t, ICONST_M1, ICONST_5, stack::iconst);
    fill!(t, LCONST_0, LCONST_1, stack::lconst);
    fill!(t, FCONST_0, FCONST_2, stack::fconst);
    fill!(t, DCONST_0, DCONST_1, stack::dconst);
    t[BIPUSH as usize] = stack::bipush;
    t[SIPUSH as usize] = stack::sipush;
    fill!(t, LDC, LDC2_W, stack::ldc);

    // locals
    fill!(t, ILOAD, ALOAD, stack::load);
    fill!(t, ILOAD_0, ALOAD_3, stack::load_n);
    fill!(t, ISTORE, ASTORE, stack::store);
    fill!(t, ISTORE_0, ASTORE_3, stack::store_n);
    t[IINC as usize] = stack::iinc;
    t[WIDE as usize] = stack::wide;

    // arrays
    fill!(t, IALOAD, SALOAD, arrays::array_load);
    fill!(t, IASTORE, SASTORE, arrays::array_store);
    t[NEWARRAY as usize] = arrays::newarray;
    t[ANEWARRAY as usize] = arrays::anewarray;
    t[MULTIANEWARRAY as usize] = arrays::multianewarray;
    t[ARRAYLENGTH as usize] = arrays::arraylength;

    // operand stack
    fill!(t, POP, SWAP, stack::shuffle);

    // arithmetic
    fill!(t, IADD, LXOR, math::arithmetic);
    fill!(t, I2L, I2S, math::convert);
    fill!(t, LCMP, DCMPG, math::compare);

    // control flow
    fill!(t, IFEQ, IFLE, control::if_zero);
    fill!(t, IF_ICMPEQ, IF_ICMPLE, control::if_icmp);
    fill!(t, IF_ACMPEQ, IF_ACMPNE, control::if_acmp);
    fill!(t, IFNULL, IFNONNULL, control::if_null);
    t[GOTO as usize] = control::goto;
    t[GOTO_W as usize] = control::goto;
    t[JSR as usize] = control::jsr;
    t[JSR_W as usize] = control::jsr;
    t[RET as usize] = control::ret;
    t[TABLESWITCH as usize] = control::tableswitch;
    t[LOOKUPSWITCH as usize] = control::lookupswitch;
    fill!(t, IRETURN, RETURN, control::return_);

    // objects
    t[GETSTATIC as usize] = objects::getstatic;
    t[PUTSTATIC as usize] = objects::putstatic;
    t[GETFIELD as usize] = objects::getfield;
    t[PUTFIELD as usize] = objects::putfield;
    t[INVOKEVIRTUAL as usize] = objects::invokevirtual;
    t[INVOKESPECIAL as usize] = objects::invokespecial;
    t[INVOKESTATIC as usize] = objects::invokestatic;
    t[INVOKEINTERFACE as usize] = objects::invokeinterface;
    t[INVOKEDYNAMIC as usize] = objects::invokedynamic;
    t[NEW as usize] = objects::new;
    t[ATHROW as usize] = objects::athrow;
    t[CHECKCAST as usize] = objects::checkcast;
    t[INSTANCEOF as usize] = objects::instanceof;
    t[MONITORENTER as usize] = objects::monitorenter;
    t[MONITOREXIT as usize] = objects::monitorexit;
    t
}

/// Shorthand for raising an engine exception from a handler
pub(crate) fn raise<T>(kind: crate::ExceptionKind, message: impl Into<String>) -> JVMResult<T> {
    Err(Fault::new(kind, message))
}
