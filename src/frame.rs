use std::sync::Arc;

use crate::{
    class::Class,
    error::FatalError,
    method::{Code, Method},
    monitor::Monitor,
    object::Object,
    Typ, Value,
};

/// Content of a local variable or operand stack slot.
/// Longs and doubles take two slots, low half first.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Slot {
    #[default]
    Uninitialized,
    Ref(Option<Object>),
    Int(i32),
    Float(f32),
    LowHalfOfLong(u32),
    HighHalfOfLong(u32),
    LowHalfOfDouble(u32),
    HighHalfOfDouble(u32),
    /// Pushed by jsr, consumed by ret
    ReturnAddress(u32),
}

impl Slot {
    fn long(value: i64) -> [Slot; 2] {
        [
            Slot::LowHalfOfLong(value as u32),
            Slot::HighHalfOfLong((value as u64 >> 32) as u32),
        ]
    }

    fn double(value: f64) -> [Slot; 2] {
        let bits = value.to_bits();
        [
            Slot::LowHalfOfDouble(bits as u32),
            Slot::HighHalfOfDouble((bits >> 32) as u32),
        ]
    }

    /// Whether this is the second half of a long or double
    pub fn is_high_half(&self) -> bool {
        matches!(self, Slot::HighHalfOfLong(_) | Slot::HighHalfOfDouble(_))
    }
}

fn mismatch(expected: &'static str, found: &Slot) -> FatalError {
    FatalError::SlotMismatch {
        expected,
        found: format!("{:?}", found),
    }
}

/// Role of a frame in the call stack
#[derive(Clone, Debug)]
pub enum FrameKind {
    Method,
    /// Runs `<clinit>` of the class; completing it finishes the class' initialization
    Initializer(Arc<Class>),
    /// Entry of a call made by the engine or a native into Java code: results and exceptions
    /// stop at this frame and are handed to the caller instead of the frame below
    Nested,
}

/// Monitor held by a synchronized method's frame
#[derive(Clone, Debug)]
pub(crate) enum MonitorOwner {
    Object(Object),
    Class(Arc<Class>),
}

impl MonitorOwner {
    pub fn monitor(&self) -> &Monitor {
        match self {
            MonitorOwner::Object(object) => object.monitor(),
            MonitorOwner::Class(class) => &class.monitor,
        }
    }
}

/// Activation record of a method with bytecode
pub struct Frame {
    pub(crate) method: Arc<Method>,
    pub(crate) class: Arc<Class>,
    pub(crate) code: Arc<Code>,
    pub(crate) locals: Vec<Slot>,
    pub(crate) stack: Vec<Slot>,
    pub(crate) pc: u32,
    /// Added to the caller's pc once this frame returns; the length of the invoking instruction,
    /// or 0 if the caller must re-execute it (class initialization)
    pub(crate) return_offset: u32,
    pub(crate) kind: FrameKind,
    pub(crate) monitor: Option<MonitorOwner>,
}

impl Frame {
    /// Creates a frame with `args` stored in the first locals
    pub(crate) fn new(
        method: Arc<Method>,
        args: Vec<Value>,
        return_offset: u32,
        kind: FrameKind,
    ) -> Result<Self, FatalError> {
        let code = method
            .code
            .clone()
            .ok_or_else(|| FatalError::NoCode(format!("{:?}", method)))?;
        let mut frame = Self {
            class: method.class(),
            locals: vec![Slot::Uninitialized; code.max_locals as usize],
            stack: Vec::with_capacity(code.max_stack as usize),
            code,
            method,
            pc: 0,
            return_offset,
            kind,
            monitor: None,
        };
        let mut index = 0;
        for arg in args {
            let slots = arg.slots();
            frame.store_value(index, arg)?;
            index += slots;
        }
        Ok(frame)
    }

    pub fn method(&self) -> &Arc<Method> {
        &self.method
    }

    pub fn class(&self) -> &Arc<Class> {
        &self.class
    }

    pub fn code(&self) -> &Code {
        &self.code
    }

    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn return_offset(&self) -> u32 {
        self.return_offset
    }

    pub fn kind(&self) -> &FrameKind {
        &self.kind
    }

    pub fn locals(&self) -> &[Slot] {
        &self.locals
    }

    /// Operand stack, bottom first
    pub fn stack(&self) -> &[Slot] {
        &self.stack
    }

    pub fn push(&mut self, slot: Slot) -> Result<(), FatalError> {
        if self.stack.len() >= self.code.max_stack as usize {
            return Err(FatalError::OperandStackOverflow(self.code.max_stack));
        }
        self.stack.push(slot);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Slot, FatalError> {
        self.stack.pop().ok_or(FatalError::StackUnderflow)
    }

    /// The slot `depth` entries below the top, 0 being the top
    pub fn peek(&self, depth: usize) -> Result<&Slot, FatalError> {
        self.stack
            .len()
            .checked_sub(depth + 1)
            .and_then(|index| self.stack.get(index))
            .ok_or(FatalError::StackUnderflow)
    }

    pub fn peek_ref(&self, depth: usize) -> Result<Option<Object>, FatalError> {
        match self.peek(depth)? {
            Slot::Ref(value) => Ok(value.clone()),
            other => Err(mismatch("reference", other)),
        }
    }

    pub fn push_int(&mut self, value: i32) -> Result<(), FatalError> {
        self.push(Slot::Int(value))
    }

    pub fn push_float(&mut self, value: f32) -> Result<(), FatalError> {
        self.push(Slot::Float(value))
    }

    pub fn push_ref(&mut self, value: Option<Object>) -> Result<(), FatalError> {
        self.push(Slot::Ref(value))
    }

    pub fn push_long(&mut self, value: i64) -> Result<(), FatalError> {
        let [low, high] = Slot::long(value);
        self.push(low)?;
        self.push(high)
    }

    pub fn push_double(&mut self, value: f64) -> Result<(), FatalError> {
        let [low, high] = Slot::double(value);
        self.push(low)?;
        self.push(high)
    }

    pub fn push_value(&mut self, value: Value) -> Result<(), FatalError> {
        match value {
            Value::Int(v) => self.push_int(v),
            Value::Float(v) => self.push_float(v),
            Value::Long(v) => self.push_long(v),
            Value::Double(v) => self.push_double(v),
            Value::Ref(v) => self.push_ref(v),
        }
    }

    pub fn pop_int(&mut self) -> Result<i32, FatalError> {
        match self.pop()? {
            Slot::Int(v) => Ok(v),
            other => Err(mismatch("int", &other)),
        }
    }

    pub fn pop_float(&mut self) -> Result<f32, FatalError> {
        match self.pop()? {
            Slot::Float(v) => Ok(v),
            other => Err(mismatch("float", &other)),
        }
    }

    pub fn pop_ref(&mut self) -> Result<Option<Object>, FatalError> {
        match self.pop()? {
            Slot::Ref(v) => Ok(v),
            other => Err(mismatch("reference", &other)),
        }
    }

    pub fn pop_long(&mut self) -> Result<i64, FatalError> {
        match (self.pop()?, self.pop()?) {
            (Slot::HighHalfOfLong(high), Slot::LowHalfOfLong(low)) => {
                Ok(((high as u64) << 32 | low as u64) as i64)
            }
            (other, _) => Err(mismatch("long", &other)),
        }
    }

    pub fn pop_double(&mut self) -> Result<f64, FatalError> {
        match (self.pop()?, self.pop()?) {
            (Slot::HighHalfOfDouble(high), Slot::LowHalfOfDouble(low)) => {
                Ok(f64::from_bits((high as u64) << 32 | low as u64))
            }
            (other, _) => Err(mismatch("double", &other)),
        }
    }

    /// Pops a value of the given type. Ints are narrowed to boolean/byte/char/short.
    pub fn pop_value(&mut self, typ: &Typ) -> Result<Value, FatalError> {
        Ok(match typ {
            Typ::Boolean => Value::Int(self.pop_int()? & 1),
            Typ::Byte => Value::Int(self.pop_int()? as i8 as i32),
            Typ::Char => Value::Int(self.pop_int()? as u16 as i32),
            Typ::Short => Value::Int(self.pop_int()? as i16 as i32),
            Typ::Int => Value::Int(self.pop_int()?),
            Typ::Float => Value::Float(self.pop_float()?),
            Typ::Long => Value::Long(self.pop_long()?),
            Typ::Double => Value::Double(self.pop_double()?),
            Typ::Ref(_) => Value::Ref(self.pop_ref()?),
        })
    }

    /// Pops the arguments of a call, first argument first
    pub fn pop_args(&mut self, args: &[Typ]) -> Result<Vec<Value>, FatalError> {
        let mut values = args
            .iter()
            .rev()
            .map(|typ| self.pop_value(typ))
            .collect::<Result<Vec<_>, _>>()?;
        values.reverse();
        Ok(values)
    }

    fn local(&self, index: usize) -> Result<&Slot, FatalError> {
        match self.locals.get(index) {
            None => Err(FatalError::LocalOutOfRange(index)),
            Some(Slot::Uninitialized) => Err(FatalError::UninitializedLocal(index)),
            Some(slot) => Ok(slot),
        }
    }

    pub fn load_int(&self, index: usize) -> Result<i32, FatalError> {
        match self.local(index)? {
            Slot::Int(v) => Ok(*v),
            other => Err(mismatch("int", other)),
        }
    }

    pub fn load_float(&self, index: usize) -> Result<f32, FatalError> {
        match self.local(index)? {
            Slot::Float(v) => Ok(*v),
            other => Err(mismatch("float", other)),
        }
    }

    pub fn load_ref(&self, index: usize) -> Result<Option<Object>, FatalError> {
        match self.local(index)? {
            Slot::Ref(v) => Ok(v.clone()),
            other => Err(mismatch("reference", other)),
        }
    }

    pub fn load_return_address(&self, index: usize) -> Result<u32, FatalError> {
        match self.local(index)? {
            Slot::ReturnAddress(v) => Ok(*v),
            other => Err(mismatch("returnAddress", other)),
        }
    }

    pub fn load_long(&self, index: usize) -> Result<i64, FatalError> {
        match (self.local(index)?, self.local(index + 1)?) {
            (Slot::LowHalfOfLong(low), Slot::HighHalfOfLong(high)) => {
                Ok(((*high as u64) << 32 | *low as u64) as i64)
            }
            (other, _) => Err(mismatch("long", other)),
        }
    }

    pub fn load_double(&self, index: usize) -> Result<f64, FatalError> {
        match (self.local(index)?, self.local(index + 1)?) {
            (Slot::LowHalfOfDouble(low), Slot::HighHalfOfDouble(high)) => {
                Ok(f64::from_bits((*high as u64) << 32 | *low as u64))
            }
            (other, _) => Err(mismatch("double", other)),
        }
    }

    pub fn store(&mut self, index: usize, slot: Slot) -> Result<(), FatalError> {
        *self
            .locals
            .get_mut(index)
            .ok_or(FatalError::LocalOutOfRange(index))? = slot;
        Ok(())
    }

    fn store_pair(&mut self, index: usize, [low, high]: [Slot; 2]) -> Result<(), FatalError> {
        if index + 1 >= self.locals.len() {
            return Err(FatalError::LocalOutOfRange(index + 1));
        }
        self.locals[index] = low;
        self.locals[index + 1] = high;
        Ok(())
    }

    pub fn store_long(&mut self, index: usize, value: i64) -> Result<(), FatalError> {
        self.store_pair(index, Slot::long(value))
    }

    pub fn store_double(&mut self, index: usize, value: f64) -> Result<(), FatalError> {
        self.store_pair(index, Slot::double(value))
    }

    pub fn store_value(&mut self, index: usize, value: Value) -> Result<(), FatalError> {
        match value {
            Value::Int(v) => self.store(index, Slot::Int(v)),
            Value::Float(v) => self.store(index, Slot::Float(v)),
            Value::Ref(v) => self.store(index, Slot::Ref(v)),
            Value::Long(v) => self.store_long(index, v),
            Value::Double(v) => self.store_double(index, v),
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} @ {}", self.method, self.pc)
    }
}
