use std::sync::{Arc, Weak};

use crate::{class::Class, error::FatalError, AccessFlags, Typ};

pub struct Method {
    pub(crate) nat: MethodNaT,
    pub(crate) access_flags: AccessFlags,
    /// Weak to enable circular references; the class registry keeps the class alive
    pub(crate) class: Weak<Class>,
    pub(crate) code: Option<Arc<Code>>,
}

impl Method {
    pub fn nat(&self) -> &MethodNaT {
        &self.nat
    }

    pub fn name(&self) -> &str {
        &self.nat.name
    }

    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.nat.typ
    }

    pub fn access_flags(&self) -> AccessFlags {
        self.access_flags
    }

    /// # Panics
    /// Panics if the Jvm this method belongs to has been dropped
    #[track_caller]
    pub fn class(&self) -> Arc<Class> {
        self.class
            .upgrade()
            .expect("method outlived the Jvm it was loaded in")
    }

    pub fn code(&self) -> Option<&Arc<Code>> {
        self.code.as_ref()
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(AccessFlags::STATIC)
    }

    pub fn is_private(&self) -> bool {
        self.access_flags.contains(AccessFlags::PRIVATE)
    }

    pub fn is_abstract(&self) -> bool {
        self.access_flags.contains(AccessFlags::ABSTRACT)
    }

    pub fn is_native(&self) -> bool {
        self.access_flags.contains(AccessFlags::NATIVE)
    }

    pub fn is_synchronized(&self) -> bool {
        self.access_flags.contains(AccessFlags::SYNCHRONIZED)
    }

    pub fn is_initializer(&self) -> bool {
        &*self.nat.name == "<init>"
    }

    /// Signature polymorphic methods (JVMS 2.9.3) are native varargs methods of
    /// `MethodHandle`/`VarHandle` taking a single `Object[]`; call sites may use any descriptor.
    pub fn is_signature_polymorphic(&self) -> bool {
        let class = self.class();
        matches!(
            class.name(),
            "java/lang/invoke/MethodHandle" | "java/lang/invoke/VarHandle"
        ) && self
            .access_flags
            .contains(AccessFlags::NATIVE | AccessFlags::VARARGS)
            && self.nat.typ.0 == [Typ::Ref("[Ljava/lang/Object;".into())]
    }

    /// Key natives are registered under: `class.name(descriptor)`
    pub fn native_key(&self) -> String {
        format!(
            "{}.{}{}",
            self.class().name(),
            self.nat.name,
            self.nat.typ.descriptor()
        )
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct MethodNaT {
    pub name: Arc<str>,
    pub typ: MethodDescriptor,
}

impl MethodNaT {
    pub fn parse(name: &str, descriptor: &str) -> Result<Self, FatalError> {
        Ok(Self {
            name: name.into(),
            typ: MethodDescriptor::parse(descriptor)?,
        })
    }
}

/// Argument and return types
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct MethodDescriptor(pub Vec<Typ>, pub Option<Typ>);

impl MethodDescriptor {
    /// Parses a descriptor such as `(IJLjava/lang/String;)V`
    pub fn parse(descriptor: &str) -> Result<Self, FatalError> {
        let bad = || FatalError::BadDescriptor(descriptor.into());
        if !descriptor.starts_with('(') {
            return Err(bad());
        }
        let mut args = Vec::new();
        let mut pos = 1;
        loop {
            match descriptor.as_bytes().get(pos) {
                Some(b')') => break,
                Some(_) => {
                    let (typ, end) = Typ::parse_at(descriptor, pos)?;
                    args.push(typ);
                    pos = end;
                }
                None => return Err(bad()),
            }
        }
        let ret = match &descriptor[pos + 1..] {
            "V" => None,
            ret => Some(Typ::parse(ret).map_err(|_| bad())?),
        };
        Ok(Self(args, ret))
    }

    pub fn arg_slots(&self) -> usize {
        self.0.iter().map(Typ::slots).sum()
    }

    pub fn descriptor(&self) -> String {
        let mut descriptor = String::from("(");
        for arg in &self.0 {
            descriptor.push_str(&arg.descriptor());
        }
        descriptor.push(')');
        match &self.1 {
            Some(ret) => descriptor.push_str(&ret.descriptor()),
            None => descriptor.push('V'),
        }
        descriptor
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub bytes: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
}

impl Code {
    pub fn new(max_stack: u16, max_locals: u16, bytes: Vec<u8>) -> Self {
        Self {
            max_stack,
            max_locals,
            bytes,
            exception_table: Vec::new(),
        }
    }

    pub fn with_handler(mut self, handler: ExceptionHandler) -> Self {
        self.exception_table.push(handler);
        self
    }
}

/// Handler covering `start_pc..end_pc` (end exclusive). A `catch_type` of 0 catches everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

impl ExceptionHandler {
    pub fn covers(&self, pc: u32) -> bool {
        self.start_pc as u32 <= pc && pc < self.end_pc as u32
    }
}

impl Eq for Method {}
impl PartialEq for Method {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.class.upgrade() {
            Some(class) => write!(f, "{}.{}", class.name(), self.nat),
            None => write!(f, "{}", self.nat),
        }
    }
}

impl std::fmt::Display for MethodNaT {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ret) = &self.typ.1 {
            write!(f, "{}", ret)?;
        } else {
            write!(f, "void")?;
        }
        write!(f, " {}(", self.name)?;
        let mut first = true;
        for arg in &self.typ.0 {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{}", arg)?;
        }
        write!(f, ")")?;
        Ok(())
    }
}
