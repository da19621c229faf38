use std::sync::Arc;

use crate::{const_pool::ConstPool, method::Code, AccessFlags};

/// A parsed but not yet linked class, as supplied by a [`ClassLoader`](crate::ClassLoader)
#[derive(Clone, Debug)]
pub struct ClassDef {
    /// Internal name, e.g. `java/lang/Object`
    pub name: Arc<str>,
    /// None only for `java/lang/Object`
    pub super_class: Option<Arc<str>>,
    pub interfaces: Vec<Arc<str>>,
    pub access_flags: AccessFlags,
    pub const_pool: ConstPool,
    pub fields: Vec<FieldDef>,
    pub methods: Vec<MethodDef>,
}

#[derive(Clone, Debug)]
pub struct FieldDef {
    pub name: Arc<str>,
    pub descriptor: Arc<str>,
    pub access_flags: AccessFlags,
    /// ConstantValue attribute; applied to static fields when the class is prepared
    pub constant: Option<ConstantValue>,
}

#[derive(Clone, Debug)]
pub struct MethodDef {
    pub name: Arc<str>,
    pub descriptor: Arc<str>,
    pub access_flags: AccessFlags,
    /// None for abstract and native methods
    pub code: Option<Code>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ConstantValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(Arc<str>),
}

/// Assembles a [`ClassDef`] in code.
///
/// ```
/// use jvm_exec::{AccessFlags, ClassBuilder, Code, instructions::*};
///
/// let class = ClassBuilder::new("Answer")
///     .method("get", "()I", AccessFlags::PUBLIC | AccessFlags::STATIC,
///         Code::new(1, 0, vec![BIPUSH, 42, IRETURN]))
///     .build();
/// assert_eq!(&*class.name, "Answer");
/// ```
pub struct ClassBuilder {
    def: ClassDef,
}

impl ClassBuilder {
    /// A public class extending `java/lang/Object`
    pub fn new(name: &str) -> Self {
        Self {
            def: ClassDef {
                name: name.into(),
                super_class: Some("java/lang/Object".into()),
                interfaces: Vec::new(),
                access_flags: AccessFlags::PUBLIC | AccessFlags::SUPER,
                const_pool: ConstPool::new(),
                fields: Vec::new(),
                methods: Vec::new(),
            },
        }
    }

    /// A public interface
    pub fn interface(name: &str) -> Self {
        let mut builder = Self::new(name);
        builder.def.access_flags =
            AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT;
        builder
    }

    pub fn super_class(mut self, name: Option<&str>) -> Self {
        self.def.super_class = name.map(Into::into);
        self
    }

    pub fn implements(mut self, name: &str) -> Self {
        self.def.interfaces.push(name.into());
        self
    }

    pub fn access_flags(mut self, flags: AccessFlags) -> Self {
        self.def.access_flags = flags;
        self
    }

    pub fn const_pool(mut self, const_pool: ConstPool) -> Self {
        self.def.const_pool = const_pool;
        self
    }

    pub fn pool(&mut self) -> &mut ConstPool {
        &mut self.def.const_pool
    }

    pub fn field(mut self, name: &str, descriptor: &str, access_flags: AccessFlags) -> Self {
        self.def.fields.push(FieldDef {
            name: name.into(),
            descriptor: descriptor.into(),
            access_flags,
            constant: None,
        });
        self
    }

    pub fn constant(mut self, name: &str, descriptor: &str, value: ConstantValue) -> Self {
        self.def.fields.push(FieldDef {
            name: name.into(),
            descriptor: descriptor.into(),
            access_flags: AccessFlags::PUBLIC | AccessFlags::STATIC | AccessFlags::FINAL,
            constant: Some(value),
        });
        self
    }

    pub fn method(mut self, name: &str, descriptor: &str, access_flags: AccessFlags, code: Code) -> Self {
        self.def.methods.push(MethodDef {
            name: name.into(),
            descriptor: descriptor.into(),
            access_flags,
            code: Some(code),
        });
        self
    }

    /// Declares a method without code, e.g. a native or abstract one
    pub fn declare(mut self, name: &str, descriptor: &str, access_flags: AccessFlags) -> Self {
        self.def.methods.push(MethodDef {
            name: name.into(),
            descriptor: descriptor.into(),
            access_flags,
            code: None,
        });
        self
    }

    pub fn native(self, name: &str, descriptor: &str, access_flags: AccessFlags) -> Self {
        self.declare(name, descriptor, access_flags | AccessFlags::NATIVE)
    }

    pub fn abstract_method(self, name: &str, descriptor: &str) -> Self {
        self.declare(name, descriptor, AccessFlags::PUBLIC | AccessFlags::ABSTRACT)
    }

    pub fn build(self) -> ClassDef {
        self.def
    }
}
