use std::sync::{Arc, Weak};

use crate::{
    class::Class, class_def::ConstantValue, field_storage::FieldStorage, AccessFlags, Typ,
    Value,
};

pub struct Field {
    /// Fields within a class are uniquely identified by name and type – multiple fields of the same name may exist
    pub(crate) nat: FieldNaT,
    pub(crate) class: Weak<Class>,
    pub(crate) access_flags: AccessFlags,
    /// Slot in the FieldStorage of the class (static field) / instance (non-static) where this is stored.
    /// Primitive and reference fields are numbered separately.
    /// Java has no multiple inheritance for fields, therefore each field can be at a set position
    pub(crate) slot: u32,
    /// Only set for static fields
    pub(crate) constant: Option<ConstantValue>,
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FieldNaT {
    pub name: Arc<str>,
    pub typ: Typ,
}

impl Field {
    pub fn nat(&self) -> &FieldNaT {
        &self.nat
    }

    pub fn name(&self) -> &str {
        &self.nat.name
    }

    pub fn typ(&self) -> &Typ {
        &self.nat.typ
    }

    pub fn access_flags(&self) -> AccessFlags {
        self.access_flags
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(AccessFlags::STATIC)
    }

    /// # Panics
    /// Panics if the Jvm this field belongs to has been dropped
    #[track_caller]
    pub fn class(&self) -> Arc<Class> {
        self.class
            .upgrade()
            .expect("field outlived the Jvm it was loaded in")
    }

    /// Unchecked read used by the interpreter; None if the storage has no such slot
    pub(crate) fn read(&self, storage: &FieldStorage) -> Option<Value> {
        let volatile = self.access_flags.contains(AccessFlags::VOLATILE);
        let slot = self.slot;
        match self.nat.typ {
            Typ::Long => storage.read_i64(slot, volatile).map(Value::Long),
            Typ::Float => storage.read_f32(slot, volatile).map(Value::Float),
            Typ::Double => storage.read_f64(slot, volatile).map(Value::Double),
            Typ::Ref(..) => storage.read_ref(slot).map(Value::Ref),
            _ => storage.read_i32(slot, volatile).map(Value::Int),
        }
    }

    /// Unchecked write used by the interpreter. Narrows the value to the field type;
    /// None if the value doesn't fit the type or the storage has no such slot.
    pub(crate) fn write(&self, storage: &FieldStorage, value: Value) -> Option<()> {
        let volatile = self.access_flags.contains(AccessFlags::VOLATILE);
        let slot = self.slot;
        match value.convert_to(&self.nat.typ)? {
            Value::Int(v) => storage.write_i32(slot, v, volatile),
            Value::Long(v) => storage.write_i64(slot, v, volatile),
            Value::Float(v) => storage.write_f32(slot, v, volatile),
            Value::Double(v) => storage.write_f64(slot, v, volatile),
            Value::Ref(v) => storage.write_ref(slot, v),
        }
    }
}

impl Eq for Field {}
impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl std::fmt::Debug for FieldNaT {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.typ, self.name)
    }
}

impl std::fmt::Debug for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.nat.fmt(f)
    }
}
