use std::sync::{Arc, OnceLock};

use crate::{
    class::Class, error::FatalError, field::Field, method::Method, object::Object,
};

/// Run-time constant pool of a class. Index 0 is unused, as in class files.
///
/// Besides the symbolic entries, every index has a resolution slot that caches the
/// first successful resolution. Failed resolutions are not cached and are retried on next use.
#[derive(Clone, Debug)]
pub struct ConstPool {
    items: Vec<ConstPoolItem>,
    resolved: Vec<OnceLock<Resolved>>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ConstPoolItem {
    Utf8(Arc<str>),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class(u16),
    String(u16),
    FieldRef { class: u16, nat: u16 },
    MethodRef { class: u16, nat: u16 },
    InterfaceMethodRef { class: u16, nat: u16 },
    NameAndType { name: u16, descriptor: u16 },
    /// Entry 0 and the entry following a long or double
    Unusable,
}

#[derive(Clone, Debug)]
pub(crate) enum Resolved {
    Class(Arc<Class>),
    Field(Arc<Field>),
    Method(Arc<Method>),
    String(Object),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MemberKind {
    Field,
    Method,
    InterfaceMethod,
}

/// A symbolic field or method reference
#[derive(Debug)]
pub(crate) struct MemberRef<'a> {
    pub kind: MemberKind,
    /// Index of the `Class` entry naming the declaring class
    pub class_index: u16,
    pub name: &'a Arc<str>,
    pub descriptor: &'a Arc<str>,
}

impl Default for ConstPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstPool {
    pub fn new() -> Self {
        Self {
            items: vec![ConstPoolItem::Unusable],
            resolved: vec![OnceLock::new()],
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.len() <= 1
    }

    /// Appends an entry, reusing an identical one if present
    pub fn add(&mut self, item: ConstPoolItem) -> u16 {
        if let Some(index) = self.items.iter().position(|existing| *existing == item) {
            if index != 0 {
                return index as u16;
            }
        }
        let index = self.items.len() as u16;
        let wide = matches!(item, ConstPoolItem::Long(_) | ConstPoolItem::Double(_));
        self.items.push(item);
        self.resolved.push(OnceLock::new());
        if wide {
            self.items.push(ConstPoolItem::Unusable);
            self.resolved.push(OnceLock::new());
        }
        index
    }

    pub fn utf8(&mut self, string: &str) -> u16 {
        self.add(ConstPoolItem::Utf8(string.into()))
    }

    pub fn integer(&mut self, value: i32) -> u16 {
        self.add(ConstPoolItem::Integer(value))
    }

    pub fn float(&mut self, value: f32) -> u16 {
        self.add(ConstPoolItem::Float(value))
    }

    pub fn long(&mut self, value: i64) -> u16 {
        self.add(ConstPoolItem::Long(value))
    }

    pub fn double(&mut self, value: f64) -> u16 {
        self.add(ConstPoolItem::Double(value))
    }

    pub fn class(&mut self, name: &str) -> u16 {
        let name = self.utf8(name);
        self.add(ConstPoolItem::Class(name))
    }

    pub fn string(&mut self, value: &str) -> u16 {
        let value = self.utf8(value);
        self.add(ConstPoolItem::String(value))
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        self.add(ConstPoolItem::NameAndType { name, descriptor })
    }

    pub fn field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.class(class);
        let nat = self.name_and_type(name, descriptor);
        self.add(ConstPoolItem::FieldRef { class, nat })
    }

    pub fn method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.class(class);
        let nat = self.name_and_type(name, descriptor);
        self.add(ConstPoolItem::MethodRef { class, nat })
    }

    pub fn interface_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.class(class);
        let nat = self.name_and_type(name, descriptor);
        self.add(ConstPoolItem::InterfaceMethodRef { class, nat })
    }

    pub fn get(&self, index: u16) -> Result<&ConstPoolItem, FatalError> {
        match self.items.get(index as usize) {
            None | Some(ConstPoolItem::Unusable) => Err(FatalError::BadConstant(index)),
            Some(item) => Ok(item),
        }
    }

    pub fn get_utf8(&self, index: u16) -> Result<&Arc<str>, FatalError> {
        match self.get(index)? {
            ConstPoolItem::Utf8(string) => Ok(string),
            _ => Err(FatalError::BadConstant(index)),
        }
    }

    pub fn get_class_name(&self, index: u16) -> Result<&Arc<str>, FatalError> {
        match self.get(index)? {
            ConstPoolItem::Class(name) => self.get_utf8(*name),
            _ => Err(FatalError::BadConstant(index)),
        }
    }

    pub fn get_string(&self, index: u16) -> Result<&Arc<str>, FatalError> {
        match self.get(index)? {
            ConstPoolItem::String(value) => self.get_utf8(*value),
            _ => Err(FatalError::BadConstant(index)),
        }
    }

    pub fn get_int(&self, index: u16) -> Result<i32, FatalError> {
        match self.get(index)? {
            ConstPoolItem::Integer(value) => Ok(*value),
            _ => Err(FatalError::BadConstant(index)),
        }
    }

    pub fn get_float(&self, index: u16) -> Result<f32, FatalError> {
        match self.get(index)? {
            ConstPoolItem::Float(value) => Ok(*value),
            _ => Err(FatalError::BadConstant(index)),
        }
    }

    pub fn get_long(&self, index: u16) -> Result<i64, FatalError> {
        match self.get(index)? {
            ConstPoolItem::Long(value) => Ok(*value),
            _ => Err(FatalError::BadConstant(index)),
        }
    }

    pub fn get_double(&self, index: u16) -> Result<f64, FatalError> {
        match self.get(index)? {
            ConstPoolItem::Double(value) => Ok(*value),
            _ => Err(FatalError::BadConstant(index)),
        }
    }

    pub(crate) fn get_member_ref(&self, index: u16) -> Result<MemberRef<'_>, FatalError> {
        let (kind, class, nat) = match self.get(index)? {
            ConstPoolItem::FieldRef { class, nat } => (MemberKind::Field, class, nat),
            ConstPoolItem::MethodRef { class, nat } => (MemberKind::Method, class, nat),
            ConstPoolItem::InterfaceMethodRef { class, nat } => {
                (MemberKind::InterfaceMethod, class, nat)
            }
            _ => return Err(FatalError::BadConstant(index)),
        };
        let (name, descriptor) = match self.get(*nat)? {
            ConstPoolItem::NameAndType { name, descriptor } => (name, descriptor),
            _ => return Err(FatalError::BadConstant(*nat)),
        };
        Ok(MemberRef {
            kind,
            class_index: *class,
            name: self.get_utf8(*name)?,
            descriptor: self.get_utf8(*descriptor)?,
        })
    }

    pub(crate) fn cached(&self, index: u16) -> Option<&Resolved> {
        self.resolved.get(index as usize)?.get()
    }

    /// Stores a successful resolution. If another thread won the race, its result is kept.
    pub(crate) fn cache(&self, index: u16, resolved: Resolved) {
        if let Some(slot) = self.resolved.get(index as usize) {
            let _ = slot.set(resolved);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_shares_entries() {
        let mut pool = ConstPool::new();
        let a = pool.method_ref("Foo", "bar", "()V");
        let b = pool.method_ref("Foo", "bar", "()V");
        assert_eq!(a, b);
        let c = pool.interface_method_ref("Foo", "bar", "()V");
        assert_ne!(a, c);

        let member = pool.get_member_ref(c).unwrap();
        assert_eq!(member.kind, MemberKind::InterfaceMethod);
        assert_eq!(&**pool.get_class_name(member.class_index).unwrap(), "Foo");
        assert_eq!(&**member.name, "bar");
        assert_eq!(&**member.descriptor, "()V");
    }

    #[test]
    fn wide_entries_take_two_indices() {
        let mut pool = ConstPool::new();
        let long = pool.long(5);
        let int = pool.integer(7);
        assert_eq!(int, long + 2);
        assert_eq!(pool.get_long(long).unwrap(), 5);
        assert_eq!(pool.get(long + 1), Err(FatalError::BadConstant(long + 1)));
        assert_eq!(pool.get(0), Err(FatalError::BadConstant(0)));
        assert!(pool.get_int(long).is_err());
    }
}
