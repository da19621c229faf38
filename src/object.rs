use std::sync::{
    atomic::{AtomicI16, AtomicI32, AtomicI64, AtomicI8, AtomicU16, AtomicU32, AtomicU64, Ordering},
    Arc,
};

use parking_lot::RwLock;

use crate::{class::Class, field_storage::FieldStorage, monitor::Monitor, Typ, Value};

/// Handle to a heap object. Cloning the handle does not copy the object; equality is identity.
#[derive(Clone)]
pub struct Object(Arc<ObjectData>);

pub(crate) struct ObjectData {
    class: Arc<Class>,
    fields: FieldStorage,
    array: Option<ArrayStorage>,
    monitor: Monitor,
}

/// Array elements, stored at their declared width
pub(crate) enum ArrayStorage {
    Byte(Box<[AtomicI8]>),
    Char(Box<[AtomicU16]>),
    Short(Box<[AtomicI16]>),
    Int(Box<[AtomicI32]>),
    Long(Box<[AtomicI64]>),
    Float(Box<[AtomicU32]>),
    Double(Box<[AtomicU64]>),
    Ref(Box<[RwLock<Option<Object>>]>),
}

fn filled<T>(length: usize, f: impl Fn() -> T) -> Box<[T]> {
    (0..length).map(|_| f()).collect()
}

impl ArrayStorage {
    /// Zero-initialized storage for `length` elements of type `element`
    fn new(element: &Typ, length: usize) -> Self {
        match element {
            Typ::Boolean | Typ::Byte => Self::Byte(filled(length, || AtomicI8::new(0))),
            Typ::Char => Self::Char(filled(length, || AtomicU16::new(0))),
            Typ::Short => Self::Short(filled(length, || AtomicI16::new(0))),
            Typ::Int => Self::Int(filled(length, || AtomicI32::new(0))),
            Typ::Long => Self::Long(filled(length, || AtomicI64::new(0))),
            Typ::Float => Self::Float(filled(length, || AtomicU32::new(0))),
            Typ::Double => Self::Double(filled(length, || AtomicU64::new(0))),
            Typ::Ref(_) => Self::Ref(filled(length, || RwLock::new(None))),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Byte(a) => a.len(),
            Self::Char(a) => a.len(),
            Self::Short(a) => a.len(),
            Self::Int(a) => a.len(),
            Self::Long(a) => a.len(),
            Self::Float(a) => a.len(),
            Self::Double(a) => a.len(),
            Self::Ref(a) => a.len(),
        }
    }
}

impl Object {
    pub(crate) fn new_instance(class: Arc<Class>) -> Self {
        let (primitives, references) = class.instance_layout;
        Self(Arc::new(ObjectData {
            class,
            fields: FieldStorage::new(primitives, references),
            array: None,
            monitor: Monitor::default(),
        }))
    }

    /// # Panics
    /// Panics if `class` is not an array class
    #[track_caller]
    pub(crate) fn new_array(class: Arc<Class>, length: usize) -> Self {
        let element = class
            .element_type
            .as_ref()
            .unwrap_or_else(|| panic!("{} is not an array class", class.name()));
        let array = ArrayStorage::new(element, length);
        Self(Arc::new(ObjectData {
            class,
            fields: FieldStorage::new(0, 0),
            array: Some(array),
            monitor: Monitor::default(),
        }))
    }

    pub fn class(&self) -> &Arc<Class> {
        &self.0.class
    }

    pub(crate) fn fields(&self) -> &FieldStorage {
        &self.0.fields
    }

    pub(crate) fn monitor(&self) -> &Monitor {
        &self.0.monitor
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Stable for the lifetime of the object
    pub fn identity_hash(&self) -> i32 {
        let addr = Arc::as_ptr(&self.0) as usize;
        (addr >> 3) as i32
    }

    pub fn is_array(&self) -> bool {
        self.0.array.is_some()
    }

    pub fn array_len(&self) -> Option<i32> {
        self.0.array.as_ref().map(|array| array.len() as i32)
    }

    /// Returns the element at `index`, widened to an int for boolean/byte/char/short arrays.
    /// None if this is not an array or the index is out of bounds.
    pub fn array_get(&self, index: i32) -> Option<Value> {
        let index = usize::try_from(index).ok()?;
        Some(match self.0.array.as_ref()? {
            ArrayStorage::Byte(a) => Value::Int(a.get(index)?.load(Ordering::Relaxed) as i32),
            ArrayStorage::Char(a) => Value::Int(a.get(index)?.load(Ordering::Relaxed) as i32),
            ArrayStorage::Short(a) => Value::Int(a.get(index)?.load(Ordering::Relaxed) as i32),
            ArrayStorage::Int(a) => Value::Int(a.get(index)?.load(Ordering::Relaxed)),
            ArrayStorage::Long(a) => Value::Long(a.get(index)?.load(Ordering::Relaxed)),
            ArrayStorage::Float(a) => {
                Value::Float(f32::from_bits(a.get(index)?.load(Ordering::Relaxed)))
            }
            ArrayStorage::Double(a) => {
                Value::Double(f64::from_bits(a.get(index)?.load(Ordering::Relaxed)))
            }
            ArrayStorage::Ref(a) => Value::Ref(a.get(index)?.read().clone()),
        })
    }

    /// Sets an array element, truncating ints for boolean/byte/char/short arrays
    /// and rounding doubles stored into float arrays.
    /// None if this is not an array, the index is out of bounds or the value has the wrong kind.
    /// Store compatibility of references is the caller's concern.
    pub fn array_set(&self, index: i32, value: Value) -> Option<()> {
        let index = usize::try_from(index).ok()?;
        let element = self.0.class.element_type.as_ref()?;
        let value = value.convert_to(element)?;
        match (self.0.array.as_ref()?, value) {
            (ArrayStorage::Byte(a), Value::Int(v)) => a.get(index)?.store(v as i8, Ordering::Relaxed),
            (ArrayStorage::Char(a), Value::Int(v)) => a.get(index)?.store(v as u16, Ordering::Relaxed),
            (ArrayStorage::Short(a), Value::Int(v)) => a.get(index)?.store(v as i16, Ordering::Relaxed),
            (ArrayStorage::Int(a), Value::Int(v)) => a.get(index)?.store(v, Ordering::Relaxed),
            (ArrayStorage::Long(a), Value::Long(v)) => a.get(index)?.store(v, Ordering::Relaxed),
            (ArrayStorage::Float(a), Value::Float(v)) => {
                a.get(index)?.store(v.to_bits(), Ordering::Relaxed)
            }
            (ArrayStorage::Double(a), Value::Double(v)) => {
                a.get(index)?.store(v.to_bits(), Ordering::Relaxed)
            }
            (ArrayStorage::Ref(a), Value::Ref(v)) => *a.get(index)?.write() = v,
            _ => return None,
        }
        Some(())
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Object {}

impl std::hash::Hash for Object {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::hash::Hash::hash(&Arc::as_ptr(&self.0), state)
    }
}

impl std::fmt::Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{:x}", self.0.class.name(), self.identity_hash())
    }
}
