use parking_lot::{Mutex, RwLock};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use tracing::debug;

use crate::{
    builtins,
    class::Class,
    class_loader::ClassLoader,
    error::{Error, FatalError},
    exception::{self, ExceptionKind, Fault},
    interpreter::raise,
    method::{Method, MethodNaT},
    native::NativeRegistry,
    object::Object,
    options::JvmOptions,
    resolve,
    thread::{Thread, ThreadId},
    typ::Typ,
    AccessFlags, Value,
};

/// Err is either an exception to throw or a fatal error
pub type JVMResult<T> = std::result::Result<T, Fault>;

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

pub struct Jvm {
    /// Uniquely identifies the Jvm to prevent mixing of objects between Jvms
    pub(crate) id: u64,
    options: JvmOptions,
    /// Currently there's a single class loader per Jvm.
    class_loader: Box<dyn ClassLoader>,
    classes: RwLock<HashMap<Arc<str>, Arc<Class>>>,
    natives: NativeRegistry,
    strings: Mutex<HashMap<Arc<str>, Object>>,
    next_thread_id: AtomicU64,
}

impl Jvm {
    /// Construct a new JVM loading its classes from `class_loader`.
    /// Natives of the core classes are registered already.
    pub fn new(class_loader: Box<dyn ClassLoader>) -> Self {
        Self::with_options(class_loader, JvmOptions::default())
    }

    pub fn with_options(class_loader: Box<dyn ClassLoader>, options: JvmOptions) -> Self {
        let natives = NativeRegistry::default();
        builtins::register_natives(&natives);
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::SeqCst),
            options,
            class_loader,
            classes: Default::default(),
            natives,
            strings: Default::default(),
            next_thread_id: AtomicU64::new(1),
        }
    }

    pub fn options(&self) -> &JvmOptions {
        &self.options
    }

    /// Handlers for native methods; register more to extend the built-in set
    pub fn natives(&self) -> &NativeRegistry {
        &self.natives
    }

    /// Returns the class, loading it if it wasn't already loaded.
    /// This also loads its superclass and any interfaces it implements.
    /// Does not initialize this class nor load any other class referenced.
    /// `name` is an internal name such as `java/lang/String` (dots are accepted too) or an array descriptor like `[I`.
    pub fn resolve_class(&self, name: &str) -> JVMResult<Arc<Class>> {
        self.resolve_class_impl(name, Vec::new())
    }

    /// This is only to be called by `resolve_class` and errors out on loops in the class hierarchy
    fn resolve_class_impl(
        &self,
        name: &str,
        mut check_circular: Vec<Arc<str>>,
    ) -> JVMResult<Arc<Class>> {
        if let Some(class) = self.classes.read().get(name) {
            return Ok(class.clone());
        }
        // Do we want to load an array?
        if let Some(element) = name.strip_prefix('[') {
            return match Typ::parse(element) {
                Ok(element) => self.array_class(&element),
                Err(_) => raise(ExceptionKind::NoClassDefFound, name),
            };
        }
        // Normalize binary class names
        if name.contains('.') {
            return self.resolve_class_impl(&name.replace('.', "/"), check_circular);
        }

        let Some(def) = self.class_loader.load(name) else {
            return raise(ExceptionKind::NoClassDefFound, name.replace('/', "."));
        };
        if *def.name != *name {
            return raise(
                ExceptionKind::NoClassDefFound,
                format!("{} (wrong name: {})", name.replace('/', "."), def.name),
            );
        }
        let is_interface = def.access_flags.contains(AccessFlags::INTERFACE);
        check_circular.push(def.name.clone());

        // Superclasses loading & verification
        let super_class = match &def.super_class {
            Some(super_name) => {
                if check_circular.contains(super_name) {
                    return raise(ExceptionKind::ClassCircularity, name.replace('/', "."));
                }
                let super_class = self.resolve_class_impl(super_name, check_circular.clone())?;
                if super_class.is_array()
                    || super_class
                        .access_flags
                        .intersects(AccessFlags::FINAL | AccessFlags::INTERFACE)
                {
                    return raise(
                        ExceptionKind::IncompatibleClassChange,
                        format!(
                            "class {} cannot inherit from {}",
                            name.replace('/', "."),
                            super_class.name().replace('/', ".")
                        ),
                    );
                }
                Some(super_class)
            }
            None if name == "java/lang/Object" => None,
            None => {
                return raise(
                    ExceptionKind::ClassFormat,
                    format!("{} has no superclass", name.replace('/', ".")),
                )
            }
        };

        // Interfaces must directly inherit from object (5.3.5)
        if is_interface && super_class.as_ref().map_or(true, |s| s.name() != "java/lang/Object") {
            return raise(
                ExceptionKind::ClassFormat,
                format!("interface {} must extend java.lang.Object", name.replace('/', ".")),
            );
        }

        let mut interfaces = Vec::with_capacity(def.interfaces.len());
        for interface_name in &def.interfaces {
            if check_circular.contains(interface_name) {
                return raise(ExceptionKind::ClassCircularity, name.replace('/', "."));
            }
            let interface = self.resolve_class_impl(interface_name, check_circular.clone())?;
            if !interface.is_interface() {
                return raise(
                    ExceptionKind::IncompatibleClassChange,
                    format!(
                        "class {} can not implement {}, because it is not an interface",
                        name.replace('/', "."),
                        interface.name().replace('/', ".")
                    ),
                );
            }
            interfaces.push(interface);
        }

        let class = Class::new(def, super_class, interfaces)?;
        let mut guard = self.classes.write();
        // Check if loaded by another thread in the meantime
        if let Some(class) = guard.get(name) {
            return Ok(class.clone());
        }
        guard.insert(class.name.clone(), class.clone());
        debug!(class = name, "loaded");
        Ok(class)
    }

    /// Returns the class representing arrays with the given element type.
    /// If the element is a class, this also loads it.
    pub fn array_class(&self, element: &Typ) -> JVMResult<Arc<Class>> {
        let name: Arc<str> = format!("[{}", element.descriptor()).into();
        if let Some(class) = self.classes.read().get(&name) {
            return Ok(class.clone());
        }
        let component = match element {
            Typ::Ref(component) => Some(self.resolve_class(component)?),
            _ => None,
        };
        let object = self.resolve_class("java/lang/Object")?;
        let interfaces = ["java/lang/Cloneable", "java/io/Serializable"]
            .into_iter()
            .filter_map(|name| self.resolve_class(name).ok())
            .collect();
        let array = Class::new_array(name.clone(), element.clone(), component, object, interfaces);

        let mut guard = self.classes.write();
        // Check if loaded by another thread in the meantime
        if let Some(array) = guard.get(&name) {
            return Ok(array.clone());
        }
        guard.insert(name, array.clone());
        Ok(array)
    }

    /// Creates an instance of a non-array class with all fields zeroed.
    /// Does not run a constructor nor initialize the class.
    pub fn create_object(&self, class: Arc<Class>) -> Object {
        Object::new_instance(class)
    }

    /// Creates an array filled with zeros or nulls
    pub fn create_array(&self, class: Arc<Class>, length: i32) -> JVMResult<Object> {
        if length < 0 {
            return raise(ExceptionKind::NegativeArraySize, length.to_string());
        }
        if !class.is_array() {
            return Err(FatalError::SlotMismatch {
                expected: "array class",
                found: class.name().into(),
            }
            .into());
        }
        Ok(Object::new_array(class, length as usize))
    }

    pub fn create_array_of(&self, element: &Typ, length: i32) -> JVMResult<Object> {
        let class = self.array_class(element)?;
        self.create_array(class, length)
    }

    /// Creates nested arrays, `counts[0]` being the outermost length.
    /// Dimensions beyond `counts` stay null.
    pub fn create_multi_array(&self, class: Arc<Class>, counts: &[i32]) -> JVMResult<Object> {
        let Some((&length, rest)) = counts.split_first() else {
            return Err(FatalError::ArgumentMismatch(format!("no dimensions for {:?}", class)).into());
        };
        let component = class.component.clone();
        let array = self.create_array(class, length)?;
        if rest.is_empty() {
            return Ok(array);
        }
        let component = component
            .filter(|component| component.is_array())
            .ok_or_else(|| FatalError::BadDescriptor(format!("{:?}", array.class())))?;
        for index in 0..length {
            let sub = self.create_multi_array(component.clone(), rest)?;
            array.array_set(index, sub.into()).ok_or_else(|| FatalError::SlotMismatch {
                expected: "reference array",
                found: format!("{:?}", array),
            })?;
        }
        Ok(array)
    }

    /// The canonical `java/lang/String` for `value`. Literals and constants share it.
    pub fn intern_string(&self, value: &str) -> JVMResult<Object> {
        if let Some(string) = self.strings.lock().get(value) {
            return Ok(string.clone());
        }
        let string = self.new_string(value)?;
        Ok(self
            .strings
            .lock()
            .entry(value.into())
            .or_insert(string)
            .clone())
    }

    /// Creates a new, not interned `java/lang/String`
    pub fn new_string(&self, value: &str) -> JVMResult<Object> {
        let chars: Vec<u16> = value.encode_utf16().collect();
        let length = i32::try_from(chars.len())
            .map_err(|_| FatalError::ArgumentMismatch(format!("string of {} chars", chars.len())))?;
        let array = self.create_array_of(&Typ::Char, length)?;
        for (index, char) in (0..length).zip(chars) {
            array
                .array_set(index, Value::Int(char as i32))
                .ok_or_else(|| FatalError::SlotMismatch {
                    expected: "char array",
                    found: format!("{:?}", array),
                })?;
        }
        let string = self.create_object(self.resolve_class("java/lang/String")?);
        self.write_field(&string, "value", "[C", array.into())?;
        Ok(string)
    }

    /// The contents of a `java/lang/String`; None if `string` isn't one
    pub fn string_value(&self, string: &Object) -> Option<String> {
        let field = string.class().field("value", Typ::Ref("[C".into()))?;
        let value = field.read(string.fields())?;
        let array = value.as_object()?;
        let chars = (0..array.array_len()?)
            .map(|index| array.array_get(index).and_then(|c| c.as_int()).map(|c| c as u16))
            .collect::<Option<Vec<_>>>()?;
        Some(String::from_utf16_lossy(&chars))
    }

    /// The `java/lang/Class` object representing `class`
    pub fn class_mirror(&self, class: &Arc<Class>) -> JVMResult<Object> {
        if let Some(mirror) = class.mirror.get() {
            return Ok(mirror.clone());
        }
        let mirror = self.create_object(self.resolve_class("java/lang/Class")?);
        let name = self.intern_string(&class.name().replace('/', "."))?;
        self.write_field(&mirror, "name", "Ljava/lang/String;", name.into())?;
        Ok(class.mirror.get_or_init(|| mirror).clone())
    }

    /// External class name and detail message of a throwable
    pub fn describe(&self, exception: &Object) -> (String, Option<String>) {
        let message = exception
            .class()
            .field("detailMessage", Typ::Ref("java/lang/String".into()))
            .and_then(|field| field.read(exception.fields()))
            .and_then(|value| value.as_object().and_then(|s| self.string_value(s)));
        (exception.class().name().replace('/', "."), message)
    }

    pub(crate) fn set_message(&self, exception: &Object, message: &str) -> Result<(), FatalError> {
        let message = self.new_string(message).map_err(|fault| match fault {
            Fault::Fatal(err) => err,
            _ => FatalError::MissingCoreClass("java/lang/String".into()),
        })?;
        self.write_field(exception, "detailMessage", "Ljava/lang/String;", message.into())
    }

    /// Writes a field the core classes are known to declare
    pub(crate) fn write_field(
        &self,
        object: &Object,
        name: &str,
        descriptor: &str,
        value: Value,
    ) -> Result<(), FatalError> {
        let missing = || FatalError::MissingCoreField(format!("{}.{name}", object.class().name()));
        let field = object
            .class()
            .field(name, Typ::parse(descriptor)?)
            .ok_or_else(missing)?;
        field.write(object.fields(), value).ok_or_else(missing)
    }

    /// Reports a fault that escaped to the host
    pub(crate) fn into_error(&self, fault: Fault) -> Error {
        match exception::materialize(self, fault) {
            Ok(exception) => {
                let (class, message) = self.describe(&exception);
                Error::Uncaught {
                    class,
                    message,
                    exception,
                }
            }
            Err(err) => err.into(),
        }
    }

    /// Creates a thread that hasn't started yet
    pub fn new_thread(&self) -> Thread {
        Thread::new(ThreadId(self.next_thread_id.fetch_add(1, Ordering::SeqCst)))
    }

    /// Looks up a method the way invokevirtual/invokeinterface resolve it, loading the class if needed
    pub fn resolve_method(&self, class: &str, name: &str, descriptor: &str) -> Result<Arc<Method>, Error> {
        let resolved = self.resolve_class(class).and_then(|class| {
            let nat = MethodNaT::parse(name, descriptor)?;
            if class.is_interface() {
                resolve::resolve_interface_method(self, &class, &nat)
            } else {
                resolve::resolve_method(&class, &nat)
            }
        });
        resolved.map_err(|fault| self.into_error(fault))
    }

    /// Runs `method` to completion on a new thread.
    /// Instance methods take the receiver as the first argument.
    pub fn invoke(&self, method: &Arc<Method>, args: &[Value]) -> Result<Option<Value>, Error> {
        let mut thread = self.new_thread();
        thread.start(self, method, args)?;
        thread.run(self)
    }
}

impl Eq for Jvm {}

impl PartialEq for Jvm {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl std::fmt::Debug for Jvm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Jvm#{} ({} classes)", self.id, self.classes.read().len())
    }
}

#[allow(clippy::extra_unused_type_parameters)]
fn _assert_jvm_is_send_sync<T: Send + Sync>() {
    if false {
        _assert_jvm_is_send_sync::<Jvm>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClassBuilder, MemoryClassLoader};

    fn jvm(classes: Vec<crate::ClassDef>) -> Jvm {
        Jvm::new(MemoryClassLoader::new_boxed(classes))
    }

    #[test]
    fn classes_are_loaded_once() {
        let jvm = jvm(vec![ClassBuilder::new("a/B").build()]);
        let first = jvm.resolve_class("a/B").unwrap();
        let second = jvm.resolve_class("a.B").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.super_class().unwrap().name(), "java/lang/Object");
    }

    #[test]
    fn circular_hierarchy_is_rejected() {
        let jvm = jvm(vec![
            ClassBuilder::new("A").super_class(Some("B")).build(),
            ClassBuilder::new("B").super_class(Some("A")).build(),
        ]);
        assert!(matches!(
            jvm.resolve_class("A"),
            Err(Fault::Exception(ExceptionKind::ClassCircularity, _))
        ));
    }

    #[test]
    fn final_superclass_is_incompatible() {
        let jvm = jvm(vec![
            ClassBuilder::new("F")
                .access_flags(AccessFlags::PUBLIC | AccessFlags::FINAL)
                .build(),
            ClassBuilder::new("G").super_class(Some("F")).build(),
        ]);
        assert!(matches!(
            jvm.resolve_class("G"),
            Err(Fault::Exception(ExceptionKind::IncompatibleClassChange, _))
        ));
        assert!(matches!(
            jvm.resolve_class("Missing"),
            Err(Fault::Exception(ExceptionKind::NoClassDefFound, _))
        ));
    }

    #[test]
    fn array_classes_know_their_component() {
        let jvm = jvm(vec![]);
        let strings = jvm.resolve_class("[[Ljava/lang/String;").unwrap();
        let inner = strings.component.clone().unwrap();
        assert_eq!(inner.name(), "[Ljava/lang/String;");
        assert_eq!(inner.component.as_ref().unwrap().name(), "java/lang/String");
        assert_eq!(strings.interfaces().len(), 2);
        let object_array = jvm.resolve_class("[Ljava/lang/Object;").unwrap();
        assert!(inner.assignable_to(&object_array));
        assert!(!object_array.assignable_to(&inner));
    }

    #[test]
    fn strings_are_interned() {
        let jvm = jvm(vec![]);
        let a = jvm.intern_string("héllo").unwrap();
        let b = jvm.intern_string("héllo").unwrap();
        assert!(a.ptr_eq(&b));
        assert_eq!(jvm.string_value(&a).as_deref(), Some("héllo"));
        let c = jvm.new_string("héllo").unwrap();
        assert!(!a.ptr_eq(&c));
    }

    #[test]
    fn strings_hold_utf16_units() {
        let jvm = jvm(vec![]);
        let string = jvm.new_string("a😀").unwrap();
        let field = string.class().field("value", Typ::Ref("[C".into())).unwrap();
        let chars = field.read(string.fields()).unwrap();
        let chars = chars.as_object().unwrap();
        assert_eq!(chars.array_len(), Some(3));
        assert_eq!(chars.array_get(1), Some(Value::Int(0xd83d)));
        assert_eq!(jvm.string_value(&string).as_deref(), Some("a😀"));
        assert_eq!(jvm.string_value(&jvm.new_string("").unwrap()).as_deref(), Some(""));
    }

    #[test]
    fn multi_arrays_nest() {
        let jvm = jvm(vec![]);
        let class = jvm.resolve_class("[[I").unwrap();
        let array = jvm.create_multi_array(class.clone(), &[2, 3]).unwrap();
        assert_eq!(array.array_len(), Some(2));
        let row = array.array_get(1).unwrap();
        assert_eq!(row.as_object().unwrap().array_len(), Some(3));
        let partial = jvm.create_multi_array(class.clone(), &[2]).unwrap();
        assert_eq!(partial.array_get(0), Some(Value::Ref(None)));
        assert!(matches!(
            jvm.create_array(class, -1),
            Err(Fault::Exception(ExceptionKind::NegativeArraySize, _))
        ));
    }
}
