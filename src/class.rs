use parking_lot::{Condvar, Mutex};
use std::{
    collections::HashMap,
    sync::{Arc, OnceLock},
};

use crate::{
    class_def::ClassDef,
    const_pool::ConstPool,
    error::FatalError,
    field::{Field, FieldNaT},
    field_storage::FieldStorage,
    method::{Method, MethodDescriptor, MethodNaT},
    monitor::Monitor,
    object::Object,
    thread::ThreadId,
    typ::Typ,
    AccessFlags,
};

/// Represents a regular class, an interface or an array class
pub struct Class {
    /// Internal name, e.g. `java/lang/Object` or `[I`
    pub(crate) name: Arc<str>,
    pub(crate) super_class: Option<Arc<Class>>,
    pub(crate) interfaces: Vec<Arc<Class>>,
    /// For array classes, this is the type of the array elements; None for normal classes
    pub(crate) element_type: Option<Typ>,
    /// For arrays of references, the class of the elements
    pub(crate) component: Option<Arc<Class>>,
    pub(crate) const_pool: ConstPool,
    pub(crate) access_flags: AccessFlags,
    /// As far as I can tell, JVM supports field overloading
    pub(crate) fields: HashMap<FieldNaT, Arc<Field>>,
    /// Declared methods only; inherited ones are found by walking the hierarchy
    pub(crate) methods: HashMap<MethodNaT, Arc<Method>>,
    pub(crate) static_storage: FieldStorage,
    /// Primitive and reference slots of an instance, including inherited fields
    pub(crate) instance_layout: (usize, usize),
    pub(crate) init: Mutex<ClassInitState>,
    pub(crate) init_waiter: Condvar,
    /// Used by static synchronized methods
    pub(crate) monitor: Monitor,
    pub(crate) mirror: OnceLock<Object>,
}

pub(crate) enum ClassInitState {
    Uninit,
    InProgress(ThreadId),
    Done,
    Error,
}

/// Outcome of trying to start initialization
pub(crate) enum InitCheck {
    /// Initialized, or being initialized by the asking thread
    Ready,
    /// The asking thread now owns initialization and must run `<clinit>`
    Begin,
    /// Another thread is initializing the class
    Wait,
    /// An earlier initialization attempt failed
    Failed,
}

impl Class {
    /// Builds a class from its definition. Superclass and interfaces must already be linked.
    pub(crate) fn new(
        def: ClassDef,
        super_class: Option<Arc<Class>>,
        interfaces: Vec<Arc<Class>>,
    ) -> Result<Arc<Self>, FatalError> {
        let methods = def
            .methods
            .into_iter()
            .map(|m| Ok((MethodNaT::parse(&m.name, &m.descriptor)?, m.access_flags, m.code)))
            .collect::<Result<Vec<_>, FatalError>>()?;
        let fields = def
            .fields
            .into_iter()
            .map(|f| {
                let nat = FieldNaT {
                    name: f.name,
                    typ: Typ::parse(&f.descriptor)?,
                };
                Ok((nat, f.access_flags, f.constant))
            })
            .collect::<Result<Vec<_>, FatalError>>()?;

        // Instance fields continue numbering after the superclass' fields
        let (mut instance_prims, mut instance_refs) =
            super_class.as_ref().map_or((0, 0), |s| s.instance_layout);
        let (mut static_prims, mut static_refs) = (0, 0);

        Ok(Arc::new_cyclic(|class| {
            let fields = fields
                .into_iter()
                .map(|(nat, access_flags, constant)| {
                    let is_static = access_flags.contains(AccessFlags::STATIC);
                    let counter = match (is_static, nat.typ.is_reference()) {
                        (true, true) => &mut static_refs,
                        (true, false) => &mut static_prims,
                        (false, true) => &mut instance_refs,
                        (false, false) => &mut instance_prims,
                    };
                    let slot = *counter as u32;
                    *counter += 1;
                    let field = Field {
                        nat: nat.clone(),
                        class: class.clone(),
                        access_flags,
                        slot,
                        constant: constant.filter(|_| is_static),
                    };
                    (nat, Arc::new(field))
                })
                .collect();
            let methods = methods
                .into_iter()
                .map(|(nat, access_flags, code)| {
                    let method = Method {
                        nat: nat.clone(),
                        access_flags,
                        class: class.clone(),
                        code: code.map(Arc::new),
                    };
                    (nat, Arc::new(method))
                })
                .collect();
            Class {
                name: def.name,
                super_class,
                interfaces,
                element_type: None,
                component: None,
                const_pool: def.const_pool,
                access_flags: def.access_flags,
                fields,
                methods,
                static_storage: FieldStorage::new(static_prims, static_refs),
                instance_layout: (instance_prims, instance_refs),
                init: ClassInitState::Uninit.into(),
                init_waiter: Condvar::new(),
                monitor: Monitor::default(),
                mirror: OnceLock::new(),
            }
        }))
    }

    /// Builds the class of arrays with the given element type. Arrays need no initialization.
    pub(crate) fn new_array(
        name: Arc<str>,
        element_type: Typ,
        component: Option<Arc<Class>>,
        object: Arc<Class>,
        interfaces: Vec<Arc<Class>>,
    ) -> Arc<Self> {
        let access_flags = match &component {
            Some(component) => component.access_flags & AccessFlags::PUBLIC,
            None => AccessFlags::PUBLIC,
        } | AccessFlags::FINAL
            | AccessFlags::ABSTRACT;
        Arc::new(Class {
            name,
            super_class: Some(object),
            interfaces,
            element_type: Some(element_type),
            component,
            const_pool: ConstPool::new(),
            access_flags,
            fields: HashMap::new(),
            methods: HashMap::new(),
            static_storage: FieldStorage::new(0, 0),
            instance_layout: (0, 0),
            init: ClassInitState::Done.into(),
            init_waiter: Condvar::new(),
            monitor: Monitor::default(),
            mirror: OnceLock::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn super_class(&self) -> Option<&Arc<Class>> {
        self.super_class.as_ref()
    }

    pub fn interfaces(&self) -> &[Arc<Class>] {
        &self.interfaces
    }

    pub fn access_flags(&self) -> AccessFlags {
        self.access_flags
    }

    pub fn element_type(&self) -> Option<&Typ> {
        self.element_type.as_ref()
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(AccessFlags::INTERFACE)
    }

    pub fn is_abstract(&self) -> bool {
        self.access_flags.contains(AccessFlags::ABSTRACT)
    }

    pub fn is_array(&self) -> bool {
        self.element_type.is_some()
    }

    /// Everything before the last `/`; the empty string for the unnamed package
    pub fn package_name(&self) -> &str {
        let name = self.name.trim_start_matches('[');
        let name = name.strip_prefix('L').filter(|_| self.is_array()).unwrap_or(name);
        name.rfind('/').map_or("", |end| &name[..end])
    }

    pub fn same_package(&self, other: &Class) -> bool {
        self.package_name() == other.package_name()
    }

    /// A method declared by this class itself
    pub fn declared_method(&self, nat: &MethodNaT) -> Option<&Arc<Method>> {
        self.methods.get(nat)
    }

    /// A method declared by this class itself, by name and descriptor
    pub fn method(&self, name: &str, descriptor: &str) -> Option<Arc<Method>> {
        let nat = MethodNaT::parse(name, descriptor).ok()?;
        self.methods.get(&nat).cloned()
    }

    pub fn methods(&self) -> impl Iterator<Item = &Arc<Method>> {
        self.methods.values()
    }

    /// The static initializer `<clinit>()V`, if declared
    pub(crate) fn initializer(&self) -> Option<Arc<Method>> {
        self.methods
            .get(&MethodNaT {
                name: "<clinit>".into(),
                typ: MethodDescriptor(vec![], None),
            })
            .cloned()
    }

    pub fn declared_field(&self, nat: &FieldNaT) -> Option<&Arc<Field>> {
        self.fields.get(nat)
    }

    /// Looks up a field in this class and its superclasses
    pub fn field(&self, name: &str, typ: Typ) -> Option<Arc<Field>> {
        self.field_by_nat(&FieldNaT {
            name: name.into(),
            typ,
        })
    }

    pub(crate) fn field_by_nat(&self, nat: &FieldNaT) -> Option<Arc<Field>> {
        self.fields
            .get(nat)
            .cloned()
            .or_else(|| self.super_class.as_ref().and_then(|c| c.field_by_nat(nat)))
    }

    /// Whether this is `other`, extends it or implements it, directly or indirectly
    pub fn is_subclass_of(&self, other: &Class) -> bool {
        std::ptr::eq(self, other)
            || self
                .super_class
                .as_ref()
                .map_or(false, |s| s.is_subclass_of(other))
            || self.interfaces.iter().any(|i| i.is_subclass_of(other))
    }

    /// Whether this is a proper superclass of `other`
    pub fn is_superclass_of(&self, other: &Class) -> bool {
        let mut current = other.super_class.as_ref();
        while let Some(class) = current {
            if std::ptr::eq(&**class, self) {
                return true;
            }
            current = class.super_class.as_ref();
        }
        false
    }

    /// Whether a value of this class may be stored where `other` is expected (JVMS checkcast rules)
    pub fn assignable_to(&self, other: &Class) -> bool {
        match (&self.element_type, &other.element_type) {
            (Some(own), Some(theirs)) => match (&self.component, &other.component) {
                (Some(own), Some(theirs)) => own.assignable_to(theirs),
                (None, None) => own == theirs,
                _ => false,
            },
            _ => self.is_subclass_of(other),
        }
    }

    pub fn is_initialized(&self) -> bool {
        matches!(*self.init.lock(), ClassInitState::Done)
    }

    pub(crate) fn try_begin_init(&self, thread: ThreadId) -> InitCheck {
        let mut guard = self.init.lock();
        match &*guard {
            ClassInitState::Done => InitCheck::Ready,
            ClassInitState::Error => InitCheck::Failed,
            ClassInitState::InProgress(owner) if *owner == thread => InitCheck::Ready,
            ClassInitState::InProgress(_) => InitCheck::Wait,
            ClassInitState::Uninit => {
                *guard = ClassInitState::InProgress(thread);
                InitCheck::Begin
            }
        }
    }

    /// Records the outcome of `<clinit>`; a failed class can't be initialized again
    pub(crate) fn finish_init(&self, initialized: bool) {
        *self.init.lock() = if initialized {
            ClassInitState::Done
        } else {
            ClassInitState::Error
        };
        self.init_waiter.notify_all();
    }

    /// Blocks the host thread until another thread finishes initializing this class.
    /// False if that initialization failed.
    pub(crate) fn wait_init(&self) -> bool {
        let mut guard = self.init.lock();
        loop {
            match &*guard {
                ClassInitState::Done => return true,
                ClassInitState::Error => return false,
                ClassInitState::InProgress(_) | ClassInitState::Uninit => {
                    self.init_waiter.wait(&mut guard)
                }
            }
        }
    }
}

impl Eq for Class {}
impl PartialEq for Class {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl std::fmt::Debug for Class {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}
