//! Symbolic reference resolution (JVMS 5.4.3), access control (5.4.4)
//! and method selection (5.4.6).
//!
//! Resolution results are cached in the constant pool of the referring class;
//! failures are not cached, so a later attempt can succeed once the missing class is loadable.

use std::sync::Arc;

use crate::{
    class::Class,
    const_pool::{MemberKind, Resolved},
    error::FatalError,
    exception::{ExceptionKind, Fault},
    field::{Field, FieldNaT},
    interpreter::raise,
    jvm::{JVMResult, Jvm},
    method::{Method, MethodDescriptor, MethodNaT},
    object::Object,
    AccessFlags, Typ,
};

/// A resolved `Methodref`/`InterfaceMethodref`
#[derive(Debug)]
pub(crate) struct MethodRef {
    /// The class named by the reference, not necessarily the one declaring the method
    pub class: Arc<Class>,
    pub method: Arc<Method>,
    /// The descriptor at the call site. Only differs from the method's for signature polymorphic methods.
    pub descriptor: MethodDescriptor,
    pub interface: bool,
}

fn external_name(class: &Class) -> String {
    class.name().replace('/', ".")
}

/// Class, field or method entry of the constant pool of `current`
pub(crate) fn resolve_class_ref(
    jvm: &Jvm,
    current: &Arc<Class>,
    index: u16,
) -> JVMResult<Arc<Class>> {
    let pool = &current.const_pool;
    if let Some(Resolved::Class(class)) = pool.cached(index) {
        return Ok(class.clone());
    }
    let class = jvm.resolve_class(pool.get_class_name(index)?)?;
    check_class_access(current, &class)?;
    pool.cache(index, Resolved::Class(class.clone()));
    Ok(class)
}

/// A class is accessible if public or in the same run-time package.
/// Arrays are accessible if their innermost element class is.
pub(crate) fn check_class_access(current: &Class, class: &Arc<Class>) -> JVMResult<()> {
    let mut target = class;
    while let Some(component) = &target.component {
        target = component;
    }
    if target.is_array()
        || target.access_flags.contains(AccessFlags::PUBLIC)
        || target.same_package(current)
    {
        return Ok(());
    }
    raise(
        ExceptionKind::IllegalAccess,
        format!(
            "class {} cannot access its superclass or member class {}",
            external_name(current),
            external_name(target)
        ),
    )
}

pub(crate) fn resolve_string(jvm: &Jvm, current: &Arc<Class>, index: u16) -> JVMResult<Object> {
    let pool = &current.const_pool;
    if let Some(Resolved::String(string)) = pool.cached(index) {
        return Ok(string.clone());
    }
    let string = jvm.intern_string(pool.get_string(index)?)?;
    pool.cache(index, Resolved::String(string.clone()));
    Ok(string)
}

/// Field lookup: the class itself, then its superinterfaces, then its superclass (JVMS 5.4.3.2)
pub(crate) fn lookup_field(class: &Class, nat: &FieldNaT) -> Option<Arc<Field>> {
    if let Some(field) = class.declared_field(nat) {
        return Some(field.clone());
    }
    class
        .interfaces
        .iter()
        .find_map(|interface| lookup_field(interface, nat))
        .or_else(|| class.super_class.as_ref().and_then(|s| lookup_field(s, nat)))
}

pub(crate) fn resolve_field_ref(
    jvm: &Jvm,
    current: &Arc<Class>,
    index: u16,
) -> JVMResult<Arc<Field>> {
    let pool = &current.const_pool;
    if let Some(Resolved::Field(field)) = pool.cached(index) {
        return Ok(field.clone());
    }
    let member = pool.get_member_ref(index)?;
    if member.kind != MemberKind::Field {
        return Err(FatalError::BadConstant(index).into());
    }
    let class = resolve_class_ref(jvm, current, member.class_index)?;
    let nat = FieldNaT {
        name: member.name.clone(),
        typ: Typ::parse(member.descriptor)?,
    };
    let Some(field) = lookup_field(&class, &nat) else {
        return raise(
            ExceptionKind::NoSuchField,
            format!("{}.{}", external_name(&class), nat.name),
        );
    };
    check_member_access(current, &field.class(), field.access_flags(), || {
        format!("field {}.{}", external_name(&field.class()), field.name())
    })?;
    pool.cache(index, Resolved::Field(field.clone()));
    Ok(field)
}

pub(crate) fn resolve_method_ref(
    jvm: &Jvm,
    current: &Arc<Class>,
    index: u16,
) -> JVMResult<MethodRef> {
    let pool = &current.const_pool;
    let member = pool.get_member_ref(index)?;
    let interface = match member.kind {
        MemberKind::Method => false,
        MemberKind::InterfaceMethod => true,
        MemberKind::Field => return Err(FatalError::BadConstant(index).into()),
    };
    let class = resolve_class_ref(jvm, current, member.class_index)?;

    let method = match pool.cached(index) {
        Some(Resolved::Method(method)) => method.clone(),
        _ => {
            let nat = MethodNaT::parse(member.name, member.descriptor)?;
            let method = if interface {
                resolve_interface_method(jvm, &class, &nat)?
            } else {
                resolve_method(&class, &nat)?
            };
            check_member_access(current, &method.class(), method.access_flags(), || {
                format!("method {:?}", method)
            })?;
            pool.cache(index, Resolved::Method(method.clone()));
            method
        }
    };

    let descriptor = if method.is_signature_polymorphic() {
        MethodDescriptor::parse(member.descriptor)?
    } else {
        method.nat.typ.clone()
    };
    Ok(MethodRef {
        class,
        method,
        descriptor,
        interface,
    })
}

fn no_such_method<T>(class: &Class, nat: &MethodNaT) -> JVMResult<T> {
    raise(
        ExceptionKind::NoSuchMethod,
        format!(
            "'{}' in {}",
            MethodDisplay(nat),
            external_name(class)
        ),
    )
}

struct MethodDisplay<'a>(&'a MethodNaT);

impl std::fmt::Display for MethodDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.0.name, self.0.typ.descriptor())
    }
}

/// Method resolution in a class (JVMS 5.4.3.3)
pub fn resolve_method(class: &Arc<Class>, nat: &MethodNaT) -> JVMResult<Arc<Method>> {
    if class.is_interface() {
        return raise(
            ExceptionKind::IncompatibleClassChange,
            format!("Found interface {}, but class was expected", external_name(class)),
        );
    }
    if let Some(method) = lookup_in_superclasses(class, nat) {
        return Ok(method);
    }
    let candidates = maximally_specific(class, nat);
    let concrete = candidates
        .iter()
        .filter(|m| !m.is_abstract())
        .collect::<Vec<_>>();
    if let [method] = concrete[..] {
        return Ok(method.clone());
    }
    // any superinterface method will do
    match candidates.into_iter().next() {
        Some(method) => Ok(method),
        None => no_such_method(class, nat),
    }
}

/// Method resolution in an interface (JVMS 5.4.3.4)
pub(crate) fn resolve_interface_method(
    jvm: &Jvm,
    class: &Arc<Class>,
    nat: &MethodNaT,
) -> JVMResult<Arc<Method>> {
    if !class.is_interface() {
        return raise(
            ExceptionKind::IncompatibleClassChange,
            format!("Found class {}, but interface was expected", external_name(class)),
        );
    }
    if let Some(method) = class.declared_method(nat) {
        return Ok(method.clone());
    }
    let object = jvm.resolve_class("java/lang/Object")?;
    if let Some(method) = object.declared_method(nat) {
        if method.access_flags().contains(AccessFlags::PUBLIC) && !method.is_static() {
            return Ok(method.clone());
        }
    }
    let candidates = maximally_specific(class, nat);
    let concrete = candidates
        .iter()
        .filter(|m| !m.is_abstract())
        .collect::<Vec<_>>();
    if let [method] = concrete[..] {
        return Ok(method.clone());
    }
    match candidates.into_iter().next() {
        Some(method) => Ok(method),
        None => no_such_method(class, nat),
    }
}

/// Declared method of the class or its nearest superclass. For `MethodHandle` and `VarHandle`,
/// a single signature polymorphic method of the same name matches any descriptor.
fn lookup_in_superclasses(class: &Arc<Class>, nat: &MethodNaT) -> Option<Arc<Method>> {
    let mut current = Some(class);
    while let Some(class) = current {
        if let Some(method) = class.declared_method(nat) {
            return Some(method.clone());
        }
        let mut polymorphic = class
            .methods()
            .filter(|m| m.nat.name == nat.name && m.is_signature_polymorphic());
        if let (Some(method), None) = (polymorphic.next(), polymorphic.next()) {
            return Some(method.clone());
        }
        current = class.super_class.as_ref();
    }
    None
}

/// All interfaces a class implements, directly or through its superclasses and superinterfaces
pub(crate) fn all_superinterfaces(class: &Arc<Class>) -> Vec<Arc<Class>> {
    fn collect(class: &Arc<Class>, into: &mut Vec<Arc<Class>>) {
        for interface in &class.interfaces {
            if !into.iter().any(|known| Arc::ptr_eq(known, interface)) {
                into.push(interface.clone());
                collect(interface, into);
            }
        }
        if let Some(super_class) = &class.super_class {
            collect(super_class, into);
        }
    }
    let mut interfaces = Vec::new();
    collect(class, &mut interfaces);
    interfaces
}

/// Maximally-specific superinterface methods (JVMS 5.4.3.3): non-private, non-static methods
/// declared in a superinterface for which no subinterface declares the same method
pub(crate) fn maximally_specific(class: &Arc<Class>, nat: &MethodNaT) -> Vec<Arc<Method>> {
    let candidates = all_superinterfaces(class)
        .into_iter()
        .filter_map(|interface| interface.declared_method(nat).cloned())
        .filter(|m| !m.is_private() && !m.is_static())
        .collect::<Vec<_>>();
    candidates
        .iter()
        .filter(|m| {
            let declaring = m.class();
            !candidates.iter().any(|other| {
                let other = other.class();
                !Arc::ptr_eq(&other, &declaring) && other.is_subclass_of(&declaring)
            })
        })
        .cloned()
        .collect()
}

/// Whether `method` (declared in some class) overrides `resolved` (JVMS 5.4.5)
fn overrides(method: &Method, resolved: &Method) -> bool {
    if method.is_private() || method.is_static() {
        return false;
    }
    let flags = resolved.access_flags();
    flags.intersects(AccessFlags::PUBLIC | AccessFlags::PROTECTED)
        || method.class().same_package(&resolved.class())
}

/// Picks the method a default method search settles on, or the matching fault
fn select_from_interfaces(
    receiver: &Arc<Class>,
    resolved: &Method,
    found_abstract: bool,
) -> JVMResult<Arc<Method>> {
    let candidates = maximally_specific(receiver, &resolved.nat);
    let concrete = candidates
        .iter()
        .filter(|m| !m.is_abstract())
        .collect::<Vec<_>>();
    match concrete[..] {
        [method] => Ok(method.clone()),
        [] if candidates.is_empty() && !found_abstract => no_such_method(receiver, &resolved.nat),
        [] => raise(
            ExceptionKind::AbstractMethod,
            format!(
                "Receiver class {} does not define or inherit an implementation of the resolved method '{}'",
                external_name(receiver),
                MethodDisplay(&resolved.nat)
            ),
        ),
        _ => raise(
            ExceptionKind::IncompatibleClassChange,
            format!(
                "Conflicting default methods: {}",
                concrete
                    .iter()
                    .map(|m| format!("{:?}", m))
                    .collect::<Vec<_>>()
                    .join(" ")
            ),
        ),
    }
}

fn abstract_method<T>(receiver: &Class, method: &Method) -> JVMResult<T> {
    raise(
        ExceptionKind::AbstractMethod,
        format!(
            "Receiver class {} does not define or inherit an implementation of the resolved method 'abstract {}' of {}",
            external_name(receiver),
            MethodDisplay(&method.nat),
            external_name(&method.class())
        ),
    )
}

/// Selection for invokevirtual and invokeinterface (JVMS 5.4.6):
/// the first override found walking up from the receiver's class, else a unique default method
pub fn select_virtual(receiver: &Arc<Class>, resolved: &Arc<Method>) -> JVMResult<Arc<Method>> {
    if resolved.is_private() {
        return Ok(resolved.clone());
    }
    let mut current = Some(receiver);
    while let Some(class) = current {
        if let Some(method) = class.declared_method(&resolved.nat) {
            if Arc::ptr_eq(method, resolved) || overrides(method, resolved) {
                if method.is_abstract() {
                    return abstract_method(receiver, method);
                }
                return Ok(method.clone());
            }
        }
        current = class.super_class.as_ref();
    }
    select_from_interfaces(receiver, resolved, resolved.is_abstract())
}

/// Selection for invokespecial. With `ACC_SUPER`, calls to a superclass method of the
/// current class start the search at the direct superclass of the current class.
pub fn select_special(
    jvm: &Jvm,
    current: &Arc<Class>,
    symbolic: &Arc<Class>,
    resolved: &Arc<Method>,
) -> JVMResult<Arc<Method>> {
    let start = match &current.super_class {
        Some(super_class)
            if !resolved.is_initializer()
                && !symbolic.is_interface()
                && symbolic.is_superclass_of(current)
                && current.access_flags.contains(AccessFlags::SUPER) =>
        {
            super_class.clone()
        }
        _ => symbolic.clone(),
    };

    let selected = if let Some(method) = start.declared_method(&resolved.nat) {
        Some(method.clone())
    } else if !start.is_interface() {
        start
            .super_class
            .as_ref()
            .and_then(|s| lookup_in_superclasses(s, &resolved.nat))
    } else {
        let object = jvm.resolve_class("java/lang/Object")?;
        object
            .declared_method(&resolved.nat)
            .filter(|m| m.access_flags().contains(AccessFlags::PUBLIC) && !m.is_static())
            .cloned()
    };

    match selected {
        Some(method) if method.is_abstract() => abstract_method(&start, &method),
        Some(method) => Ok(method),
        None => select_from_interfaces(&start, resolved, true),
    }
}

/// Member access check (JVMS 5.4.4). `declaring` is the class that declares the member.
pub(crate) fn check_member_access(
    current: &Arc<Class>,
    declaring: &Arc<Class>,
    flags: AccessFlags,
    describe: impl FnOnce() -> String,
) -> JVMResult<()> {
    let accessible = if flags.contains(AccessFlags::PUBLIC) {
        true
    } else if flags.contains(AccessFlags::PRIVATE) {
        Arc::ptr_eq(current, declaring)
    } else if flags.contains(AccessFlags::PROTECTED) {
        current.same_package(declaring) || current.is_subclass_of(declaring)
    } else {
        current.same_package(declaring)
    };
    if accessible {
        Ok(())
    } else {
        Err(Fault::new(
            ExceptionKind::IllegalAccess,
            format!(
                "class {} tried to access {}",
                external_name(current),
                describe()
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClassBuilder, MemoryClassLoader};

    fn jvm(classes: Vec<crate::ClassDef>) -> Jvm {
        Jvm::new(MemoryClassLoader::new_boxed(classes))
    }

    fn nat(name: &str, descriptor: &str) -> MethodNaT {
        MethodNaT::parse(name, descriptor).unwrap()
    }

    #[test]
    fn superinterfaces_are_collected_once() {
        let jvm = jvm(vec![
            ClassBuilder::interface("A").build(),
            ClassBuilder::interface("B").implements("A").build(),
            ClassBuilder::new("C").implements("A").implements("B").build(),
        ]);
        let class = jvm.resolve_class("C").unwrap();
        let names = all_superinterfaces(&class)
            .iter()
            .map(|i| i.name().to_owned())
            .collect::<Vec<_>>();
        assert_eq!(names, ["A", "B"]);
    }

    #[test]
    fn subinterface_default_is_more_specific() {
        let code = || crate::Code::new(0, 1, vec![crate::instructions::RETURN]);
        let jvm = jvm(vec![
            ClassBuilder::interface("A")
                .method("m", "()V", AccessFlags::PUBLIC, code())
                .build(),
            ClassBuilder::interface("B")
                .implements("A")
                .method("m", "()V", AccessFlags::PUBLIC, code())
                .build(),
            ClassBuilder::new("C").implements("A").implements("B").build(),
        ]);
        let class = jvm.resolve_class("C").unwrap();
        let selected = maximally_specific(&class, &nat("m", "()V"));
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].class().name(), "B");
    }

    #[test]
    fn resolving_a_class_method_on_an_interface_fails() {
        let jvm = jvm(vec![ClassBuilder::interface("I").build()]);
        let class = jvm.resolve_class("I").unwrap();
        let err = resolve_method(&class, &nat("m", "()V")).unwrap_err();
        assert!(matches!(
            err,
            Fault::Exception(ExceptionKind::IncompatibleClassChange, _)
        ));
    }

    #[test]
    fn private_members_need_the_same_class() {
        let jvm = jvm(vec![ClassBuilder::new("p/A").build(), ClassBuilder::new("p/B").build()]);
        let a = jvm.resolve_class("p/A").unwrap();
        let b = jvm.resolve_class("p/B").unwrap();
        assert!(check_member_access(&a, &a, AccessFlags::PRIVATE, String::new).is_ok());
        assert!(check_member_access(&b, &a, AccessFlags::PRIVATE, String::new).is_err());
        assert!(check_member_access(&b, &a, AccessFlags::empty(), String::new).is_ok());
    }
}
