#![allow(dead_code)]

use jvm_exec::*;

pub fn jvm(classes: impl IntoIterator<Item = ClassDef>) -> Jvm {
    Jvm::new(MemoryClassLoader::new_boxed(classes))
}

/// Big-endian operand bytes of a constant pool index
pub fn idx(index: u16) -> [u8; 2] {
    index.to_be_bytes()
}

pub fn public_static() -> AccessFlags {
    AccessFlags::PUBLIC | AccessFlags::STATIC
}

/// Runs a static method to completion on a fresh thread
pub fn run(jvm: &Jvm, class: &str, name: &str, descriptor: &str, args: &[Value]) -> Result<Option<Value>, Error> {
    let method = jvm.resolve_method(class, name, descriptor)?;
    jvm.invoke(&method, args)
}

/// Class name of the exception that escaped, panicking on any other outcome
pub fn uncaught(result: Result<Option<Value>, Error>) -> (String, Option<String>) {
    match result {
        Err(Error::Uncaught { class, message, .. }) => (class, message),
        other => panic!("expected an uncaught exception, got {:?}", other),
    }
}
