use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::{builtins, class_def::ClassDef};

pub trait ClassLoader: Send + Sync {
    /// Get the definition of the class with the given internal name
    fn load(&self, name: &str) -> Option<ClassDef>;
}

/// Class loader serving definitions registered in memory, falling back to the
/// built-in core classes (`java/lang/Object`, `java/lang/String`, the exception hierarchy, …)
pub struct MemoryClassLoader {
    classes: RwLock<HashMap<Arc<str>, ClassDef>>,
    with_core: bool,
}

impl MemoryClassLoader {
    pub fn new() -> Self {
        Self {
            classes: Default::default(),
            with_core: true,
        }
    }

    /// Without the core classes; every class must be defined explicitly
    pub fn bare() -> Self {
        Self {
            classes: Default::default(),
            with_core: false,
        }
    }

    pub fn new_boxed(classes: impl IntoIterator<Item = ClassDef>) -> Box<dyn ClassLoader> {
        let loader = Self::new();
        for class in classes {
            loader.define(class);
        }
        Box::new(loader)
    }

    /// Adds or replaces a definition. Classes already linked by a Jvm are unaffected.
    pub fn define(&self, class: ClassDef) {
        self.classes.write().insert(class.name.clone(), class);
    }
}

impl Default for MemoryClassLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassLoader for MemoryClassLoader {
    fn load(&self, name: &str) -> Option<ClassDef> {
        if let Some(class) = self.classes.read().get(name) {
            return Some(class.clone());
        }
        if self.with_core {
            builtins::core_class(name)
        } else {
            None
        }
    }
}
