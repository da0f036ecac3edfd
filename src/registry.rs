//! The element-class registry: configuration class names mapped to
//! constructors.

use crate::element::Element;
use std::collections::HashMap;

pub type ElementConstructor = fn() -> Box<dyn Element>;

/// Name-to-constructor map the configuration language resolves element
/// classes against.
#[derive(Default)]
pub struct ElementRegistry {
    classes: HashMap<String, ElementConstructor>,
}

impl ElementRegistry {
    pub fn new() -> ElementRegistry {
        ElementRegistry::default()
    }

    /// Registers `ctor` under `name`, replacing any previous registration.
    pub fn register(&mut self, name: &str, ctor: ElementConstructor) {
        self.classes.insert(name.to_string(), ctor);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn create(&self, name: &str) -> Option<Box<dyn Element>> {
        self.classes.get(name).map(|ctor| ctor())
    }

    /// Registered class names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.classes.keys().cloned().collect();
        names.sort();
        names
    }
}

/// A registry holding every element class this crate ships.
pub fn default_registry() -> ElementRegistry {
    let mut reg = ElementRegistry::new();
    crate::elements::register_all(&mut reg);
    crate::srp::register_all(&mut reg);
    reg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_standard_elements() {
        let reg = default_registry();
        for class in ["Queue", "Counter", "Discard", "Tee", "InfiniteSource", "SrpRouteTable"] {
            assert!(reg.contains(class), "missing {class}");
        }
        let e = reg.create("Counter").unwrap();
        assert_eq!(e.class_name(), "Counter");
    }
}
