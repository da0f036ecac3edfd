//! The runtime context: process-wide state shared by routers.
//!
//! Routers are transient — a hot-swap replaces one with another — but two
//! things outlive any single router: the element-class registry the
//! configuration language resolves against, and the global handler set
//! (handlers addressed as `.name`, with indices at or above
//! [`crate::handler::FIRST_GLOBAL_HANDLER`]). Both live here, on an
//! explicit context passed to every router, rather than in process
//! globals. The global handler set takes concurrent reads; controller
//! threads may consult it while a driver runs.

use crate::error::ErrorHandler;
use crate::handler::HandlerInfo;
use crate::registry::ElementRegistry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub type GlobalReadHandler = fn(&Runtime, &HandlerInfo<'_>) -> String;

pub type GlobalWriteHandler =
    fn(&str, &Runtime, &HandlerInfo<'_>, &mut dyn ErrorHandler) -> Result<(), ()>;

/// A handler in the global set. Unlike element handlers, global handlers
/// are invoked against the runtime itself.
#[derive(Clone)]
pub struct GlobalHandler {
    name: String,
    flags: u32,
    read: Option<GlobalReadHandler>,
    write: Option<GlobalWriteHandler>,
}

impl GlobalHandler {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }
}

/// Process-wide state: the element registry, the global handler set, and
/// the set of provided package requirements.
pub struct Runtime {
    registry: ElementRegistry,
    global_slots: DashMap<usize, GlobalHandler>,
    global_by_name: DashMap<String, usize>,
    next_global: AtomicUsize,
    provisions: DashMap<String, ()>,
}

impl Runtime {
    pub fn new(registry: ElementRegistry) -> Arc<Runtime> {
        Arc::new(Runtime {
            registry,
            global_slots: DashMap::new(),
            global_by_name: DashMap::new(),
            next_global: AtomicUsize::new(0),
            provisions: DashMap::new(),
        })
    }

    /// A runtime with every built-in element class registered.
    pub fn with_default_registry() -> Arc<Runtime> {
        Runtime::new(crate::registry::default_registry())
    }

    pub fn registry(&self) -> &ElementRegistry {
        &self.registry
    }

    /// Declares that `package` is available to `require()` statements.
    pub fn provide(&self, package: &str) {
        self.provisions.insert(package.to_string(), ());
    }

    pub fn provides(&self, package: &str) -> bool {
        self.provisions.contains_key(package)
    }

    // --- global handlers -------------------------------------------------

    pub fn add_global_read(&self, name: &str, cb: GlobalReadHandler) {
        self.upsert_global(name, |h| {
            h.read = Some(cb);
            h.flags |= crate::handler::flags::READ;
        });
    }

    pub fn add_global_write(&self, name: &str, cb: GlobalWriteHandler) {
        self.upsert_global(name, |h| {
            h.write = Some(cb);
            h.flags |= crate::handler::flags::WRITE;
        });
    }

    fn upsert_global(&self, name: &str, edit: impl FnOnce(&mut GlobalHandler)) {
        let index = match self.global_by_name.get(name) {
            Some(i) => *i,
            None => {
                let i = self.next_global.fetch_add(1, Ordering::Relaxed);
                self.global_by_name.insert(name.to_string(), i);
                self.global_slots.insert(
                    i,
                    GlobalHandler { name: name.to_string(), flags: 0, read: None, write: None },
                );
                i
            }
        };
        if let Some(mut slot) = self.global_slots.get_mut(&index) {
            edit(&mut slot);
        }
    }

    /// Index of a global handler, relative to the global table.
    pub fn find_global_handler(&self, name: &str) -> Option<usize> {
        self.global_by_name.get(name).map(|i| *i)
    }

    pub fn global_handler(&self, index: usize) -> Option<GlobalHandler> {
        self.global_slots.get(&index).map(|h| h.clone())
    }

    pub fn global_read(&self, name: &str, param: &str) -> Option<String> {
        let index = self.find_global_handler(name)?;
        let h = self.global_handler(index)?;
        let read = h.read?;
        let info = HandlerInfo { name: &h.name, user: 0, param };
        Some(read(self, &info))
    }

    /// `None` when no such handler exists; otherwise the write result.
    pub fn global_write(
        &self,
        name: &str,
        value: &str,
        errh: &mut dyn ErrorHandler,
    ) -> Option<Result<(), ()>> {
        let index = self.find_global_handler(name)?;
        let h = self.global_handler(index)?;
        let write = h.write?;
        let info = HandlerInfo { name: &h.name, user: 0, param: "" };
        Some(write(value, self, &info, errh))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ElementRegistry;

    fn version_read(_rt: &Runtime, _i: &HandlerInfo<'_>) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    #[test]
    fn global_handlers_register_and_read() {
        let rt = Runtime::new(ElementRegistry::new());
        rt.add_global_read("version", version_read);
        assert_eq!(rt.global_read("version", ""), Some(env!("CARGO_PKG_VERSION").to_string()));
        assert_eq!(rt.global_read("missing", ""), None);
    }

    #[test]
    fn provisions_satisfy_requirements() {
        let rt = Runtime::new(ElementRegistry::new());
        assert!(!rt.provides("grid"));
        rt.provide("grid");
        assert!(rt.provides("grid"));
    }
}
