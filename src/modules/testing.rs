//! Shared harness for module tests: a recording display plus empty dependencies and storage.

use crate::app::Logger;
use crate::config::ModuleDependencies;
use crate::display::{Display, RecordingBackend, ScreenLog};
use crate::menu::ModuleContext;
use crate::storage::PersistentStore;

pub(crate) struct Rig {
    pub display: Display,
    pub log: ScreenLog,
    pub deps: ModuleDependencies,
    pub store: PersistentStore,
    pub logger: Logger,
}

impl Rig {
    pub fn new() -> Self {
        let (backend, log) = RecordingBackend::new();
        Self {
            display: Display::new(Box::new(backend)),
            log,
            deps: ModuleDependencies::default(),
            store: PersistentStore::in_memory(Logger::silent()),
            logger: Logger::silent(),
        }
    }

    pub fn ctx(&mut self) -> ModuleContext<'_> {
        ModuleContext::new(&mut self.display, &self.deps, &mut self.store, &self.logger)
    }
}
