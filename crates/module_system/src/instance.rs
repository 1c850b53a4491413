//! Ownership pairing of a module object with the library it came from.

use conduit_event_system::Module;
use libloading::Library;
use std::sync::Arc;
use tracing::debug;

/// A loaded module and the library handle that keeps its code mapped.
///
/// Dropping an instance runs [`Module::shutdown`], destroys the module object
/// and only then releases the library handle.
pub struct ModuleInstance {
    module: Option<Box<dyn Module>>,
    library: Arc<Library>,
}

impl ModuleInstance {
    pub fn new(module: Box<dyn Module>, library: Arc<Library>) -> Self {
        Self {
            module: Some(module),
            library,
        }
    }

    pub fn module(&self) -> Option<&dyn Module> {
        self.module.as_deref()
    }

    pub fn module_mut(&mut self) -> Option<&mut (dyn Module + 'static)> {
        self.module.as_deref_mut()
    }

    pub fn library(&self) -> &Arc<Library> {
        &self.library
    }
}

impl std::fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleInstance")
            .field("module", &self.module.as_ref().map(|m| m.name().to_string()))
            .finish()
    }
}

impl Drop for ModuleInstance {
    fn drop(&mut self) {
        if let Some(mut module) = self.module.take() {
            let name = module.name().to_string();
            module.shutdown();
            drop(module);
            debug!("🔌 Module '{}' destroyed, releasing library", name);
        }
        // `library` is dropped after this body returns.
    }
}
