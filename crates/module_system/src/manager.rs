//! Module manager implementation for loading and managing dynamic modules.

use crate::error::ModuleSystemError;
use crate::instance::ModuleInstance;
use crate::paths::{is_valid_module_name, module_library_path, ModuleRoots};
use conduit_event_system::{Module, ModuleContext, ModuleFactory, MODULE_FACTORY_SYMBOL};
use libloading::{Library, Symbol};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Registry of loaded modules keyed by name.
///
/// The `ModuleManagement` handles the complete lifecycle of modules:
/// - Resolution of a module name to a library under the core or project root
/// - Mapping the library and constructing the module through its factory
/// - Identity validation and instantiation
/// - Removal of the module's event registrations before its code is unmapped
///
/// Module roots are read from the runtime settings on every load, so changing
/// `core_root` or `project_root` at run time affects subsequent loads.
pub struct ModuleManagement {
    context: ModuleContext,
    modules: HashMap<String, ModuleInstance>,
    /// Names in load order, used to unload in reverse
    load_order: Vec<String>,
}

impl ModuleManagement {
    /// Creates an empty registry whose modules receive `context` on instantiation.
    pub fn new(context: ModuleContext) -> Self {
        Self {
            context,
            modules: HashMap::new(),
            load_order: Vec::new(),
        }
    }

    pub fn context(&self) -> &ModuleContext {
        &self.context
    }

    /// The current search roots.
    pub fn roots(&self) -> ModuleRoots {
        ModuleRoots::from_settings(&self.context.settings())
    }

    /// Returns the root that holds `name`, core first.
    pub fn determine_module_root(&self, name: &str) -> Option<PathBuf> {
        self.roots().determine_module_root(name)
    }

    /// Loads and instantiates the module named `name`.
    ///
    /// # Errors
    ///
    /// * `NotFound` - the name is not a plain file stem, or no root contains
    ///   `modules/src/<name>.so`
    /// * `AlreadyLoaded` - a module with that name is registered
    /// * `LoadError` - the dynamic loader refused the library
    /// * `SymbolError` - the library does not export `create_module`
    /// * `LogicError` - the factory returned nothing, the module reported a
    ///   different name, or its instantiation failed
    ///
    /// On any error nothing stays registered.
    pub fn load_module(&mut self, name: &str) -> Result<(), ModuleSystemError> {
        if !is_valid_module_name(name) {
            warn!("⚠️ Refusing to load module with invalid name '{}'", name);
            return Err(ModuleSystemError::NotFound(name.to_string()));
        }

        let root = self
            .determine_module_root(name)
            .ok_or_else(|| ModuleSystemError::NotFound(name.to_string()))?;

        if self.modules.contains_key(name) {
            return Err(ModuleSystemError::AlreadyLoaded(name.to_string()));
        }

        let path = module_library_path(&root, name);
        info!("🔄 Loading module '{}' from: {}", name, path.display());

        let library = unsafe {
            Library::new(&path).map_err(|e| {
                ModuleSystemError::LoadError(format!("Failed to load {}: {}", path.display(), e))
            })?
        };

        let factory: ModuleFactory = unsafe {
            let symbol: Symbol<ModuleFactory> = library.get(MODULE_FACTORY_SYMBOL).map_err(|e| {
                ModuleSystemError::SymbolError(format!(
                    "{} does not export 'create_module': {}",
                    path.display(),
                    e
                ))
            })?;
            *symbol
        };

        self.register_instance(name, Arc::new(library), factory)
    }

    /// Constructs, validates, registers and instantiates a module from `factory`.
    fn register_instance(
        &mut self,
        name: &str,
        library: Arc<Library>,
        factory: ModuleFactory,
    ) -> Result<(), ModuleSystemError> {
        if self.modules.contains_key(name) {
            return Err(ModuleSystemError::AlreadyLoaded(name.to_string()));
        }

        let module_ptr = unsafe { factory() };
        if module_ptr.is_null() {
            return Err(ModuleSystemError::LogicError(format!(
                "Factory of '{name}' returned no module"
            )));
        }
        let module: Box<dyn Module> = unsafe { Box::from_raw(module_ptr) };

        if module.name() != name {
            let reported = module.name().to_string();
            drop(module);
            drop(library);
            return Err(ModuleSystemError::LogicError(format!(
                "Module reported name '{reported}', expected '{name}'"
            )));
        }

        self.modules
            .insert(name.to_string(), ModuleInstance::new(module, library));
        self.load_order.push(name.to_string());

        let outcome = match self.modules.get_mut(name).and_then(|i| i.module_mut()) {
            Some(module) => module.instantiate(&self.context),
            None => Ok(()),
        };

        if let Err(e) = outcome {
            error!("❌ Module '{}' failed to instantiate: {}", name, e);
            self.unload_module(name);
            return Err(ModuleSystemError::LogicError(format!(
                "Module '{name}' failed to instantiate: {e}"
            )));
        }

        info!("✅ Module '{}' loaded", name);
        Ok(())
    }

    /// Unloads `name`, removing its handlers, preprocessors and events first.
    ///
    /// Returns whether the module was loaded.
    pub fn unload_module(&mut self, name: &str) -> bool {
        if !self.modules.contains_key(name) {
            debug!("Cannot unload '{}': not loaded", name);
            return false;
        }

        let events = self.context.events();
        events.unregister_module(name);
        events.unregister_events(name);

        self.load_order.retain(|loaded| loaded != name);
        // Drops the module before its library handle.
        drop(self.modules.remove(name));
        info!("🛑 Module '{}' unloaded", name);
        true
    }

    /// Unloads then loads `name`.
    ///
    /// Returns `Ok(false)` without loading anything if `name` was not loaded.
    pub fn reload_module(&mut self, name: &str) -> Result<bool, ModuleSystemError> {
        if !self.unload_module(name) {
            warn!("Reload of '{}' skipped: module is not loaded", name);
            return Ok(false);
        }
        self.load_module(name)?;
        Ok(true)
    }

    /// Unloads every module, most recently loaded first.
    pub fn unload_all(&mut self) -> usize {
        let names: Vec<String> = self.load_order.iter().rev().cloned().collect();
        if !names.is_empty() {
            info!("🛑 Unloading {} module(s)", names.len());
        }
        names.iter().filter(|name| self.unload_module(name)).count()
    }

    pub fn get_module_by_name(&self, name: &str) -> Option<&dyn Module> {
        self.modules.get(name).and_then(|instance| instance.module())
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Loaded module names in load order.
    pub fn module_names(&self) -> Vec<String> {
        self.load_order.clone()
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }
}

impl std::fmt::Debug for ModuleManagement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleManagement")
            .field("modules", &self.load_order)
            .finish()
    }
}

impl Drop for ModuleManagement {
    fn drop(&mut self) {
        self.unload_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::module_library_path;
    use conduit_event_system::{
        CommandQueue, EventHandling, ModuleError, RuntimeSettings, ShutdownState, CORE_ROOT_KEY,
        PROJECT_ROOT_KEY,
    };
    use std::fs;
    use tempfile::TempDir;

    /// Registers a handler on `chat.message` and owns `greeter.hello`.
    struct Greeter {
        settings: Option<Arc<RuntimeSettings>>,
    }

    impl Module for Greeter {
        fn name(&self) -> &str {
            "greeter"
        }

        fn instantiate(&mut self, context: &ModuleContext) -> Result<(), ModuleError> {
            let events = context.events();
            events.create_event("greeter.hello", "greeter");
            if !events.register_for_event("chat.message", "greeter", |_, _| {}, 0) {
                return Err(ModuleError::Registration("chat.message is missing".into()));
            }
            self.settings = Some(context.settings());
            Ok(())
        }

        fn shutdown(&mut self) {
            if let Some(settings) = &self.settings {
                settings.set("greeter.shutdown", "true");
            }
        }
    }

    /// Registers a preprocessor and then reports failure.
    struct Faulty;

    impl Module for Faulty {
        fn name(&self) -> &str {
            "faulty"
        }

        fn instantiate(&mut self, context: &ModuleContext) -> Result<(), ModuleError> {
            context
                .events()
                .register_preprocessor_for_event("chat.message", "faulty", |_| false, 0);
            Err(ModuleError::InitializationFailed("database unreachable".into()))
        }
    }

    #[allow(improper_ctypes_definitions)]
    extern "C" fn greeter_factory() -> *mut dyn Module {
        Box::into_raw(Box::new(Greeter { settings: None }) as Box<dyn Module>)
    }

    #[allow(improper_ctypes_definitions)]
    extern "C" fn faulty_factory() -> *mut dyn Module {
        Box::into_raw(Box::new(Faulty) as Box<dyn Module>)
    }

    #[allow(improper_ctypes_definitions)]
    extern "C" fn null_factory() -> *mut dyn Module {
        std::ptr::null_mut::<Faulty>() as *mut dyn Module
    }

    fn this_library() -> Arc<Library> {
        Arc::new(Library::from(libloading::os::unix::Library::this()))
    }

    fn manager() -> (ModuleManagement, Arc<EventHandling>, Arc<RuntimeSettings>) {
        let events = Arc::new(EventHandling::new());
        events.create_event("chat.message", "chat");
        let settings = Arc::new(RuntimeSettings::new());
        let context = ModuleContext::new(
            events.clone(),
            settings.clone(),
            ShutdownState::new(),
            CommandQueue::new(),
        );
        (ModuleManagement::new(context), events, settings)
    }

    #[test]
    fn test_register_and_unload_module() {
        let (mut modules, events, settings) = manager();

        modules
            .register_instance("greeter", this_library(), greeter_factory)
            .unwrap();
        assert!(modules.is_loaded("greeter"));
        assert_eq!(modules.get_module_by_name("greeter").map(|m| m.name()), Some("greeter"));
        assert_eq!(events.handler_count("chat.message"), Some(1));
        assert!(events.has_event("greeter.hello"));

        assert!(modules.unload_module("greeter"));
        assert!(!modules.is_loaded("greeter"));
        assert!(modules.get_module_by_name("greeter").is_none());
        assert_eq!(events.handler_count("chat.message"), Some(0));
        assert!(!events.has_event("greeter.hello"));
        assert!(events.has_event("chat.message"));
        assert_eq!(settings.get("greeter.shutdown").as_deref(), Some("true"));

        assert!(!modules.unload_module("greeter"));
    }

    #[test]
    fn test_double_load_is_rejected() {
        let (mut modules, events, _) = manager();
        modules
            .register_instance("greeter", this_library(), greeter_factory)
            .unwrap();

        let result = modules.register_instance("greeter", this_library(), greeter_factory);
        assert!(matches!(result, Err(ModuleSystemError::AlreadyLoaded(name)) if name == "greeter"));
        assert_eq!(modules.module_count(), 1);
        assert_eq!(events.handler_count("chat.message"), Some(1));
    }

    #[test]
    fn test_name_mismatch_leaves_nothing_registered() {
        let (mut modules, events, _) = manager();
        let result = modules.register_instance("chat", this_library(), greeter_factory);

        assert!(matches!(result, Err(ModuleSystemError::LogicError(_))));
        assert_eq!(modules.module_count(), 0);
        assert!(!events.has_event("greeter.hello"));
        assert_eq!(events.handler_count("chat.message"), Some(0));
    }

    #[test]
    fn test_null_factory_is_a_logic_error() {
        let (mut modules, _, _) = manager();
        let result = modules.register_instance("faulty", this_library(), null_factory);
        assert!(matches!(result, Err(ModuleSystemError::LogicError(_))));
        assert_eq!(modules.module_count(), 0);
    }

    #[test]
    fn test_failed_instantiation_unloads_synchronously() {
        let (mut modules, events, _) = manager();
        let result = modules.register_instance("faulty", this_library(), faulty_factory);

        match result {
            Err(ModuleSystemError::LogicError(message)) => {
                assert!(message.contains("database unreachable"));
            }
            other => panic!("expected LogicError, got {other:?}"),
        }
        assert!(!modules.is_loaded("faulty"));
        assert_eq!(events.preprocessor_count("chat.message"), Some(0));
        assert!(modules.module_names().is_empty());
    }

    #[test]
    fn test_reload_requires_loaded_module() {
        let (mut modules, _, _) = manager();
        assert!(!modules.reload_module("greeter").unwrap());
        assert!(!modules.is_loaded("greeter"));
    }

    #[test]
    fn test_reload_of_loaded_module_propagates_load_error() {
        let (mut modules, events, _) = manager();
        modules
            .register_instance("greeter", this_library(), greeter_factory)
            .unwrap();

        // No root holds greeter.so, so the reload unloads and then fails to find it.
        let result = modules.reload_module("greeter");
        assert!(matches!(result, Err(ModuleSystemError::NotFound(_))));
        assert!(!modules.is_loaded("greeter"));
        assert_eq!(events.handler_count("chat.message"), Some(0));
    }

    #[test]
    fn test_unload_all_reverses_load_order() {
        let (mut modules, events, _) = manager();
        modules
            .register_instance("greeter", this_library(), greeter_factory)
            .unwrap();
        assert_eq!(modules.module_names(), vec!["greeter".to_string()]);

        assert_eq!(modules.unload_all(), 1);
        assert_eq!(modules.module_count(), 0);
        assert_eq!(events.handler_count("chat.message"), Some(0));
        assert_eq!(modules.unload_all(), 0);
    }

    #[test]
    fn test_load_unknown_module_is_not_found() {
        let (mut modules, _, settings) = manager();
        let core = TempDir::new().unwrap();
        settings.set(CORE_ROOT_KEY, core.path().to_string_lossy());

        let result = modules.load_module("missing");
        assert!(matches!(result, Err(ModuleSystemError::NotFound(name)) if name == "missing"));
    }

    #[test]
    fn test_load_invalid_library_is_a_load_error() {
        let (mut modules, _, settings) = manager();
        let project = TempDir::new().unwrap();
        let path = module_library_path(project.path(), "broken");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"this is not an ELF file").unwrap();
        settings.set(PROJECT_ROOT_KEY, project.path().to_string_lossy());

        assert_eq!(modules.determine_module_root("broken").as_deref(), Some(project.path()));
        let result = modules.load_module("broken");
        assert!(matches!(result, Err(ModuleSystemError::LoadError(_))));
        assert_eq!(modules.module_count(), 0);
    }

    /// A real shared object that exports no `create_module`.
    fn plain_shared_object() -> Option<std::path::PathBuf> {
        let candidates = [
            "/lib/x86_64-linux-gnu/libm.so.6",
            "/usr/lib/x86_64-linux-gnu/libm.so.6",
            "/lib/aarch64-linux-gnu/libm.so.6",
            "/usr/lib/aarch64-linux-gnu/libm.so.6",
            "/lib64/libm.so.6",
            "/usr/lib64/libm.so.6",
            "/usr/lib/libm.so.6",
            "/lib/libm.so.6",
        ];
        if let Some(found) = candidates.iter().map(std::path::PathBuf::from).find(|p| p.is_file()) {
            return Some(found);
        }
        // Fall back to whatever libm or libgcc_s this process has mapped.
        let maps = fs::read_to_string("/proc/self/maps").ok()?;
        maps.lines()
            .filter_map(|line| line.split_whitespace().nth(5))
            .find(|path| path.contains("/libm.so") || path.contains("/libgcc_s.so"))
            .map(std::path::PathBuf::from)
    }

    #[test]
    fn test_library_without_factory_is_a_symbol_error() {
        let Some(source) = plain_shared_object() else {
            eprintln!("no system shared object available to copy");
            return;
        };
        let (mut modules, events, settings) = manager();
        let core = TempDir::new().unwrap();
        let path = module_library_path(core.path(), "plain");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::copy(&source, &path).unwrap();
        settings.set(CORE_ROOT_KEY, core.path().to_string_lossy());

        let result = modules.load_module("plain");
        assert!(matches!(result, Err(ModuleSystemError::SymbolError(message)) if message.contains("create_module")));
        assert!(!modules.is_loaded("plain"));
        assert_eq!(modules.module_count(), 0);
        assert_eq!(events.event_names(), vec!["chat.message".to_string()]);
    }

    #[test]
    fn test_load_module_refuses_a_loaded_name_before_mapping() {
        let (mut modules, events, settings) = manager();
        modules
            .register_instance("greeter", this_library(), greeter_factory)
            .unwrap();

        // A library file exists, so only the registry check can refuse it.
        let core = TempDir::new().unwrap();
        let path = module_library_path(core.path(), "greeter");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"never mapped").unwrap();
        settings.set(CORE_ROOT_KEY, core.path().to_string_lossy());

        let result = modules.load_module("greeter");
        assert!(matches!(result, Err(ModuleSystemError::AlreadyLoaded(name)) if name == "greeter"));
        assert_eq!(modules.module_count(), 1);
        assert_eq!(events.handler_count("chat.message"), Some(1));
    }

    #[test]
    fn test_load_module_rejects_path_like_names() {
        let (mut modules, _, settings) = manager();
        let core = TempDir::new().unwrap();
        fs::create_dir_all(core.path().join("modules/src")).unwrap();
        fs::write(core.path().join("modules/escape.so"), b"outside the module dir").unwrap();
        settings.set(CORE_ROOT_KEY, core.path().to_string_lossy());

        for name in ["../escape", "", "..", "a/b"] {
            let result = modules.load_module(name);
            assert!(matches!(result, Err(ModuleSystemError::NotFound(_))), "{name:?}");
        }
        assert_eq!(modules.module_count(), 0);
    }
}
