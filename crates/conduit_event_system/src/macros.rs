//! Macros for module authors.

/// Exports the factory the module loader looks up.
///
/// The macro wraps construction in `catch_unwind` so a panicking constructor
/// yields a null module (reported by the loader as a logic error) instead of
/// unwinding across the library boundary.
///
/// ```rust,ignore
/// use conduit_event_system::{declare_module, Module, ModuleContext, ModuleError};
///
/// #[derive(Default)]
/// struct Echo;
///
/// impl Module for Echo {
///     fn name(&self) -> &str { "echo" }
///     fn instantiate(&mut self, _context: &ModuleContext) -> Result<(), ModuleError> { Ok(()) }
/// }
///
/// declare_module!(Echo);
/// ```
#[macro_export]
macro_rules! declare_module {
    ($module_type:ty) => {
        $crate::declare_module!($module_type, <$module_type as ::std::default::Default>::default());
    };
    ($module_type:ty, $constructor:expr) => {
        /// Module factory - required export for the module loader.
        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn create_module() -> *mut dyn $crate::Module {
            match ::std::panic::catch_unwind(|| {
                let module: ::std::boxed::Box<dyn $crate::Module> =
                    ::std::boxed::Box::new($constructor);
                module
            }) {
                Ok(module) => ::std::boxed::Box::into_raw(module),
                Err(_) => ::std::ptr::null_mut::<$module_type>() as *mut dyn $crate::Module,
            }
        }
    };
}
