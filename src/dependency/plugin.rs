//! Extension points of the dependency analysis.
//!
//! Methods without a body (native or intrinsic methods) describe their data flow
//! through a [`DependencyPlugin`] registered for their reference. Invoke-dynamic
//! call sites are rewritten into ordinary code by a [`BootstrapMethodSubstitutor`]
//! registered for their bootstrap method before the body is analyzed.

use std::{fmt, rc::Rc};

use rustc_hash::FxHashMap;

use crate::model::{
    MethodDescriptor, MethodHandle, MethodReference, ProgramEmitter, RuntimeConstant, Variable,
};

use super::{analyzer::DependencyAnalyzer, node::DependencyType};

/// Callback invoked once for every type reaching a node.
pub type TypeCallback = Rc<dyn Fn(&mut DependencyAnalyzer<'_>, DependencyType)>;

/// Describes the data flow of a method the analysis cannot look into.
pub trait DependencyPlugin {
    /// Called once when `method` is first marked as used.
    ///
    /// The plugin typically looks up the method's parameter and result nodes with
    /// [`DependencyAnalyzer::method_dependency`], then connects them, seeds types or
    /// registers callbacks.
    fn method_reached(&self, analyzer: &mut DependencyAnalyzer<'_>, method: &MethodReference);
}

impl<F> DependencyPlugin for F
where
    F: Fn(&mut DependencyAnalyzer<'_>, &MethodReference),
{
    fn method_reached(&self, analyzer: &mut DependencyAnalyzer<'_>, method: &MethodReference) {
        self(analyzer, method);
    }
}

/// Plugins keyed by the method they describe.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: FxHashMap<MethodReference, Rc<dyn DependencyPlugin>>,
}

impl PluginRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `plugin` for `method`, replacing any earlier registration.
    pub fn register(&mut self, method: MethodReference, plugin: impl DependencyPlugin + 'static) {
        self.plugins.insert(method, Rc::new(plugin));
    }

    /// Returns the plugin registered for `method`.
    #[must_use]
    pub fn get(&self, method: &MethodReference) -> Option<Rc<dyn DependencyPlugin>> {
        self.plugins.get(method).cloned()
    }

    /// Number of registered plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.plugins.keys()).finish()
    }
}

/// An invoke-dynamic call site handed to a substitutor.
#[derive(Debug, Clone)]
pub struct DynamicCallSite {
    /// The method containing the call site
    pub caller: MethodReference,
    /// Signature of the call site
    pub method: MethodDescriptor,
    /// Receiver argument for instance call sites
    pub instance: Option<Variable>,
    /// Actual arguments
    pub arguments: Vec<Variable>,
    /// The bootstrap method
    pub bootstrap: MethodHandle,
    /// Static arguments of the bootstrap method
    pub bootstrap_arguments: Vec<RuntimeConstant>,
}

/// Replaces invoke-dynamic call sites with ordinary code.
pub trait BootstrapMethodSubstitutor {
    /// Emits the replacement for `site` at the cursor of `emitter` and returns the
    /// variable holding the call site's value, if it produces one.
    ///
    /// The emitter is positioned in the block that contained the call site, with
    /// the code following the call site already moved to another block.
    fn substitute(&self, site: &DynamicCallSite, emitter: &mut ProgramEmitter<'_>) -> Option<Variable>;
}

impl<F> BootstrapMethodSubstitutor for F
where
    F: Fn(&DynamicCallSite, &mut ProgramEmitter<'_>) -> Option<Variable>,
{
    fn substitute(&self, site: &DynamicCallSite, emitter: &mut ProgramEmitter<'_>) -> Option<Variable> {
        self(site, emitter)
    }
}

/// Substitutors keyed by bootstrap method.
#[derive(Clone, Default)]
pub struct BootstrapRegistry {
    substitutors: FxHashMap<MethodReference, Rc<dyn BootstrapMethodSubstitutor>>,
}

impl BootstrapRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `substitutor` for call sites bootstrapped by `bootstrap`.
    pub fn register(
        &mut self,
        bootstrap: MethodReference,
        substitutor: impl BootstrapMethodSubstitutor + 'static,
    ) {
        self.substitutors.insert(bootstrap, Rc::new(substitutor));
    }

    /// Returns the substitutor for `bootstrap`.
    #[must_use]
    pub fn get(&self, bootstrap: &MethodReference) -> Option<Rc<dyn BootstrapMethodSubstitutor>> {
        self.substitutors.get(bootstrap).cloned()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.substitutors.is_empty()
    }
}

impl fmt::Debug for BootstrapRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.substitutors.keys()).finish()
    }
}
