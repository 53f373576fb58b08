//! The loader context: registration, linking, evaluation and the final-exports cache.
//!
//! The loader is an explicit context object. Create one per process (or per
//! test) with [`Loader::init`], register modules, then [`Loader::load`] them.
//! [`Loader::reset`] drops every descriptor, record and cached module.

mod declarative;
mod evaluate;
mod external;
mod factory;
mod groups;

pub use external::ExternalResolver;
pub use factory::{ModuleHandle, Require};
pub use groups::LinkPlan;

use crate::config::{ExternalPolicy, LoaderConfig};
use crate::error::{LoadError, Result};
use crate::events::{EventSink, TracingEventSink};
use crate::namespace::{es_module_view, is_module_namespace, unwrap_default, wrap_default};
use crate::record::ModuleRecord;
use crate::registry::{
    normalize_dependencies, validate_name, Discipline, Initializer, ModuleEntry, ModuleKind,
    Registration, Registry,
};
use crate::value::{Table, Value};
use rustc_hash::FxHashMap;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, debug_span, info};

pub struct Loader {
    config: Arc<LoaderConfig>,
    events: Arc<dyn EventSink>,
    resolver: Option<Box<dyn ExternalResolver>>,
    registry: Registry,
    /// Declarative records by name; kept after loading so live bindings stay connected
    records: FxHashMap<String, Rc<ModuleRecord>>,
    /// Final exports of loaded modules and host-provided externals
    modules: FxHashMap<String, Table>,
    /// Factory bodies currently on the call stack
    running_factories: usize,
}

impl Loader {
    /// Create a loader with the default configuration
    pub fn init() -> Self {
        Self::new(LoaderConfig::default())
    }

    /// Create a loader with production dependencies
    pub fn new(config: LoaderConfig) -> Self {
        Self::with_dependencies(config, Arc::new(TracingEventSink::new()), None)
    }

    /// Create a loader with custom dependencies (for testing)
    pub fn with_dependencies(
        config: LoaderConfig,
        events: Arc<dyn EventSink>,
        resolver: Option<Box<dyn ExternalResolver>>,
    ) -> Self {
        Loader {
            config: Arc::new(config),
            events,
            resolver,
            registry: Registry::new(),
            records: FxHashMap::default(),
            modules: FxHashMap::default(),
            running_factories: 0,
        }
    }

    pub fn set_resolver(&mut self, resolver: impl ExternalResolver + 'static) {
        self.resolver = Some(Box::new(resolver));
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Forget every registered, linked and loaded module
    pub fn reset(&mut self) {
        debug!(
            registered = self.registry.len(),
            loaded = self.modules.len(),
            "resetting loader"
        );
        self.registry.clear();
        self.records.clear();
        self.modules.clear();
    }

    /// Declare a module.
    ///
    /// Duplicate dependency names are dropped (first occurrence kept). A name
    /// that is already registered or loaded keeps its first descriptor.
    pub fn register<I, S>(
        &mut self,
        name: &str,
        dependencies: I,
        init: Initializer,
    ) -> Result<Registration>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        validate_name(name, self.config.loader_options.strict_names)?;
        let dependencies = normalize_dependencies(dependencies);

        let inserted = !self.modules.contains_key(name)
            && self.registry.insert(name, dependencies.clone(), init);

        if inserted {
            debug!(module = name, deps = ?dependencies, "registered module");
            self.events.registered(name);
        } else {
            debug!(module = name, "module already defined, keeping first registration");
        }

        Ok(Registration {
            name: name.to_string(),
            dependencies,
            inserted,
        })
    }

    /// Link, evaluate and cache a module, returning its final export table.
    ///
    /// A second call returns the identical cached table without running anything.
    pub fn load(&mut self, name: &str) -> Result<Table> {
        if let Some(exports) = self.modules.get(name) {
            return Ok(exports.clone());
        }

        if !self.registry.contains(name) {
            return match self.resolve_from_host(name)? {
                Some(exports) => Ok(exports),
                None => Err(LoadError::ModuleNotFound {
                    module: name.to_string(),
                }),
            };
        }

        let span = debug_span!("load", module = name);
        let _enter = span.enter();

        if self.config.loader_options.external_policy == ExternalPolicy::Eager {
            self.check_externals(name)?;
        }

        self.link(name)?;
        self.ensure_evaluated(name)?;

        let Some(entry) = self.registry.remove(name) else {
            return self
                .modules
                .get(name)
                .cloned()
                .ok_or_else(|| LoadError::ModuleNotFound {
                    module: name.to_string(),
                });
        };

        let exports = self.normalize_exports(&entry);
        self.modules.insert(name.to_string(), exports.clone());
        self.events.loaded(name);
        info!("Loaded module '{}'", name);
        Ok(exports)
    }

    /// `load` followed by default-export unwrapping
    pub fn import(&mut self, name: &str) -> Result<Value> {
        let exports = self.load(name)?;
        Ok(unwrap_default(&exports))
    }

    /// Pre-seed the final-exports cache, bypassing registration and linking
    pub fn set_external(&mut self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        debug!(module = name, kind = value.type_name(), "seeding external module");
        self.modules.insert(name.to_string(), es_module_view(&value));
    }

    /// Cached final exports, if the module was loaded or seeded
    pub fn get(&self, name: &str) -> Option<Table> {
        self.modules.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    pub fn registered_names(&self) -> Vec<String> {
        self.registry.names().map(str::to_string).collect()
    }

    /// Normalized dependency list of a registered module
    pub fn dependencies(&self, name: &str) -> Option<&[String]> {
        self.registry.get(name).map(ModuleEntry::dependencies)
    }

    /// The live-binding record of a declarative module that started linking
    pub fn record(&self, name: &str) -> Option<Rc<ModuleRecord>> {
        self.records.get(name).cloned()
    }

    /// Compute the linking groups `load(name)` would use
    pub fn plan(&self, name: &str) -> Result<LinkPlan> {
        if !self.registry.contains(name) {
            return Err(LoadError::ModuleNotFound {
                module: name.to_string(),
            });
        }
        groups::build_groups(&self.registry, name)
    }

    /// Link every group, deepest first
    fn link(&mut self, name: &str) -> Result<()> {
        let plan = self.plan(name)?;
        debug!(module = name, groups = plan.groups().len(), "linking groups");

        for (index, group) in plan.groups().iter().enumerate().rev() {
            let discipline = plan.discipline_of(index);
            debug!(group = index, %discipline, members = group.len(), "linking group");
            for member in group {
                debug_assert!(self
                    .registry
                    .get(member)
                    .map_or(true, |entry| entry.discipline() == discipline));

                match discipline {
                    Discipline::Declarative => {
                        self.link_declarative(member)?;
                    }
                    Discipline::Factory => self.link_factory(member)?,
                }
            }
        }
        Ok(())
    }

    fn normalize_exports(&self, entry: &ModuleEntry) -> Table {
        let exports = match &entry.kind {
            ModuleKind::Declarative(module) => module
                .record
                .as_ref()
                .map(|record| Value::Table(record.exports().clone()))
                .unwrap_or_default(),
            ModuleKind::Factory(module) => module
                .link
                .as_ref()
                .map(|link| link.handle.exports())
                .unwrap_or_default(),
        };

        let wrap = exports.is_nullish()
            || match entry.discipline() {
                Discipline::Declarative => {
                    self.config.loader_options.wrap_empty_exports
                        && exports.as_table().is_some_and(Table::is_empty)
                }
                Discipline::Factory => !is_module_namespace(&exports),
            };

        match exports {
            Value::Table(table) if !wrap => table,
            other => wrap_default(other),
        }
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::init()
    }
}
