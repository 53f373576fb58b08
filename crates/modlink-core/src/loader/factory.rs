use super::Loader;
use crate::error::{LoadError, Result};
use crate::namespace::{es_module_view, unwrap_default};
use crate::registry::{Discipline, FactoryFn, FactoryLink, ModuleEntry, ModuleKind};
use crate::value::{Table, Value};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, warn};

/// The `module` argument of a factory: its name and current exports
pub struct ModuleHandle {
    id: String,
    exports: RefCell<Value>,
}

impl ModuleHandle {
    pub(crate) fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            exports: RefCell::new(Value::Table(Table::new())),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn exports(&self) -> Value {
        self.exports.borrow().clone()
    }

    /// Replace the exports; importers requiring this module afterwards see the new value
    pub fn set_exports(&self, value: impl Into<Value>) {
        *self.exports.borrow_mut() = value.into();
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("id", &self.id)
            .field("exports", &self.exports.borrow())
            .finish()
    }
}

/// What a dependency looks like from inside a factory
pub(crate) enum DependencyValue {
    /// A module table: externals, loaded modules and declarative modules
    Namespace(Table),
    /// A factory's exports as the factory produced them
    Raw(Value),
}

/// The name-keyed resolver handed to a factory.
///
/// Only names from the module's own dependency list resolve.
pub struct Require<'a> {
    loader: &'a mut Loader,
    module: String,
    dependencies: Vec<String>,
}

impl<'a> Require<'a> {
    pub(crate) fn new(loader: &'a mut Loader, module: &str, dependencies: Vec<String>) -> Self {
        Self {
            loader,
            module: module.to_string(),
            dependencies,
        }
    }

    /// Name of the module doing the requiring
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// The dependency's value: a factory's raw output, or a module table with
    /// any default-export wrapper removed.
    pub fn require(&mut self, name: &str) -> Result<Value> {
        Ok(match self.resolve(name)? {
            DependencyValue::Namespace(table) => unwrap_default(&table),
            DependencyValue::Raw(value) => value,
        })
    }

    /// The dependency as a module table, wrapping bare factory outputs
    pub fn namespace(&mut self, name: &str) -> Result<Table> {
        Ok(match self.resolve(name)? {
            DependencyValue::Namespace(table) => table,
            DependencyValue::Raw(value) => es_module_view(&value),
        })
    }

    fn resolve(&mut self, name: &str) -> Result<DependencyValue> {
        if !self.dependencies.iter().any(|dependency| dependency == name) {
            return Err(LoadError::UndeclaredDependency {
                module: self.module.clone(),
                dependency: name.to_string(),
            });
        }
        self.loader.dependency_value(&self.module, name)
    }
}

impl fmt::Debug for Require<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Require")
            .field("module", &self.module)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

/// A linked factory waiting for its factory dependencies before it runs
struct PendingFactory {
    name: String,
    handle: Rc<ModuleHandle>,
    factory: FactoryFn,
    require_eager: bool,
    dependencies: Vec<String>,
    next: usize,
}

impl Loader {
    /// Link and run a factory module.
    ///
    /// Idempotent: a module whose handle exists is running or done. Factory
    /// dependencies of a non-executing factory are linked and run first,
    /// walked with an explicit stack.
    pub(crate) fn link_factory(&mut self, name: &str) -> Result<()> {
        let Some(root) = self.begin_factory(name)? else {
            return Ok(());
        };
        let mut stack = vec![root];
        let result = self.run_factories(&mut stack);
        if result.is_err() {
            for pending in &stack {
                self.mark_failed(&pending.name);
            }
        }
        result
    }

    fn run_factories(&mut self, stack: &mut Vec<PendingFactory>) -> Result<()> {
        while let Some(pending) = stack.last_mut() {
            let next = if pending.require_eager {
                None
            } else {
                pending.dependencies.get(pending.next).cloned()
            };

            if let Some(dependency) = next {
                pending.next += 1;
                let is_factory = self
                    .registry
                    .get(&dependency)
                    .is_some_and(|dep| dep.discipline() == Discipline::Factory);
                if is_factory {
                    stack.extend(self.begin_factory(&dependency)?);
                }
                continue;
            }

            if let Some(pending) = stack.pop() {
                self.run_factory(pending)?;
            }
        }
        Ok(())
    }

    /// Attach a handle and take the factory; `None` if the module is linked already
    fn begin_factory(&mut self, name: &str) -> Result<Option<PendingFactory>> {
        let Some(entry) = self.registry.get_mut(name) else {
            return Err(LoadError::ModuleNotFound {
                module: name.to_string(),
            });
        };
        let ModuleKind::Factory(module) = &mut entry.kind else {
            return Err(LoadError::StructuralLink {
                module: name.to_string(),
                missing: "factory initializer",
            });
        };
        if let Some(link) = &module.link {
            if link.failed {
                return Err(LoadError::Initializer {
                    module: name.to_string(),
                    source: anyhow::anyhow!("factory failed in an earlier load"),
                });
            }
            return Ok(None);
        }

        let Some(factory) = module.factory.take() else {
            return Err(LoadError::StructuralLink {
                module: name.to_string(),
                missing: "factory initializer",
            });
        };
        let handle = Rc::new(ModuleHandle::new(name));
        module.link = Some(FactoryLink {
            handle: Rc::clone(&handle),
            namespace: None,
            failed: false,
        });

        Ok(Some(PendingFactory {
            name: name.to_string(),
            handle,
            factory,
            require_eager: module.require_eager,
            dependencies: entry.dependencies.clone(),
            next: 0,
        }))
    }

    /// Call the factory and store its namespace.
    ///
    /// Factories that run from inside another factory's `require` nest on the
    /// call stack; at most `maxDepth` factory bodies run at once.
    fn run_factory(&mut self, pending: PendingFactory) -> Result<()> {
        let PendingFactory {
            name,
            handle,
            factory,
            require_eager,
            dependencies,
            ..
        } = pending;

        let limit = self.config.loader_options.max_depth;
        if self.running_factories >= limit {
            warn!(
                "Factory '{}' would run nested below {} other factories",
                name, self.running_factories
            );
            self.mark_failed(&name);
            return Err(LoadError::DepthExceeded {
                module: name,
                limit,
            });
        }

        if let Some(entry) = self.registry.get_mut(&name) {
            entry.evaluated = true;
        }
        self.events.linked(&name, Discipline::Factory);
        self.events.executed(&name);
        debug!(module = %name, require_eager, "running factory");

        let exports = match handle.exports() {
            Value::Table(table) => table,
            _ => Table::new(),
        };
        self.running_factories += 1;
        let output = {
            let mut require = Require::new(self, &name, dependencies);
            factory(&mut require, &exports, &*handle)
        };
        self.running_factories -= 1;

        let output = match output {
            Ok(output) => output,
            Err(err) => {
                self.mark_failed(&name);
                return Err(LoadError::from_initializer(&name, err));
            }
        };
        if let Some(value) = output {
            handle.set_exports(value);
        }

        let namespace = es_module_view(&handle.exports());
        if let Some(link) = self.factory_link_mut(&name) {
            link.namespace = Some(namespace);
        }
        Ok(())
    }

    fn factory_link_mut(&mut self, name: &str) -> Option<&mut FactoryLink> {
        match &mut self.registry.get_mut(name)?.kind {
            ModuleKind::Factory(module) => module.link.as_mut(),
            ModuleKind::Declarative(_) => None,
        }
    }

    fn mark_failed(&mut self, name: &str) {
        if let Some(link) = self.factory_link_mut(name) {
            link.failed = true;
        }
    }

    /// Namespace view of a factory's output, once the factory has returned
    pub(crate) fn factory_namespace(&self, name: &str) -> Option<Table> {
        match &self.registry.get(name)?.kind {
            ModuleKind::Factory(module) => module.link.as_ref()?.namespace.clone(),
            ModuleKind::Declarative(_) => None,
        }
    }

    /// Current exports of a linked factory; partial while its factory is still running
    fn factory_exports(&self, name: &str) -> Value {
        match self.registry.get(name).map(|entry| &entry.kind) {
            Some(ModuleKind::Factory(module)) => module
                .link
                .as_ref()
                .map(|link| link.handle.exports())
                .unwrap_or_default(),
            _ => Value::Undefined,
        }
    }

    /// Resolve a dependency requested by a running factory, linking or running it as needed
    pub(crate) fn dependency_value(
        &mut self,
        importer: &str,
        name: &str,
    ) -> Result<DependencyValue> {
        let discipline = self.registry.get(name).map(ModuleEntry::discipline);
        match discipline {
            None => Ok(DependencyValue::Namespace(self.resolve_external(importer, name)?)),
            Some(Discipline::Declarative) => {
                let record = self.link_declarative(name)?;
                self.ensure_evaluated(name)?;
                Ok(DependencyValue::Namespace(record.exports().clone()))
            }
            Some(Discipline::Factory) => {
                self.link_factory(name)?;
                Ok(DependencyValue::Raw(self.factory_exports(name)))
            }
        }
    }
}
