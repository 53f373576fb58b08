use super::Loader;
use crate::error::{LoadError, Result};
use crate::namespace::es_module_view;
use crate::value::{Table, Value};
use rustc_hash::FxHashSet;
use tracing::{debug, warn};

/// Host-side lookup for modules that were never registered.
///
/// Resolution is synchronous. Anything that needs fetching has to be
/// fetched before `load` is called.
pub trait ExternalResolver {
    /// The module's value, or `None` if the host does not know the name
    fn resolve(&self, name: &str) -> anyhow::Result<Option<Value>>;
}

impl<F> ExternalResolver for F
where
    F: Fn(&str) -> Option<Value>,
{
    fn resolve(&self, name: &str) -> anyhow::Result<Option<Value>> {
        Ok(self(name))
    }
}

impl Loader {
    /// Ask the resolver for `name` and cache what it returns
    pub(crate) fn resolve_from_host(&mut self, name: &str) -> Result<Option<Table>> {
        let Some(resolver) = &self.resolver else {
            return Ok(None);
        };
        let value = resolver
            .resolve(name)
            .map_err(|err| LoadError::from_initializer(name, err))?;
        let Some(value) = value else {
            return Ok(None);
        };

        let exports = es_module_view(&value);
        self.modules.insert(name.to_string(), exports.clone());
        self.events.external_resolved(name);
        debug!(module = name, kind = value.type_name(), "resolved external module");
        Ok(Some(exports))
    }

    /// Final exports of a dependency that is not in the registry
    pub(crate) fn resolve_external(&mut self, importer: &str, name: &str) -> Result<Table> {
        if let Some(exports) = self.modules.get(name) {
            return Ok(exports.clone());
        }
        match self.resolve_from_host(name)? {
            Some(exports) => Ok(exports),
            None => {
                warn!("Unresolved dependency '{}' of module '{}'", name, importer);
                Err(LoadError::UnresolvedDependency {
                    dependency: name.to_string(),
                    importer: importer.to_string(),
                })
            }
        }
    }

    /// Resolve every external of `root`'s pending closure before any module code runs
    pub(crate) fn check_externals(&mut self, root: &str) -> Result<()> {
        let mut visited = FxHashSet::default();
        let mut stack = vec![root.to_string()];

        while let Some(name) = stack.pop() {
            if !visited.insert(name.clone()) {
                continue;
            }
            let dependencies = match self.registry.get(&name) {
                Some(entry) if !entry.is_evaluated() => entry.dependencies.clone(),
                _ => continue,
            };

            for dependency in &dependencies {
                if !self.registry.contains(dependency) {
                    self.resolve_external(&name, dependency)?;
                }
            }
            stack.extend(dependencies.into_iter().rev());
        }
        Ok(())
    }
}
