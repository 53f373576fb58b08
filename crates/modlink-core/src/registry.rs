//! Module descriptors and the registry that holds them until they are loaded.

use crate::error::{LoadError, Result};
use crate::loader::{ModuleHandle, Require};
use crate::record::{Declaration, Exporter, ModuleRecord};
use crate::value::{Table, Value};
use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use std::fmt;
use std::rc::Rc;

/// Declarative initializer: receives the export callback, returns setters and body
pub type DeclareFn = Box<dyn FnOnce(Exporter) -> anyhow::Result<Declaration>>;

/// Factory initializer: `(require, exports, module)`, optionally returning replacement exports
pub type FactoryFn =
    Box<dyn FnOnce(&mut Require<'_>, &Table, &ModuleHandle) -> anyhow::Result<Option<Value>>>;

/// Linking discipline of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Discipline {
    Declarative,
    Factory,
}

impl Discipline {
    pub fn flip(self) -> Self {
        match self {
            Discipline::Declarative => Discipline::Factory,
            Discipline::Factory => Discipline::Declarative,
        }
    }
}

impl fmt::Display for Discipline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discipline::Declarative => write!(f, "declarative"),
            Discipline::Factory => write!(f, "factory"),
        }
    }
}

/// How a module is initialized, as passed to `register`
pub enum Initializer {
    Declarative(DeclareFn),
    Factory {
        factory: FactoryFn,
        require_eager: bool,
    },
}

impl Initializer {
    pub fn declarative<F>(declare: F) -> Self
    where
        F: FnOnce(Exporter) -> anyhow::Result<Declaration> + 'static,
    {
        Initializer::Declarative(Box::new(declare))
    }

    /// Factory whose factory dependencies are linked before it runs
    pub fn factory<F>(factory: F) -> Self
    where
        F: FnOnce(&mut Require<'_>, &Table, &ModuleHandle) -> anyhow::Result<Option<Value>>
            + 'static,
    {
        Initializer::Factory {
            factory: Box::new(factory),
            require_eager: false,
        }
    }

    /// Factory whose dependencies run when it requires them
    pub fn executing_factory<F>(factory: F) -> Self
    where
        F: FnOnce(&mut Require<'_>, &Table, &ModuleHandle) -> anyhow::Result<Option<Value>>
            + 'static,
    {
        Initializer::Factory {
            factory: Box::new(factory),
            require_eager: true,
        }
    }

    pub fn discipline(&self) -> Discipline {
        match self {
            Initializer::Declarative(_) => Discipline::Declarative,
            Initializer::Factory { .. } => Discipline::Factory,
        }
    }
}

pub struct DeclarativeModule {
    pub(crate) declare: Option<DeclareFn>,
    /// Set as soon as linking begins
    pub(crate) record: Option<Rc<ModuleRecord>>,
}

pub struct FactoryModule {
    pub(crate) factory: Option<FactoryFn>,
    pub(crate) require_eager: bool,
    /// Set as soon as linking begins
    pub(crate) link: Option<FactoryLink>,
}

/// Output side of a linked factory module
pub struct FactoryLink {
    pub(crate) handle: Rc<ModuleHandle>,
    /// Namespace view of the final exports, available once the factory returned
    pub(crate) namespace: Option<Table>,
    /// Set when the factory or one it was linking errored
    pub(crate) failed: bool,
}

pub enum ModuleKind {
    Declarative(DeclarativeModule),
    Factory(FactoryModule),
}

impl ModuleKind {
    pub fn discipline(&self) -> Discipline {
        match self {
            ModuleKind::Declarative(_) => Discipline::Declarative,
            ModuleKind::Factory(_) => Discipline::Factory,
        }
    }
}

impl From<Initializer> for ModuleKind {
    fn from(init: Initializer) -> Self {
        match init {
            Initializer::Declarative(declare) => ModuleKind::Declarative(DeclarativeModule {
                declare: Some(declare),
                record: None,
            }),
            Initializer::Factory {
                factory,
                require_eager,
            } => ModuleKind::Factory(FactoryModule {
                factory: Some(factory),
                require_eager,
                link: None,
            }),
        }
    }
}

/// A registered module descriptor
pub struct ModuleEntry {
    pub(crate) name: String,
    pub(crate) dependencies: Vec<String>,
    pub(crate) kind: ModuleKind,
    pub(crate) evaluated: bool,
}

impl ModuleEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn discipline(&self) -> Discipline {
        self.kind.discipline()
    }

    pub fn is_evaluated(&self) -> bool {
        self.evaluated
    }

    /// True once a record (declarative) or handle (factory) is attached
    pub fn is_linked(&self) -> bool {
        match &self.kind {
            ModuleKind::Declarative(module) => module.record.is_some(),
            ModuleKind::Factory(module) => module.link.is_some(),
        }
    }

    pub(crate) fn record(&self) -> Option<&Rc<ModuleRecord>> {
        match &self.kind {
            ModuleKind::Declarative(module) => module.record.as_ref(),
            ModuleKind::Factory(_) => None,
        }
    }
}

impl fmt::Debug for ModuleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleEntry")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("discipline", &self.discipline())
            .field("evaluated", &self.evaluated)
            .finish()
    }
}

/// Result of a `register` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub name: String,
    /// This call's dependency list, deduplicated
    pub dependencies: Vec<String>,
    /// False when an earlier registration under the same name was kept
    pub inserted: bool,
}

/// Drop repeated names, keeping each name at its first position
pub fn normalize_dependencies<I, S>(dependencies: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = FxHashSet::default();
    let mut normalized = Vec::new();
    for dependency in dependencies {
        let dependency = dependency.into();
        if seen.insert(dependency.clone()) {
            normalized.push(dependency);
        }
    }
    normalized
}

pub(crate) fn validate_name(name: &str, strict: bool) -> Result<()> {
    let reason = if name.is_empty() {
        Some("name must not be empty")
    } else if strict && name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        Some("name must not contain whitespace or control characters")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(LoadError::Registration {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Table of descriptors waiting to be loaded
#[derive(Default)]
pub struct Registry {
    entries: IndexMap<String, ModuleEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a descriptor unless the name is taken; the first registration wins
    pub(crate) fn insert(
        &mut self,
        name: &str,
        dependencies: Vec<String>,
        init: Initializer,
    ) -> bool {
        if self.entries.contains_key(name) {
            return false;
        }
        self.entries.insert(
            name.to_string(),
            ModuleEntry {
                name: name.to_string(),
                dependencies,
                kind: init.into(),
                evaluated: false,
            },
        );
        true
    }

    pub fn get(&self, name: &str) -> Option<&ModuleEntry> {
        self.entries.get(name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut ModuleEntry> {
        self.entries.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<ModuleEntry> {
        self.entries.shift_remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
