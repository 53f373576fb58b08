//! Live-binding records for declarative modules.
//!
//! A [`ModuleRecord`] is created the moment a declarative module starts
//! linking. Records are owned by the loader; records and exporters only hold
//! weak references to each other, so cyclic graphs never keep themselves alive.

use crate::value::{Table, Value};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::trace;

/// Binding function receiving a dependency's full export table
pub type Setter = Box<dyn FnMut(&Table)>;

/// Module body, run exactly once
pub type Execute = Box<dyn FnOnce() -> anyhow::Result<()>>;

/// Re-entrancy guard for export propagation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    Idle,
    /// An export of this record is being pushed to its importers
    Propagating,
}

/// What a declarative initializer hands back to the linker
#[derive(Default)]
pub struct Declaration {
    /// One slot per dependency, in dependency order; `None` leaves that import unbound
    pub setters: Option<Vec<Option<Setter>>>,
    pub execute: Option<Execute>,
}

impl Declaration {
    /// Start a declaration with an empty setter list
    pub fn new() -> Self {
        Self {
            setters: Some(Vec::new()),
            execute: None,
        }
    }

    /// Bind the next dependency
    pub fn setter<F>(mut self, setter: F) -> Self
    where
        F: FnMut(&Table) + 'static,
    {
        self.setters
            .get_or_insert_with(Vec::new)
            .push(Some(Box::new(setter)));
        self
    }

    /// Leave the next dependency unbound
    pub fn skip_binding(mut self) -> Self {
        self.setters.get_or_insert_with(Vec::new).push(None);
        self
    }

    pub fn execute<F>(mut self, execute: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + 'static,
    {
        self.execute = Some(Box::new(execute));
        self
    }
}

pub struct ModuleRecord {
    name: String,
    exports: Table,
    dependencies: RefCell<Vec<Option<Weak<ModuleRecord>>>>,
    importers: RefCell<Vec<Weak<ModuleRecord>>>,
    setters: RefCell<Vec<Option<Setter>>>,
    execute: RefCell<Option<Execute>>,
    state: Cell<BindingState>,
}

impl ModuleRecord {
    pub(crate) fn new(name: &str) -> Rc<Self> {
        Rc::new(Self {
            name: name.to_string(),
            exports: Table::new(),
            dependencies: RefCell::new(Vec::new()),
            importers: RefCell::new(Vec::new()),
            setters: RefCell::new(Vec::new()),
            execute: RefCell::new(None),
            state: Cell::new(BindingState::Idle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The live export table
    pub fn exports(&self) -> &Table {
        &self.exports
    }

    pub fn state(&self) -> BindingState {
        self.state.get()
    }

    /// Number of dependency slots bound so far
    pub fn dependency_count(&self) -> usize {
        self.dependencies.borrow().len()
    }

    /// Names of the records currently importing this one
    pub fn importer_names(&self) -> Vec<String> {
        self.importers
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .map(|r| r.name.clone())
            .collect()
    }

    pub(crate) fn install(&self, setters: Vec<Option<Setter>>, execute: Execute) {
        *self.setters.borrow_mut() = setters;
        *self.execute.borrow_mut() = Some(execute);
    }

    pub(crate) fn take_execute(&self) -> Option<Execute> {
        self.execute.borrow_mut().take()
    }

    /// Append the binding for the next dependency slot
    pub(crate) fn push_dependency(self: &Rc<Self>, dependency: Option<&Rc<ModuleRecord>>) {
        if let Some(dependency) = dependency {
            dependency.add_importer(self);
        }
        self.dependencies
            .borrow_mut()
            .push(dependency.map(Rc::downgrade));
    }

    fn add_importer(&self, importer: &Rc<ModuleRecord>) {
        let mut importers = self.importers.borrow_mut();
        let weak = Rc::downgrade(importer);
        if !importers.iter().any(|existing| existing.ptr_eq(&weak)) {
            importers.push(weak);
        }
    }

    /// Slot index under which this record imports `dependency`
    fn binding_index(&self, dependency: &ModuleRecord) -> Option<usize> {
        self.dependencies.borrow().iter().position(|slot| {
            slot.as_ref()
                .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), dependency))
        })
    }

    /// Run the setter at `index`, if the module bound that slot.
    ///
    /// The setter is taken out of its slot while it runs; a nested call for
    /// the same slot finds it empty and does nothing.
    pub(crate) fn invoke_setter(&self, index: usize, exports: &Table) {
        let setter = self
            .setters
            .borrow_mut()
            .get_mut(index)
            .and_then(Option::take);
        let Some(mut setter) = setter else {
            return;
        };

        setter(exports);

        if let Some(slot) = self.setters.borrow_mut().get_mut(index) {
            if slot.is_none() {
                *slot = Some(setter);
            }
        }
    }

    /// Push the current exports to every importer that is not itself mid-update
    fn notify_importers(&self) {
        let importers: Vec<Rc<ModuleRecord>> = self
            .importers
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();

        for importer in importers {
            if importer.state.get() == BindingState::Propagating {
                trace!(from = %self.name, to = %importer.name, "skipping importer mid-update");
                continue;
            }
            if let Some(index) = importer.binding_index(self) {
                trace!(from = %self.name, to = %importer.name, index, "updating binding");
                importer.invoke_setter(index, &self.exports);
            }
        }
    }

    fn propagate<F: FnOnce(&Table)>(&self, write: F) {
        let previous = self.state.replace(BindingState::Propagating);
        write(&self.exports);
        self.notify_importers();
        self.state.set(previous);
    }
}

impl fmt::Debug for ModuleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRecord")
            .field("name", &self.name)
            .field("exports", &self.exports)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

/// The export callback given to a declarative initializer
#[derive(Clone)]
pub struct Exporter {
    record: Weak<ModuleRecord>,
}

impl Exporter {
    pub(crate) fn new(record: &Rc<ModuleRecord>) -> Self {
        Self {
            record: Rc::downgrade(record),
        }
    }

    /// Set one export and update every importer's binding.
    ///
    /// Returns `value` so the call can be used inline.
    pub fn export(&self, name: impl Into<String>, value: impl Into<Value>) -> Value {
        let value = value.into();
        if let Some(record) = self.record.upgrade() {
            let name = name.into();
            record.propagate(|exports| {
                exports.set(name, value.clone());
            });
        }
        value
    }

    /// Set several exports, then update importers once
    pub fn export_all<I, K, V>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        if let Some(record) = self.record.upgrade() {
            record.propagate(|exports| {
                for (name, value) in entries {
                    exports.set(name, value);
                }
            });
        }
    }

    /// This module's own export table
    pub fn exports(&self) -> Option<Table> {
        self.record.upgrade().map(|r| r.exports.clone())
    }
}

impl fmt::Debug for Exporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.record.upgrade().map(|r| r.name.clone());
        f.debug_struct("Exporter").field("module", &name).finish()
    }
}
