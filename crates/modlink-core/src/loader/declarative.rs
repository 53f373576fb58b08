use super::Loader;
use crate::error::{LoadError, Result};
use crate::record::{Exporter, ModuleRecord};
use crate::registry::{Discipline, ModuleKind};
use crate::value::Table;
use std::rc::Rc;
use tracing::{debug, warn};

/// A declared module whose import slots are being bound
struct LinkFrame {
    name: String,
    record: Rc<ModuleRecord>,
    dependencies: Vec<String>,
    next: usize,
}

/// What a declarative importer gets for one dependency
enum Binding {
    /// Export table, plus the record when live binding is possible
    Bound(Table, Option<Rc<ModuleRecord>>),
    /// A declarative dependency that was just declared and must be bound first
    Declared(LinkFrame),
}

impl Loader {
    /// Wire a declarative module's import slots to its dependencies' export tables.
    ///
    /// Idempotent: a module whose record exists is linking or linked already.
    /// Unlinked declarative dependencies are declared and bound before the
    /// importer's slot for them, walked with an explicit stack.
    pub(crate) fn link_declarative(&mut self, name: &str) -> Result<Rc<ModuleRecord>> {
        let (record, frame) = self.declare_module(name)?;
        let mut stack: Vec<LinkFrame> = frame.into_iter().collect();

        while let Some(frame) = stack.last_mut() {
            let Some(dependency) = frame.dependencies.get(frame.next).cloned() else {
                self.events.linked(&frame.name, Discipline::Declarative);
                stack.pop();
                continue;
            };

            match self.dependency_binding(&frame.name, &dependency)? {
                Binding::Declared(next) => stack.push(next),
                Binding::Bound(exports, bound) => {
                    frame.record.push_dependency(bound.as_ref());
                    frame.record.invoke_setter(frame.next, &exports);
                    frame.next += 1;
                }
            }
        }
        Ok(record)
    }

    /// Create the record and run `declare`; no frame when the record existed already
    fn declare_module(&mut self, name: &str) -> Result<(Rc<ModuleRecord>, Option<LinkFrame>)> {
        let Some(entry) = self.registry.get_mut(name) else {
            return Err(LoadError::ModuleNotFound {
                module: name.to_string(),
            });
        };
        let ModuleKind::Declarative(module) = &mut entry.kind else {
            return Err(LoadError::StructuralLink {
                module: name.to_string(),
                missing: "declarative initializer",
            });
        };
        if let Some(record) = &module.record {
            return Ok((Rc::clone(record), None));
        }

        let record = ModuleRecord::new(name);
        module.record = Some(Rc::clone(&record));
        let declare = module.declare.take();
        let dependencies = entry.dependencies.clone();
        self.records.insert(name.to_string(), Rc::clone(&record));

        let Some(declare) = declare else {
            return Err(LoadError::StructuralLink {
                module: name.to_string(),
                missing: "declarative initializer",
            });
        };

        debug!(module = name, "linking declarative module");
        let declaration = declare(Exporter::new(&record))
            .map_err(|err| LoadError::from_initializer(name, err))?;

        let Some(setters) = declaration.setters else {
            return Err(LoadError::StructuralLink {
                module: name.to_string(),
                missing: "setters",
            });
        };
        let Some(execute) = declaration.execute else {
            return Err(LoadError::StructuralLink {
                module: name.to_string(),
                missing: "execute",
            });
        };
        record.install(setters, execute);

        let frame = LinkFrame {
            name: name.to_string(),
            record: Rc::clone(&record),
            dependencies,
            next: 0,
        };
        Ok((record, Some(frame)))
    }

    fn dependency_binding(&mut self, importer: &str, dependency: &str) -> Result<Binding> {
        if let Some(record) = self.records.get(dependency) {
            return Ok(Binding::Bound(record.exports().clone(), Some(Rc::clone(record))));
        }

        let discipline = self.registry.get(dependency).map(|entry| entry.discipline());
        match discipline {
            None => Ok(Binding::Bound(self.resolve_external(importer, dependency)?, None)),
            Some(Discipline::Factory) => {
                let namespace = self.factory_binding(importer, dependency)?;
                Ok(Binding::Bound(namespace, None))
            }
            Some(Discipline::Declarative) => match self.declare_module(dependency)? {
                (_, Some(frame)) => Ok(Binding::Declared(frame)),
                (record, None) => Ok(Binding::Bound(record.exports().clone(), Some(record))),
            },
        }
    }

    /// Namespace of a factory dependency, running the factory if it never ran
    fn factory_binding(&mut self, importer: &str, dependency: &str) -> Result<Table> {
        if let Some(namespace) = self.factory_namespace(dependency) {
            return Ok(namespace);
        }
        // Errors for a factory that failed in an earlier load
        self.link_factory(dependency)?;
        if let Some(namespace) = self.factory_namespace(dependency) {
            return Ok(namespace);
        }

        // Still running: the factory sits on a cycle back to this importer.
        // Groups are numbered from a plan rooted at the importer.
        warn!(
            "Mixed dependency cycle: '{}' imports factory '{}' while it runs",
            importer, dependency
        );
        Err(LoadError::MixedCycle {
            module: importer.to_string(),
            from: 0,
            to: 2,
        })
    }
}
