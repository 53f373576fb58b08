use super::Loader;
use crate::error::{LoadError, Result};
use crate::registry::Discipline;
use rustc_hash::FxHashSet;
use tracing::debug;

/// A pending module whose dependencies' bodies are being run
struct EvalFrame {
    name: String,
    dependencies: Vec<String>,
    next: usize,
}

impl Loader {
    /// Run a declarative module's body after its dependencies' bodies.
    ///
    /// One seen-set covers the whole descent; a dependency already in it is
    /// an executing circular reference and is not entered again.
    pub(crate) fn ensure_evaluated(&mut self, name: &str) -> Result<()> {
        let Some(root) = self.pending_body(name) else {
            return Ok(());
        };
        let mut seen = FxHashSet::default();
        seen.insert(name.to_string());
        let mut stack = vec![root];

        while let Some(frame) = stack.last_mut() {
            let Some(dependency) = frame.dependencies.get(frame.next).cloned() else {
                if let Some(done) = stack.pop() {
                    self.run_body(&done.name)?;
                }
                continue;
            };
            frame.next += 1;

            if seen.contains(&dependency) {
                continue;
            }
            if !self.registry.contains(&dependency) {
                self.resolve_external(&frame.name, &dependency)?;
            } else if let Some(next) = self.pending_body(&dependency) {
                seen.insert(dependency);
                stack.push(next);
            }
        }
        Ok(())
    }

    /// Frame for a declarative module whose body has not run
    fn pending_body(&self, name: &str) -> Option<EvalFrame> {
        let entry = self.registry.get(name)?;
        if entry.is_evaluated() || entry.discipline() != Discipline::Declarative {
            return None;
        }
        Some(EvalFrame {
            name: name.to_string(),
            dependencies: entry.dependencies.clone(),
            next: 0,
        })
    }

    fn run_body(&mut self, name: &str) -> Result<()> {
        // A cyclic re-entry may have run this module already
        let Some(entry) = self.registry.get_mut(name) else {
            return Ok(());
        };
        if entry.evaluated {
            return Ok(());
        }
        entry.evaluated = true;

        let record = match entry.record().cloned() {
            Some(record) => record,
            None => self.link_declarative(name)?,
        };
        let Some(execute) = record.take_execute() else {
            return Ok(());
        };

        debug!(module = name, "executing module body");
        self.events.executed(name);
        execute().map_err(|err| LoadError::from_initializer(name, err))
    }
}
