//! Shared helpers for the integration tests

#![allow(dead_code)]

use modlink_core::{Declaration, ExternalResolver, Initializer, Table, Value};
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::rc::Rc;
use tracing_subscriber::EnvFilter;

/// Install a test-writer subscriber; RUST_LOG=debug shows loader internals
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Order in which module bodies ran
#[derive(Debug, Clone, Default)]
pub struct EvalLog(Rc<RefCell<Vec<String>>>);

impl EvalLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, name: &str) {
        self.0.borrow_mut().push(name.to_string());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.0.borrow().iter().filter(|n| *n == name).count()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.0.borrow().iter().position(|n| n == name)
    }
}

/// Declarative module without bindings whose body logs and exports `exports`
pub fn declarative(
    log: &EvalLog,
    name: &'static str,
    dependency_count: usize,
    exports: &[(&'static str, i32)],
) -> Initializer {
    let log = log.clone();
    let exports = exports.to_vec();
    Initializer::declarative(move |export| {
        let mut declaration = Declaration::new();
        for _ in 0..dependency_count {
            declaration = declaration.skip_binding();
        }
        Ok(declaration.execute(move || {
            log.push(name);
            export.export_all(exports);
            Ok(())
        }))
    })
}

/// Factory module that logs and returns `value`
pub fn factory(log: &EvalLog, name: &'static str, value: impl Into<Value>) -> Initializer {
    let log = log.clone();
    let value = value.into();
    Initializer::factory(move |_, _, _| {
        log.push(name);
        Ok(Some(value))
    })
}

/// Numeric entry of a table, if present
pub fn number(table: &Table, key: &str) -> Option<f64> {
    table.get(key).and_then(|v| v.as_number())
}

/// Resolver over a fixed set of host modules that records every lookup
#[derive(Debug, Default)]
pub struct MockExternalResolver {
    values: FxHashMap<String, Value>,
    requests: Rc<RefCell<Vec<String>>>,
}

impl MockExternalResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.values.insert(name.to_string(), value.into());
        self
    }

    /// Handle to the lookup log that stays usable after the resolver is moved into a loader
    pub fn requests(&self) -> Rc<RefCell<Vec<String>>> {
        self.requests.clone()
    }
}

impl ExternalResolver for MockExternalResolver {
    fn resolve(&self, name: &str) -> anyhow::Result<Option<Value>> {
        self.requests.borrow_mut().push(name.to_string());
        Ok(self.values.get(name).cloned())
    }
}
