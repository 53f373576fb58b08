use crate::registry::Discipline;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// What happened to a module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadEventKind {
    Registered,
    Linked(Discipline),
    Executed,
    Loaded,
    ExternalResolved,
}

/// A lifecycle event for one module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadEvent {
    pub kind: LoadEventKind,
    pub module: String,
}

impl LoadEvent {
    pub fn new(kind: LoadEventKind, module: impl Into<String>) -> Self {
        Self {
            kind,
            module: module.into(),
        }
    }
}

/// Trait for observing the loader's lifecycle events
/// This allows for dependency injection and testing with collecting sinks
pub trait EventSink: Send + Sync {
    fn report(&self, event: LoadEvent);

    fn registered(&self, module: &str) {
        self.report(LoadEvent::new(LoadEventKind::Registered, module));
    }

    fn linked(&self, module: &str, discipline: Discipline) {
        self.report(LoadEvent::new(LoadEventKind::Linked(discipline), module));
    }

    fn executed(&self, module: &str) {
        self.report(LoadEvent::new(LoadEventKind::Executed, module));
    }

    fn loaded(&self, module: &str) {
        self.report(LoadEvent::new(LoadEventKind::Loaded, module));
    }

    fn external_resolved(&self, module: &str) {
        self.report(LoadEvent::new(LoadEventKind::ExternalResolved, module));
    }

    fn event_count(&self) -> usize;
    fn get_events(&self) -> Vec<LoadEvent>;
}

/// Sink that forwards events to `tracing` without retaining them
#[derive(Debug, Default)]
pub struct TracingEventSink {
    count: AtomicUsize,
}

impl TracingEventSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventSink for TracingEventSink {
    fn report(&self, event: LoadEvent) {
        debug!(module = %event.module, kind = ?event.kind, "module event");
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn event_count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    fn get_events(&self) -> Vec<LoadEvent> {
        Vec::new()
    }
}

/// Collecting event sink for testing
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: Mutex<Vec<LoadEvent>>,
}

impl CollectingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Modules that reported `kind`, in report order
    pub fn modules_with(&self, kind: LoadEventKind) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.module.clone())
            .collect()
    }

    pub fn count_of(&self, kind: LoadEventKind, module: &str) -> usize {
        self.lock()
            .iter()
            .filter(|e| e.kind == kind && e.module == module)
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<LoadEvent>> {
        // Poisoning is ignored; events reported before a panic stay readable
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl EventSink for CollectingEventSink {
    fn report(&self, event: LoadEvent) {
        self.lock().push(event);
    }

    fn event_count(&self) -> usize {
        self.lock().len()
    }

    fn get_events(&self) -> Vec<LoadEvent> {
        self.lock().clone()
    }
}
