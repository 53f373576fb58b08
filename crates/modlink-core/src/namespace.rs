//! Default-export interop between table-shaped and single-value modules.

use crate::value::{Table, Value};

/// Entry marking a table as an already-canonical module namespace
pub const MODULE_MARKER: &str = "__esModule";

/// Entry marking a wrapper whose real value lives under [`DEFAULT_EXPORT`]
pub const USE_DEFAULT_MARKER: &str = "__useDefault";

pub const DEFAULT_EXPORT: &str = "default";

/// True when `value` is a table carrying `__esModule: true`
pub fn is_module_namespace(value: &Value) -> bool {
    match value {
        Value::Table(table) => table.get(MODULE_MARKER) == Some(Value::Bool(true)),
        _ => false,
    }
}

/// Package a bare value as `{ default: value, __useDefault: true }`
pub fn wrap_default(value: Value) -> Table {
    let table = Table::new();
    table.set(DEFAULT_EXPORT, value);
    table.set(USE_DEFAULT_MARKER, true);
    table
}

/// Namespace view of a module output that importers can bind against.
///
/// Canonical module tables are returned as-is. Anything else gets a fresh
/// table with the output's own entries (if it is a table), plus `default`
/// and the `__useDefault` marker.
pub fn es_module_view(value: &Value) -> Table {
    if let (true, Value::Table(table)) = (is_module_namespace(value), value) {
        return table.clone();
    }

    let view = Table::new();
    if let Value::Table(table) = value {
        for (key, entry) in table.entries() {
            view.set(key, entry);
        }
    }
    view.set(DEFAULT_EXPORT, value.clone());
    view.set(USE_DEFAULT_MARKER, true);
    view
}

/// Inverse of [`wrap_default`]: the `default` entry of a wrapper, or the table itself
pub fn unwrap_default(table: &Table) -> Value {
    if table.get(USE_DEFAULT_MARKER) == Some(Value::Bool(true)) {
        table.get(DEFAULT_EXPORT).unwrap_or_default()
    } else {
        Value::Table(table.clone())
    }
}
