pub mod config;
pub mod error;
pub mod events;
pub mod loader;
pub mod namespace;
pub mod record;
pub mod registry;
pub mod value;

pub use config::{ConfigError, ExternalPolicy, LoaderConfig, LoaderOptions};
pub use error::{LoadError, Result};
pub use events::{CollectingEventSink, EventSink, LoadEvent, LoadEventKind, TracingEventSink};
pub use loader::{ExternalResolver, LinkPlan, Loader, ModuleHandle, Require};
pub use namespace::{es_module_view, unwrap_default, wrap_default};
pub use record::{BindingState, Declaration, Exporter, ModuleRecord};
pub use registry::{Discipline, Initializer, Registration};
pub use value::{NativeFunction, Table, Value};
