use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Invalid module name {name:?}: {reason}")]
    Registration { name: String, reason: &'static str },

    #[error("Invalid declaration for module '{module}': missing {missing}")]
    StructuralLink {
        module: String,
        missing: &'static str,
    },

    #[error(
        "Mixed dependency cycle detected: module '{module}' cannot move from group {from} to group {to}"
    )]
    MixedCycle {
        module: String,
        from: usize,
        to: usize,
    },

    #[error("Unable to load dependency '{dependency}' of module '{importer}'")]
    UnresolvedDependency { dependency: String, importer: String },

    #[error("Module not found: {module}")]
    ModuleNotFound { module: String },

    #[error("Module '{module}' did not declare '{dependency}' as a dependency")]
    UndeclaredDependency { module: String, dependency: String },

    #[error("Module '{module}' failed during initialization: {source}")]
    Initializer {
        module: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Factory '{module}' would run nested deeper than the maximum depth of {limit}")]
    DepthExceeded { module: String, limit: usize },
}

impl LoadError {
    /// Wrap an error raised by module code.
    ///
    /// Loader errors raised from inside a body (for example by `require`)
    /// keep their own variant instead of being reported as the body's failure.
    pub(crate) fn from_initializer(module: &str, err: anyhow::Error) -> Self {
        match err.downcast::<LoadError>() {
            Ok(inner) => inner,
            Err(source) => LoadError::Initializer {
                module: module.to_string(),
                source,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, LoadError>;
