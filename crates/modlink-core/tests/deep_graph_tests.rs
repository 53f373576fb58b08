mod common;

use common::{init_tracing, EvalLog};
use modlink_core::{
    Declaration, Initializer, LoadError, Loader, ModuleHandle, Require, Table, Value,
};

fn name(index: usize) -> String {
    format!("m{index}")
}

/// Dependency list of link `index` in a chain of `len` modules
fn next_link(index: usize, len: usize) -> Vec<String> {
    if index + 1 < len {
        vec![name(index + 1)]
    } else {
        Vec::new()
    }
}

fn chain_declarative(log: &EvalLog, index: usize, dependency_count: usize) -> Initializer {
    let log = log.clone();
    Initializer::declarative(move |export| {
        let mut declaration = Declaration::new();
        for _ in 0..dependency_count {
            declaration = declaration.skip_binding();
        }
        Ok(declaration.execute(move || {
            log.push(&name(index));
            export.export("index", index as i32);
            Ok(())
        }))
    })
}

/// Factory returning one more than its dependency's value, or zero at the end
fn counting_body(
    log: EvalLog,
    index: usize,
) -> impl FnOnce(&mut Require<'_>, &Table, &ModuleHandle) -> anyhow::Result<Option<Value>> {
    move |require, _, _| {
        log.push(&name(index));
        let below = match require.dependencies().first().cloned() {
            Some(dependency) => require.require(&dependency)?.as_number().unwrap_or(-1.0),
            None => -1.0,
        };
        Ok(Some(Value::from(below + 1.0)))
    }
}

fn executing_chain(loader: &mut Loader, log: &EvalLog, len: usize) {
    for i in 0..len {
        let init = Initializer::executing_factory(counting_body(log.clone(), i));
        loader.register(&name(i), next_link(i, len), init).unwrap();
    }
}

// ============================================================================
// Linking and evaluation
// ============================================================================

#[test]
fn test_long_declarative_chain_loads() {
    init_tracing();
    let len = 5_000;
    let log = EvalLog::new();
    let mut loader = Loader::init();
    for i in 0..len {
        let deps = next_link(i, len);
        let count = deps.len();
        loader.register(&name(i), deps, chain_declarative(&log, i, count)).unwrap();
    }

    let root = loader.load("m0").unwrap();

    assert_eq!(root.get("index"), Some(Value::from(0)));
    let ran = log.entries();
    assert_eq!(ran.len(), len);
    assert_eq!(ran.first().map(String::as_str), Some("m4999"));
    assert_eq!(ran.last().map(String::as_str), Some("m0"));
}

#[test]
fn test_long_factory_chain_runs_dependencies_first() {
    let len = 5_000;
    let log = EvalLog::new();
    let mut loader = Loader::init();
    for i in 0..len {
        let init = Initializer::factory(counting_body(log.clone(), i));
        loader.register(&name(i), next_link(i, len), init).unwrap();
    }

    let value = loader.import("m0").unwrap();

    assert_eq!(value.as_number(), Some((len - 1) as f64));
    assert_eq!(log.position("m4999"), Some(0));
    assert_eq!(log.count("m0"), 1);
}

#[test]
fn test_long_alternating_chain_loads() {
    let len = 2_000;
    let log = EvalLog::new();
    let mut loader = Loader::init();
    for i in 0..len {
        let deps = next_link(i, len);
        let init = if i % 2 == 0 {
            chain_declarative(&log, i, deps.len())
        } else {
            Initializer::factory(counting_body(log.clone(), i))
        };
        loader.register(&name(i), deps, init).unwrap();
    }

    assert_eq!(loader.plan("m0").unwrap().groups().len(), len);
    loader.load("m0").unwrap();

    assert_eq!(log.entries().len(), len);
    assert_eq!(log.count("m1"), 1);
}

// ============================================================================
// Nested factory execution
// ============================================================================

#[test]
fn test_executing_chain_at_default_limit_loads() {
    let mut loader = Loader::init();
    let limit = loader.config().loader_options.max_depth;
    let log = EvalLog::new();
    executing_chain(&mut loader, &log, limit);

    let value = loader.import("m0").unwrap();

    assert_eq!(value.as_number(), Some((limit - 1) as f64));
    assert_eq!(log.entries().len(), limit);
}

#[test]
fn test_executing_chain_past_default_limit_fails() {
    let mut loader = Loader::init();
    let limit = loader.config().loader_options.max_depth;
    let log = EvalLog::new();
    executing_chain(&mut loader, &log, limit + 1);

    let err = loader.load("m0").unwrap_err();

    let deepest = name(limit);
    assert!(matches!(
        &err,
        LoadError::DepthExceeded { module, limit: reported }
            if *module == deepest && *reported == limit
    ));
    assert_eq!(log.count(&deepest), 0);
    assert_eq!(log.entries().len(), limit);
    assert!(!loader.has("m0"));

    let again = loader.load("m0").unwrap_err();
    assert!(matches!(again, LoadError::Initializer { module, .. } if module == "m0"));
}
