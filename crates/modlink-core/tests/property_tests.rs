mod common;

use common::EvalLog;
use modlink_core::{registry::normalize_dependencies, Declaration, Initializer, Loader, Table};
use proptest::prelude::*;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

fn name(index: usize) -> String {
    format!("m{index}")
}

/// Declarative module `index` whose body records which dependency tables were
/// already populated, then exports its own id
fn graph_module(log: &EvalLog, index: usize, dependency_count: usize) -> Initializer {
    let log = log.clone();
    Initializer::declarative(move |export| {
        let imports: Rc<RefCell<Vec<Option<Table>>>> =
            Rc::new(RefCell::new(vec![None; dependency_count]));
        let mut declaration = Declaration::new();
        for slot in 0..dependency_count {
            let imports = imports.clone();
            declaration = declaration.setter(move |table: &Table| {
                imports.borrow_mut()[slot] = Some(table.clone());
            });
        }
        Ok(declaration.execute(move || {
            let all_ready = imports
                .borrow()
                .iter()
                .all(|table| table.as_ref().is_some_and(|t| t.contains_key("id")));
            anyhow::ensure!(all_ready, "m{index} ran before one of its dependencies");
            log.push(&name(index));
            export.export("id", index as i32);
            Ok(())
        }))
    })
}

/// Modules reachable from `m0`, where `edges[i][j]` (j > i) means `mi` imports `mj`
fn reachable(edges: &[Vec<bool>]) -> BTreeSet<usize> {
    let mut seen = BTreeSet::new();
    let mut stack = vec![0];
    while let Some(i) = stack.pop() {
        if !seen.insert(i) {
            continue;
        }
        for (j, &edge) in edges[i].iter().enumerate() {
            if edge && j > i {
                stack.push(j);
            }
        }
    }
    seen
}

fn acyclic_graph() -> impl Strategy<Value = Vec<Vec<bool>>> {
    (1usize..10).prop_flat_map(|n| {
        proptest::collection::vec(proptest::collection::vec(any::<bool>(), n), n)
    })
}

proptest! {
    #[test]
    fn prop_dependencies_deduplicated(names in proptest::collection::vec("[a-e]", 0..20)) {
        let normalized = normalize_dependencies(names.clone());

        let unique: BTreeSet<&String> = normalized.iter().collect();
        prop_assert_eq!(unique.len(), normalized.len());

        let mut expected: Vec<String> = Vec::new();
        for n in &names {
            if !expected.contains(n) {
                expected.push(n.clone());
            }
        }
        prop_assert_eq!(normalized, expected);
    }

    #[test]
    fn prop_register_reports_normalized_list(names in proptest::collection::vec("[a-c]", 0..10)) {
        let mut loader = Loader::init();
        let registration = loader
            .register("root", names.clone(), Initializer::factory(|_, _, _| Ok(None)))
            .unwrap();

        prop_assert_eq!(registration.dependencies, normalize_dependencies(names));
    }

    #[test]
    fn prop_acyclic_declarative_load(edges in acyclic_graph()) {
        let n = edges.len();
        let log = EvalLog::new();
        let mut loader = Loader::init();

        for i in 0..n {
            let deps: Vec<String> = (i + 1..n).filter(|&j| edges[i][j]).map(name).collect();
            let count = deps.len();
            loader.register(&name(i), deps, graph_module(&log, i, count)).unwrap();
        }

        let root = loader.load("m0").unwrap();
        prop_assert_eq!(root.get("id").and_then(|v| v.as_number()), Some(0.0));

        let expected = reachable(&edges);
        let ran = log.entries();
        prop_assert_eq!(ran.len(), expected.len());
        for i in &expected {
            prop_assert_eq!(log.count(&name(*i)), 1);
        }
        for i in &expected {
            for j in (i + 1..n).filter(|&j| edges[*i][j]) {
                prop_assert!(log.position(&name(j)) < log.position(&name(*i)));
            }
        }
    }
}
