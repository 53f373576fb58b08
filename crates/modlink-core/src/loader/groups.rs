//! Partition of a module's pending dependency closure into linking groups.
//!
//! A module's group index counts the discipline switches separating it from
//! the root along its deepest path. Modules sharing an index share a
//! discipline, and edges only point to an equal or deeper group, so linking
//! groups from the deepest index up to zero always links a module's
//! other-discipline dependencies before the module itself.

use crate::error::{LoadError, Result};
use crate::registry::{Discipline, ModuleEntry, Registry};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

/// Linking groups computed for one `load` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkPlan {
    root: String,
    root_discipline: Discipline,
    groups: Vec<Vec<String>>,
}

impl LinkPlan {
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn groups(&self) -> &[Vec<String>] {
        &self.groups
    }

    /// Even groups share the root's discipline, odd groups use the other one
    pub fn discipline_of(&self, index: usize) -> Discipline {
        if index % 2 == 0 {
            self.root_discipline
        } else {
            self.root_discipline.flip()
        }
    }

    pub fn group_of(&self, name: &str) -> Option<usize> {
        self.groups
            .iter()
            .position(|group| group.iter().any(|member| member == name))
    }
}

struct GroupBuilder<'a> {
    registry: &'a Registry,
    indices: FxHashMap<&'a str, usize>,
    groups: Vec<Vec<&'a str>>,
}

/// A module whose dependencies are being walked
struct Visit<'a> {
    name: &'a str,
    entry: &'a ModuleEntry,
    next: usize,
}

impl<'a> GroupBuilder<'a> {
    /// Depth-first walk from `root` with an explicit stack
    fn walk(&mut self, root: &'a str) -> Result<()> {
        let registry = self.registry;
        let mut stack: Vec<Visit<'a>> = self.enter(root).into_iter().collect();

        while let Some(visit) = stack.last_mut() {
            let (name, entry) = (visit.name, visit.entry);
            let Some(dependency) = entry.dependencies.get(visit.next) else {
                stack.pop();
                continue;
            };
            visit.next += 1;

            let Some(dep_entry) = registry.get(dependency) else {
                continue;
            };
            if dep_entry.is_evaluated() {
                continue;
            }

            // Re-read: walking an earlier dependency may have moved this module deeper
            let parent_index = self.indices.get(name).copied().unwrap_or(0);
            let required =
                parent_index + usize::from(dep_entry.discipline() != entry.discipline());

            match self.indices.get(dependency.as_str()).copied() {
                Some(current) if current >= required => {}
                Some(current) => {
                    self.evict(dependency, current, required)?;
                    self.indices.insert(dependency, required);
                }
                None => {
                    self.indices.insert(dependency, required);
                }
            }

            stack.extend(self.enter(dependency));
        }
        Ok(())
    }

    /// Place `name` in the bucket of its current index; `None` if it is already there
    fn enter(&mut self, name: &'a str) -> Option<Visit<'a>> {
        let registry = self.registry;
        let entry = registry.get(name)?;
        let index = self.indices.get(name).copied().unwrap_or(0);
        if self.groups.len() <= index {
            self.groups.resize_with(index + 1, Vec::new);
        }
        if self.groups[index].contains(&name) {
            return None;
        }
        self.groups[index].push(name);
        Some(Visit {
            name,
            entry,
            next: 0,
        })
    }

    /// Take `name` out of its current bucket ahead of moving it deeper
    fn evict(&mut self, name: &str, from: usize, to: usize) -> Result<()> {
        let Some(bucket) = self.groups.get_mut(from) else {
            return Ok(());
        };
        let Some(position) = bucket.iter().position(|member| *member == name) else {
            return Ok(());
        };
        bucket.remove(position);

        if bucket.is_empty() {
            warn!(
                "Mixed dependency cycle: '{}' would need groups {} and {}",
                name, from, to
            );
            return Err(LoadError::MixedCycle {
                module: name.to_string(),
                from,
                to,
            });
        }
        Ok(())
    }
}

pub(crate) fn build_groups(registry: &Registry, root: &str) -> Result<LinkPlan> {
    let Some(root_entry) = registry.get(root) else {
        return Err(LoadError::ModuleNotFound {
            module: root.to_string(),
        });
    };

    let mut builder = GroupBuilder {
        registry,
        indices: FxHashMap::default(),
        groups: Vec::new(),
    };
    builder.indices.insert(root_entry.name(), 0);
    builder.walk(root_entry.name())?;

    let groups: Vec<Vec<String>> = builder
        .groups
        .into_iter()
        .map(|group| group.into_iter().map(str::to_string).collect())
        .collect();
    debug!(module = root, groups = ?groups, "built link groups");

    Ok(LinkPlan {
        root: root.to_string(),
        root_discipline: root_entry.discipline(),
        groups,
    })
}
