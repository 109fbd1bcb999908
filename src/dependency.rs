//! Dependency Resolver (spec §4.5): topological load order with cycle
//! detection, case-insensitive names, sorted by dependency depth then
//! module category so leaves initialize first.

use crate::error::{KernelError, Result};
use crate::model::{normalize, ModuleCategory};
use std::collections::HashMap;

/// One module's resolver-relevant facts: its name, the names of the modules
/// it depends on, and its advisory category.
#[derive(Clone, Debug)]
pub struct ModuleSpec {
    pub name: String,
    pub dependencies: Vec<String>,
    pub category: ModuleCategory,
}

impl ModuleSpec {
    pub fn new(
        name: impl Into<String>,
        dependencies: impl IntoIterator<Item = impl Into<String>>,
        category: ModuleCategory,
    ) -> Self {
        ModuleSpec {
            name: name.into(),
            dependencies: dependencies.into_iter().map(Into::into).collect(),
            category,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Computes a valid load order for `modules`: every module's dependencies
/// precede it, leaves (no dependencies) sort first, and ties are broken by
/// `ModuleCategory` (spec §4.5).
pub fn resolve(modules: &[ModuleSpec]) -> Result<Vec<String>> {
    let index_by_name: HashMap<String, usize> = modules
        .iter()
        .enumerate()
        .map(|(i, m)| (normalize(&m.name), i))
        .collect();

    for module in modules {
        let missing: Vec<String> = module
            .dependencies
            .iter()
            .filter(|dep| !index_by_name.contains_key(&normalize(dep)))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(KernelError::MissingDependencies {
                module: module.name.clone(),
                missing,
            });
        }
    }

    let n = modules.len();
    let mut colors = vec![Color::White; n];
    let mut depth = vec![0u32; n];
    let mut path = Vec::new();

    for start in 0..n {
        if colors[start] == Color::White {
            visit(modules, &index_by_name, start, &mut colors, &mut depth, &mut path)?;
        }
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        depth[a]
            .cmp(&depth[b])
            .then(modules[a].category.cmp(&modules[b].category))
            .then(a.cmp(&b))
    });

    Ok(order.into_iter().map(|i| modules[i].name.clone()).collect())
}

fn visit(
    modules: &[ModuleSpec],
    index_by_name: &HashMap<String, usize>,
    node: usize,
    colors: &mut [Color],
    depth: &mut [u32],
    path: &mut Vec<usize>,
) -> Result<()> {
    colors[node] = Color::Gray;
    path.push(node);

    let mut max_dep_depth: i64 = -1;
    for dep_name in &modules[node].dependencies {
        let dep = index_by_name[&normalize(dep_name)];
        match colors[dep] {
            Color::White => {
                visit(modules, index_by_name, dep, colors, depth, path)?;
                max_dep_depth = max_dep_depth.max(depth[dep] as i64);
            }
            Color::Gray => {
                let cycle_start = path.iter().position(|&n| n == dep).unwrap();
                let mut names: Vec<&str> = path[cycle_start..]
                    .iter()
                    .map(|&i| modules[i].name.as_str())
                    .collect();
                names.push(modules[dep].name.as_str());
                return Err(KernelError::CyclicDependency {
                    path: names.join(" -> "),
                });
            }
            Color::Black => {
                max_dep_depth = max_dep_depth.max(depth[dep] as i64);
            }
        }
    }

    depth[node] = (max_dep_depth + 1) as u32;
    colors[node] = Color::Black;
    path.pop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, deps: &[&str]) -> ModuleSpec {
        ModuleSpec::new(name, deps.iter().copied(), ModuleCategory::Control)
    }

    #[test]
    fn leaves_come_before_dependents() {
        let modules = vec![spec("gps", &[]), spec("nav", &["gps"]), spec("steer", &["nav"])];
        let order = resolve(&modules).unwrap();
        assert_eq!(order, vec!["gps", "nav", "steer"]);
    }

    #[test]
    fn names_are_case_insensitive() {
        let modules = vec![spec("GPS", &[]), spec("nav", &["gps"])];
        let order = resolve(&modules).unwrap();
        assert_eq!(order, vec!["GPS", "nav"]);
    }

    #[test]
    fn missing_dependency_is_reported() {
        let modules = vec![spec("nav", &["gps"])];
        let err = resolve(&modules).unwrap_err();
        assert!(matches!(err, KernelError::MissingDependencies { .. }));
    }

    #[test]
    fn cycle_is_detected() {
        let modules = vec![spec("a", &["b"]), spec("b", &["a"])];
        let err = resolve(&modules).unwrap_err();
        assert!(matches!(err, KernelError::CyclicDependency { .. }));
    }

    #[test]
    fn secondary_sort_is_by_category_within_equal_depth() {
        let modules = vec![
            ModuleSpec::new("logger", Vec::<&str>::new(), ModuleCategory::Logging),
            ModuleSpec::new("gps", Vec::<&str>::new(), ModuleCategory::Io),
        ];
        let order = resolve(&modules).unwrap();
        assert_eq!(order, vec!["gps", "logger"]);
    }
}
