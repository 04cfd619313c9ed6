//! Randomized checks of the resolver ordering guarantees

use modlink::{Category, Module, ModlinkError, Registry, Resolver};
use std::collections::{HashMap, HashSet};

const SEEDS: u64 = 64;

fn name(i: usize) -> String {
    format!("m{:03}", i)
}

/// Random DAG: every edge points from a higher index to a lower one
fn random_dag(rng: &mut fastrand::Rng, size: usize) -> Vec<Module> {
    let mut modules: Vec<Module> = (0..size)
        .map(|i| {
            let category = Category::ALL[rng.usize(..Category::ALL.len())];
            let mut module = Module::new(name(i), category);
            if i > 0 {
                for _ in 0..rng.usize(0..=3) {
                    module = module.with_dep(name(rng.usize(0..i)));
                }
            }
            module
        })
        .collect();
    // Registration order must not matter
    rng.shuffle(&mut modules);
    modules
}

#[test]
fn test_acyclic_graphs_resolve_to_valid_groups() {
    for seed in 0..SEEDS {
        let mut rng = fastrand::Rng::with_seed(seed);
        let size = rng.usize(1..40);
        let modules = random_dag(&mut rng, size);
        let deps: HashMap<String, Vec<String>> = modules
            .iter()
            .map(|m| (m.id.clone(), m.dependencies.iter().cloned().collect()))
            .collect();
        let registry = Registry::from_modules(modules).unwrap();

        let request: Vec<String> = (0..rng.usize(1..=size.min(5)))
            .map(|_| name(rng.usize(0..size)))
            .collect();
        let groups = Resolver::new(&registry).resolve(request.iter()).unwrap();
        let closure = Resolver::new(&registry).closure(request.iter()).unwrap();

        let mut group_of = HashMap::new();
        for group in &groups {
            assert!(!group.is_empty(), "seed {seed}: empty group");
            let mut sorted = group.modules.clone();
            sorted.sort();
            assert_eq!(sorted, group.modules, "seed {seed}: group not sorted");
            for id in &group.modules {
                assert!(
                    group_of.insert(id.clone(), group.index).is_none(),
                    "seed {seed}: {id} placed twice"
                );
            }
        }

        let placed: HashSet<&String> = group_of.keys().collect();
        let expected: HashSet<&String> = closure.keys().collect();
        assert_eq!(placed, expected, "seed {seed}: placed set differs from closure");

        for (id, group) in &group_of {
            for dep in &deps[id] {
                assert!(
                    group_of[dep] < *group,
                    "seed {seed}: {dep} must load before {id}"
                );
            }
        }
    }
}

#[test]
fn test_cycles_never_produce_partial_ordering() {
    for seed in 0..SEEDS {
        let mut rng = fastrand::Rng::with_seed(seed);
        let size = rng.usize(3..30);
        let mut modules = random_dag(&mut rng, size);

        // Close a cycle through an edge from a low index back to a high one
        let low = rng.usize(0..size - 1);
        let high = rng.usize(low + 1..size);
        let low_id = name(low);
        let high_id = name(high);
        let ring_start = modules.iter().position(|m| m.id == low_id).unwrap();
        modules[ring_start] = modules[ring_start].clone().with_dep(name(high));
        // Guarantee the path high -> low exists
        let ring_end = modules.iter().position(|m| m.id == high_id).unwrap();
        modules[ring_end] = modules[ring_end].clone().with_dep(name(low));

        let registry = Registry::from_modules(modules).unwrap();
        let all = registry.ids();
        match Resolver::new(&registry).resolve(all.iter()) {
            Err(ModlinkError::CycleDetected { ids }) => {
                assert!(ids.contains(&low_id), "seed {seed}: {low_id} missing from {ids:?}");
                assert!(ids.contains(&high_id), "seed {seed}: {high_id} missing from {ids:?}");
                let mut sorted = ids.clone();
                sorted.sort();
                assert_eq!(sorted, ids);
            }
            other => panic!("seed {seed}: expected cycle, got {other:?}"),
        }
    }
}
