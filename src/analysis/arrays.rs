//! Array disambiguation by loop-variant re-execution.
//!
//! A struct field and an array element look the same in a single traversal: both are a load
//! or store at `base + offset`. What differs is what happens on the next loop iteration. The
//! baseline pass cuts every phi back-edge with a `Cycle` placeholder, so a loop counter only
//! contributes its initial value. This module finds the loop-carried values, advances them by
//! one iteration ("seeds"), and compares the access log of the re-run against the baseline:
//! a site that reaches a new constant offset from the same base walks an array.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::{
    analysis::{AccessLog, ArraySite, ExprArena, ExprId, ExprNode},
    ir::{IrGraph, OpId, ValueId},
    utils::{component_index, strongly_connected_components},
    Result,
};

/// Returns the loop-carried operands among the resolved values.
///
/// Builds the operand-to-consumer graph over `resolved` and reports every phi operand that
/// lies in the phi's own strongly connected component, in ascending value order.
///
/// # Errors
///
/// Returns an error if a resolved value or its definition is unknown to the graph.
pub fn loop_variant_operands(
    graph: &dyn IrGraph,
    resolved: &HashMap<ValueId, Vec<ExprId>>,
) -> Result<Vec<ValueId>> {
    let mut values: Vec<ValueId> = resolved.keys().copied().collect();
    values.sort_unstable();
    let position: HashMap<ValueId, usize> =
        values.iter().enumerate().map(|(i, &v)| (v, i)).collect();

    let mut successors = vec![Vec::new(); values.len()];
    for (consumer, &value) in values.iter().enumerate() {
        if let Some(op) = graph.definition(value)? {
            for input in &op.inputs {
                if let Some(&producer) = position.get(input) {
                    successors[producer].push(consumer);
                }
            }
        }
    }

    let sccs = strongly_connected_components(&successors);
    let component = component_index(values.len(), &sccs);

    let mut variants = BTreeSet::new();
    for (i, &value) in values.iter().enumerate() {
        if !graph.value(value)?.is_phi() {
            continue;
        }
        let Some(op) = graph.definition(value)? else {
            continue;
        };
        for input in &op.inputs {
            if let Some(&j) = position.get(input) {
                if component[j] == component[i] {
                    variants.insert(*input);
                }
            }
        }
    }

    Ok(variants.into_iter().collect())
}

/// Computes the next-iteration seeds of the loop-carried operands.
///
/// Every `Cycle(w)` leaf in a loop-variant operand's baseline binding is replaced by each
/// acyclic baseline candidate of `w`. Results not already part of the binding become seeds.
///
/// # Errors
///
/// Returns an error if the graph cannot answer a lookup.
pub fn loop_variant_seeds(
    graph: &dyn IrGraph,
    arena: &ExprArena,
    baseline: &HashMap<ValueId, Vec<ExprId>>,
    node_limit: usize,
) -> Result<HashMap<ValueId, Vec<ExprId>>> {
    let acyclic = |value: ValueId| -> Vec<ExprId> {
        baseline
            .get(&value)
            .map(|exprs| {
                exprs
                    .iter()
                    .copied()
                    .filter(|&e| !arena.contains_cycle(e))
                    .collect()
            })
            .unwrap_or_default()
    };

    let mut seeds = HashMap::new();
    for operand in loop_variant_operands(graph, baseline)? {
        let Some(binding) = baseline.get(&operand) else {
            continue;
        };

        let mut advanced = Vec::new();
        for &expr in binding {
            if !arena.contains_cycle(expr) {
                continue;
            }
            let (results, _) = arena.substitute(expr, node_limit, |leaf| match *leaf {
                ExprNode::Cycle { value, .. } => {
                    let prior = acyclic(value);
                    (!prior.is_empty()).then_some(prior)
                }
                _ => None,
            });
            for result in results {
                if !binding.contains(&result) && !advanced.contains(&result) {
                    advanced.push(result);
                }
            }
        }

        if !advanced.is_empty() {
            log::trace!("{} seeded with {} next-iteration candidate(s)", operand, advanced.len());
            seeds.insert(operand, advanced);
        }
    }

    Ok(seeds)
}

/// Classifies access sites as array walks by comparing the two passes' logs.
///
/// A loop-variant access at site `S` with constant offset `o` from base `B` flags `S` when the
/// baseline log has accesses at `S` from `B` but none at `o`. The stride is the smallest
/// positive distance between `o` and the baseline offsets.
#[must_use]
pub fn classify(
    arena: &ExprArena,
    baseline: &AccessLog,
    variant: &AccessLog,
) -> BTreeMap<OpId, ArraySite> {
    let mut known: HashMap<(OpId, ExprId), BTreeSet<i64>> = HashMap::new();
    for access in baseline {
        let (base, offset) = access.base_offset(arena);
        known.entry((access.site, base)).or_default().insert(offset);
    }

    let mut sites: BTreeMap<OpId, ArraySite> = BTreeMap::new();
    for access in variant {
        let (base, offset) = access.base_offset(arena);
        let Some(offsets) = known.get(&(access.site, base)) else {
            continue;
        };
        if offsets.contains(&offset) {
            continue;
        }
        let Some(stride) = offsets
            .iter()
            .map(|&o| offset.wrapping_sub(o).unsigned_abs())
            .filter(|&d| d > 0)
            .min()
        else {
            continue;
        };

        sites
            .entry(access.site)
            .and_modify(|site| site.stride = site.stride.min(stride))
            .or_insert(ArraySite { stride });
    }

    for (site, array) in &sites {
        log::debug!("{} walks an array with stride {}", site, array.stride);
    }

    sites
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{DependencyResolver, OpaqueCalls, Pass},
        ir::{FunctionId, ProgramBuilder},
        test::counting_loop,
    };

    fn run(
        program: &crate::ir::Program,
        arena: &ExprArena,
        f: FunctionId,
        store: OpId,
        seeds: HashMap<ValueId, Vec<ExprId>>,
        pass: Pass,
    ) -> (HashMap<ValueId, Vec<ExprId>>, AccessLog) {
        let mut resolver = DependencyResolver::new(program, arena, f, 32, pass)
            .unwrap()
            .with_seeds(seeds);
        resolver.evaluate_effect(store, &mut OpaqueCalls).unwrap();
        let (bindings, log, _) = resolver.into_parts();
        (bindings, log)
    }

    #[test]
    fn test_loop_variant_operand_found() {
        let (program, f, store) = counting_loop(4, 1);
        let arena = ExprArena::new();
        let (bindings, _) = run(&program, &arena, f, store, HashMap::new(), Pass::Baseline);

        let variants = loop_variant_operands(&program, &bindings).unwrap();
        assert_eq!(variants.len(), 1);
        let next = variants[0];
        assert!(!program.value(next).unwrap().is_phi());

        let seeds = loop_variant_seeds(&program, &arena, &bindings, 32).unwrap();
        assert_eq!(seeds[&next], vec![arena.constant(1, 8)]);
    }

    #[test]
    fn test_strided_walk_is_array() {
        let (program, f, store) = counting_loop(4, 1);
        let arena = ExprArena::new();
        let (bindings, l1) = run(&program, &arena, f, store, HashMap::new(), Pass::Baseline);
        let seeds = loop_variant_seeds(&program, &arena, &bindings, 32).unwrap();
        let (_, l2) = run(&program, &arena, f, store, seeds, Pass::LoopVariant);

        let sites = classify(&arena, &l1, &l2);
        assert_eq!(sites.get(&store), Some(&ArraySite { stride: 4 }));
    }

    #[test]
    fn test_identical_offsets_stay_scalar() {
        let (program, f, store) = counting_loop(4, 0);
        let arena = ExprArena::new();
        let (bindings, l1) = run(&program, &arena, f, store, HashMap::new(), Pass::Baseline);
        let seeds = loop_variant_seeds(&program, &arena, &bindings, 32).unwrap();
        let (_, l2) = run(&program, &arena, f, store, seeds, Pass::LoopVariant);

        assert!(classify(&arena, &l1, &l2).is_empty());
    }

    #[test]
    fn test_straight_line_code_has_no_variants() {
        let mut b = ProgramBuilder::new();
        let f = b.function("f", &[8]);
        let p = b.param(f, 0).unwrap();
        let v = b.load(f, p, 8).unwrap();
        let program = b.build();

        let arena = ExprArena::new();
        let mut resolver = DependencyResolver::new(&program, &arena, f, 32, Pass::Baseline).unwrap();
        resolver.lookup(v, &mut OpaqueCalls).unwrap();
        assert!(loop_variant_operands(&program, resolver.bindings())
            .unwrap()
            .is_empty());
    }
}
