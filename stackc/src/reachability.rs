//! Dead-code analysis over the direct call graph.

use std::collections::HashSet;

use crate::{ProcId, ProcedureRegistry};

/// Every procedure reachable from `roots`, the roots included.
pub fn compute_used(
    roots: impl IntoIterator<Item = ProcId>,
    procs: &ProcedureRegistry,
) -> HashSet<ProcId> {
    let mut used = HashSet::new();
    let mut work = Vec::new();

    for root in roots {
        if used.insert(root) {
            work.push(root);
        }
    }

    while let Some(id) = work.pop() {
        for &callee in &procs.get(id).calls {
            if used.insert(callee) {
                work.push(callee);
            }
        }
    }

    used
}

/// Procedures reachable by following at least one call edge from `proc`.
/// `proc` itself is only included when it can reach itself.
pub fn reachable_from(proc: ProcId, procs: &ProcedureRegistry) -> HashSet<ProcId> {
    compute_used(procs.get(proc).calls.iter().copied(), procs)
}
