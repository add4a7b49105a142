//! Tachyon, the optimization pipeline. A pass is a pure transformation of
//! one MIR function that reports whether it changed anything; the scheduler
//! runs the enabled pass list to a fixed point under a hard iteration cap,
//! so two passes that keep undoing each other still terminate. Every pass
//! is conservative: when safety cannot be proven the MIR is left alone.

use std::sync::Arc;

use hashbrown::HashSet;

use crate::{
    index::{Index, IndexVec},
    middle::{
        hir::FnId,
        mir::{self, BlockId, Callee, Function, InstrKind},
    },
};

pub mod const_fold;
pub mod cse;
pub mod dce;
pub mod inline;
pub mod licm;
pub mod vectorize;

pub use const_fold::ConstFold;
pub use cse::CommonSubexpressionElimination;
pub use dce::DeadCodeElimination;
pub use inline::Inline;
pub use licm::LoopInvariantCodeMotion;
pub use vectorize::VectorizePreference;

/// How hard the optimizer works, selected by `-O0`/`-O1`/`-O2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptLevel {
    None,
    Basic,
    #[default]
    Full,
}

impl OptLevel {
    pub fn iteration_cap(&self) -> usize {
        match self {
            OptLevel::None => 0,
            OptLevel::Basic => 4,
            OptLevel::Full => 8,
        }
    }

    pub fn passes(&self, snapshot: Arc<ProgramSnapshot>) -> Vec<Box<dyn Pass + Send + Sync>> {
        match self {
            OptLevel::None => Vec::new(),
            OptLevel::Basic => vec![
                Box::new(ConstFold) as Box<dyn Pass + Send + Sync>,
                Box::new(DeadCodeElimination),
            ],
            OptLevel::Full => vec![
                Box::new(ConstFold) as Box<dyn Pass + Send + Sync>,
                Box::new(CommonSubexpressionElimination),
                Box::new(LoopInvariantCodeMotion),
                Box::new(VectorizePreference),
                Box::new(Inline::new(snapshot)),
                Box::new(DeadCodeElimination),
            ],
        }
    }
}

/// A single optimization over one function. Stateless between runs; any
/// analysis a pass needs it computes itself.
pub trait Pass {
    fn name(&self) -> &'static str;

    /// Transforms the function in place, returning true if anything changed.
    fn run(&self, function: &mut Function) -> bool;
}

/// Pristine pre-optimization MIR of the whole module, shared read-only with
/// the inliner across worker threads.
#[derive(Debug)]
pub struct ProgramSnapshot {
    pub functions: IndexVec<FnId, Function>,
    /// Functions that can (directly or transitively) call themselves
    pub recursive: HashSet<FnId>,
}

impl ProgramSnapshot {
    pub fn new(functions: IndexVec<FnId, Function>) -> Self {
        let callees: IndexVec<FnId, Vec<FnId>> = IndexVec::from_raw(
            functions
                .iter()
                .map(|function| {
                    let mut called = Vec::new();
                    for block in function.blocks.iter() {
                        for instruction in &block.instructions {
                            if let InstrKind::Call {
                                callee: Callee::Fn(id),
                                ..
                            } = &instruction.kind
                            {
                                called.push(*id);
                            }
                        }
                    }
                    called
                })
                .collect(),
        );

        let mut recursive = HashSet::new();
        for start in functions.indices() {
            let mut stack = callees[start].clone();
            let mut seen = HashSet::new();

            while let Some(next) = stack.pop() {
                if next == start {
                    recursive.insert(start);
                    break;
                }
                if seen.insert(next) && next.index() < callees.len() {
                    stack.extend(callees[next].iter().copied());
                }
            }
        }

        Self {
            functions,
            recursive,
        }
    }
}

/// Runs the pass list to a fixed point, capped. Unreachable blocks produced
/// by branch folding are purged between iterations so the CFG invariants
/// hold when the next pass (or the code generator) looks at the graph.
pub fn optimize(function: &mut Function, passes: &[Box<dyn Pass + Send + Sync>], cap: usize) {
    for iteration in 0..cap {
        let mut changed = false;

        for pass in passes {
            let pass_changed = pass.run(function);
            if pass_changed {
                log::trace!(
                    "tachyon: {} changed `{}` (iteration {iteration})",
                    pass.name(),
                    function.name
                );
            }
            changed |= pass_changed;
        }

        changed |= mir::purge_unreachable_blocks(function);

        if !changed {
            log::debug!(
                "tachyon: `{}` reached a fixed point after {} iteration(s)",
                function.name,
                iteration + 1
            );
            return;
        }
    }

    if cap > 0 {
        log::debug!(
            "tachyon: `{}` hit the iteration cap of {cap}",
            function.name
        );
    }
}

/// Immediate dominators, computed with the standard iterative algorithm
/// over a reverse postorder. Graphs here are tiny, so the simple quadratic
/// intersection is plenty.
pub struct Dominators {
    idom: IndexVec<BlockId, Option<BlockId>>,
}

impl Dominators {
    pub fn compute(function: &Function) -> Self {
        let entry = function.entry();
        let preds = function.predecessors();

        // Reverse postorder
        let mut order = Vec::new();
        let mut seen: HashSet<BlockId> = HashSet::new();
        let mut stack = vec![(entry, false)];
        while let Some((block, processed)) = stack.pop() {
            if processed {
                order.push(block);
                continue;
            }
            if !seen.insert(block) {
                continue;
            }
            stack.push((block, true));
            for successor in function.blocks[block].terminator.successors() {
                if !seen.contains(&successor) {
                    stack.push((successor, false));
                }
            }
        }
        order.reverse();

        let mut position: IndexVec<BlockId, usize> =
            IndexVec::from_raw(vec![usize::MAX; function.blocks.len()]);
        for (i, block) in order.iter().enumerate() {
            position[*block] = i;
        }

        let mut idom: IndexVec<BlockId, Option<BlockId>> =
            IndexVec::from_raw(vec![None; function.blocks.len()]);
        idom[entry] = Some(entry);

        let mut changed = true;
        while changed {
            changed = false;

            for block in order.iter().copied().skip(1) {
                let mut new_idom: Option<BlockId> = None;

                for pred in preds[block].iter().copied() {
                    if idom[pred].is_none() {
                        continue;
                    }

                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => Self::intersect(&idom, &position, pred, current),
                    });
                }

                if let Some(new_idom) = new_idom {
                    if idom[block] != Some(new_idom) {
                        idom[block] = Some(new_idom);
                        changed = true;
                    }
                }
            }
        }

        Self { idom }
    }

    fn intersect(
        idom: &IndexVec<BlockId, Option<BlockId>>,
        position: &IndexVec<BlockId, usize>,
        mut a: BlockId,
        mut b: BlockId,
    ) -> BlockId {
        while a != b {
            while position[a] > position[b] {
                a = idom[a].expect("processed block has an idom");
            }
            while position[b] > position[a] {
                b = idom[b].expect("processed block has an idom");
            }
        }
        a
    }

    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        if block == BlockId::ENTRY {
            return None;
        }

        self.idom.get(block).copied().flatten()
    }

    /// Whether `a` dominates `b`
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut current = b;
        loop {
            if current == a {
                return true;
            }

            match self.idom.get(current).copied().flatten() {
                Some(idom) if idom != current => current = idom,
                _ => return false,
            }
        }
    }

    /// Children of each block in the dominator tree
    pub fn tree_children(&self, function: &Function) -> IndexVec<BlockId, Vec<BlockId>> {
        let mut children: IndexVec<BlockId, Vec<BlockId>> =
            IndexVec::from_raw(vec![Vec::new(); function.blocks.len()]);

        for block in function.blocks.indices() {
            if block == function.entry() {
                continue;
            }
            if let Some(idom) = self.idom.get(block).copied().flatten() {
                if idom != block {
                    children[idom].push(block);
                }
            }
        }

        children
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use test_support::mir_function;

    #[test]
    fn dominators_of_a_diamond() {
        let function = mir_function(
            "fn f(x: int) {\n  if (x > 1L) {\n    print(x)\n  } else {\n    print(0L)\n  }\n  x\n}\n",
        );

        let dominators = Dominators::compute(&function);
        let entry = function.entry();

        for block in function.blocks.indices() {
            assert!(dominators.dominates(entry, block));
        }

        // Neither arm dominates the merge block
        let merge = BlockId::new(function.blocks.len() - 1);
        let then_block = BlockId::new(1);
        assert!(!dominators.dominates(then_block, merge));
    }

    #[test]
    fn scheduler_stops_at_fixed_point() {
        struct Nop;
        impl Pass for Nop {
            fn name(&self) -> &'static str {
                "nop"
            }
            fn run(&self, _function: &mut Function) -> bool {
                false
            }
        }

        let mut function = mir_function("fn f(a) {\n  a + 1L\n}\n");
        let passes: Vec<Box<dyn Pass + Send + Sync>> = vec![Box::new(Nop)];

        // Would loop to the cap if the changed flag were ignored
        optimize(&mut function, &passes, 1000);
    }
}
