//! Dead-code elimination. An instruction is removed only when its result is
//! never read anywhere and it provably has no observable side effect; calls
//! count as side-effecting unless their callee is whitelisted pure, and
//! writes through indices or fields are never touched.

use hashbrown::HashSet;

use crate::{
    middle::mir::{Function, LoopKind, SlotId, Terminator},
    tachyon::Pass,
};

pub struct DeadCodeElimination;

impl Pass for DeadCodeElimination {
    fn name(&self) -> &'static str {
        "dce"
    }

    fn run(&self, function: &mut Function) -> bool {
        let mut changed = false;

        // Removing one dead instruction can free up another, so sweep until
        // nothing moves
        loop {
            let used = used_slots(function);

            let mut removed_any = false;
            for block in function.blocks.iter_mut() {
                let before = block.instructions.len();

                block.instructions.retain(|instruction| {
                    if instruction.kind.has_side_effects() {
                        return true;
                    }

                    match instruction.kind.dst() {
                        Some(dst) => used.contains(&dst),
                        // A pure instruction with no destination computes
                        // nothing anyone can see
                        None => false,
                    }
                });

                removed_any |= block.instructions.len() != before;
            }

            if !removed_any {
                break;
            }
            changed = true;
        }

        changed
    }
}

/// Every slot read by any instruction, terminator, or loop record
fn used_slots(function: &Function) -> HashSet<SlotId> {
    let mut used = HashSet::new();

    for block in function.blocks.iter() {
        for instruction in &block.instructions {
            used.extend(instruction.kind.used_slots());
        }

        match &block.terminator {
            Terminator::Branch { condition, .. } => {
                used.extend(condition.as_slot());
            }
            Terminator::Return(Some(value)) => {
                used.extend(value.as_slot());
            }
            _ => {}
        }
    }

    // Loop records feed codegen (`for (var in rr_seq(start, end))`), so
    // their slots stay live
    for info in &function.loops {
        if let LoopKind::For { var, start, end } = &info.kind {
            used.insert(*var);
            used.extend(start.as_slot());
            used.extend(end.as_slot());
        }
    }

    used
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        middle::mir::{Callee, InstrKind},
        tachyon::test_support::mir_function,
    };

    #[test]
    fn unused_pure_results_are_removed() {
        let mut function = mir_function(
            "fn f(a: int) {\n  dead <- a * 2L\n  a\n}\n",
        );

        assert!(DeadCodeElimination.run(&mut function));

        let remaining: usize = function
            .blocks
            .iter()
            .map(|block| block.instructions.len())
            .sum();
        assert_eq!(remaining, 0, "the dead multiply must be gone");
    }

    #[test]
    fn impure_calls_survive_even_when_unread() {
        let mut function = mir_function(
            "fn f(a: int) {\n  print(a)\n  a\n}\n",
        );

        DeadCodeElimination.run(&mut function);

        let call_survives = function
            .blocks
            .iter()
            .flat_map(|block| &block.instructions)
            .any(|i| {
                matches!(
                    i.kind,
                    InstrKind::Call {
                        callee: Callee::Builtin(_),
                        pure: false,
                        ..
                    }
                )
            });
        assert!(call_survives, "print has observable output");
    }

    #[test]
    fn unread_pure_call_result_is_removed() {
        let mut function = mir_function(
            "fn f(n: int) {\n  unused <- seq_len(n)\n  n\n}\n",
        );

        assert!(DeadCodeElimination.run(&mut function));

        let any_call = function
            .blocks
            .iter()
            .flat_map(|block| &block.instructions)
            .any(|i| matches!(i.kind, InstrKind::Call { .. }));
        assert!(!any_call);
    }

    #[test]
    fn index_writes_are_never_removed() {
        let mut function = mir_function(
            "fn f(n: int) {\n  v <- seq_len(n)\n  v[1L] <- 0L\n  n\n}\n",
        );

        DeadCodeElimination.run(&mut function);

        let write_survives = function
            .blocks
            .iter()
            .flat_map(|block| &block.instructions)
            .any(|i| matches!(i.kind, InstrKind::IndexWrite { .. }));
        assert!(write_survives, "stores have unresolved side-effect status");
    }
}
