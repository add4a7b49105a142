//! Loop-invariant code motion. Pure computations whose operands do not
//! change across iterations move to the loop's preheader, which MIR
//! lowering materializes for exactly this purpose. Anything with
//! unresolved side-effect status, multiple definitions, or an operand
//! written inside the loop stays where it is.

use hashbrown::HashSet;

use crate::{
    middle::mir::{BlockId, Function, InstrKind, Instruction, LoopInfo, Operand},
    tachyon::{Dominators, Pass},
};

pub struct LoopInvariantCodeMotion;

impl Pass for LoopInvariantCodeMotion {
    fn name(&self) -> &'static str {
        "licm"
    }

    fn run(&self, function: &mut Function) -> bool {
        if function.loops.is_empty() {
            return false;
        }

        let dominators = Dominators::compute(function);
        let mut changed = false;

        for info in function.loops.clone() {
            changed |= hoist_loop(function, &info, &dominators);
        }

        changed
    }
}

/// The blocks belonging to a loop: everything reachable from the body
/// entry without crossing the header or the exit, plus the header itself.
fn loop_blocks(function: &Function, info: &LoopInfo, dominators: &Dominators) -> HashSet<BlockId> {
    let mut blocks = HashSet::new();
    blocks.insert(info.header);

    let mut stack = vec![info.body];
    while let Some(block) = stack.pop() {
        if block == info.exit || !dominators.dominates(info.header, block) {
            continue;
        }
        if !blocks.insert(block) {
            continue;
        }

        stack.extend(function.blocks[block].terminator.successors());
    }

    blocks
}

fn hoist_loop(function: &mut Function, info: &LoopInfo, dominators: &Dominators) -> bool {
    let blocks = loop_blocks(function, info, dominators);

    // Slots written anywhere inside the loop vary across iterations
    let mut defined_inside: HashSet<_> = HashSet::new();
    for block in &blocks {
        for instruction in &function.blocks[*block].instructions {
            if let Some(dst) = instruction.kind.dst() {
                defined_inside.insert(dst);
            }
        }
    }

    let def_counts = function.definition_counts();
    let mut hoisted: Vec<Instruction> = Vec::new();
    let mut hoisted_slots = HashSet::new();
    let mut changed = true;

    // One instruction's hoist can make another invariant, so sweep until
    // nothing moves
    while changed {
        changed = false;

        for block in &blocks {
            // The header's instructions compute the loop condition and are
            // re-evaluated every iteration by construction; leave them so
            // while-condition reconstruction stays intact
            if *block == info.header {
                continue;
            }

            let mut index = 0;
            while index < function.blocks[*block].instructions.len() {
                let instruction = &function.blocks[*block].instructions[index];

                if is_hoistable(
                    &instruction.kind,
                    &defined_inside,
                    &hoisted_slots,
                    &def_counts,
                ) {
                    let instruction = function.blocks[*block].instructions.remove(index);
                    if let Some(dst) = instruction.kind.dst() {
                        hoisted_slots.insert(dst);
                        defined_inside.remove(&dst);
                    }
                    hoisted.push(instruction);
                    changed = true;
                } else {
                    index += 1;
                }
            }
        }
    }

    if hoisted.is_empty() {
        return false;
    }

    function.blocks[info.preheader].instructions.extend(hoisted);
    true
}

fn is_hoistable(
    kind: &InstrKind,
    defined_inside: &HashSet<crate::middle::mir::SlotId>,
    hoisted_slots: &HashSet<crate::middle::mir::SlotId>,
    def_counts: &crate::index::IndexVec<crate::middle::mir::SlotId, usize>,
) -> bool {
    // Never move anything with unresolved side-effect status, and phis are
    // control-flow dependent by nature
    if kind.has_side_effects() || matches!(kind, InstrKind::Phi { .. }) {
        return false;
    }

    // Reads through an index or field depend on mutable storage; moving
    // them past a write would change what they see
    if matches!(
        kind,
        InstrKind::IndexRead { .. } | InstrKind::FieldRead { .. } | InstrKind::Copy { .. }
    ) {
        return false;
    }

    let Some(dst) = kind.dst() else {
        return false;
    };

    // The result must have a single definition overall; hoisting one of
    // several writes would reorder them
    if def_counts[dst] != 1 {
        return false;
    }

    kind.operands().iter().all(|operand| match operand {
        Operand::Const(_) => true,
        Operand::Slot(slot) => !defined_inside.contains(slot) || hoisted_slots.contains(slot),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frontend::ast::BinaryOperatorKind,
        tachyon::test_support::mir_function,
    };

    fn multiplies_in(function: &Function, block: BlockId) -> usize {
        function.blocks[block]
            .instructions
            .iter()
            .filter(|i| {
                matches!(
                    i.kind,
                    InstrKind::Binary {
                        op: BinaryOperatorKind::Multiply,
                        ..
                    }
                )
            })
            .count()
    }

    #[test]
    fn invariant_multiply_hoists_to_the_preheader_once() {
        let mut function = mir_function(
            "fn f(a: int, b: int, n: int) {\n  s <- 0L\n  for i in 1L..n {\n    x <- a * b\n    s <- s + x\n  }\n  s\n}\n",
        );

        assert!(LoopInvariantCodeMotion.run(&mut function));

        let info = function.loops[0].clone();
        assert_eq!(multiplies_in(&function, info.preheader), 1);
        assert_eq!(multiplies_in(&function, info.body), 0);

        // A second run must not move (or duplicate) anything
        assert!(!LoopInvariantCodeMotion.run(&mut function));
        assert_eq!(multiplies_in(&function, info.preheader), 1);
    }

    #[test]
    fn variant_operands_pin_the_instruction() {
        let mut function = mir_function(
            "fn f(a: int, n: int) {\n  s <- 0L\n  for i in 1L..n {\n    x <- a * i\n    s <- s + x\n  }\n  s\n}\n",
        );

        LoopInvariantCodeMotion.run(&mut function);

        let info = function.loops[0].clone();
        assert_eq!(
            multiplies_in(&function, info.preheader),
            0,
            "i changes every iteration"
        );
    }

    #[test]
    fn calls_with_side_effects_never_move() {
        let mut function = mir_function(
            "fn f(n: int) {\n  for i in 1L..n {\n    print(n)\n  }\n  n\n}\n",
        );

        assert!(!LoopInvariantCodeMotion.run(&mut function));
    }
}
