//! Common-subexpression elimination. A recomputation of a structurally
//! identical, side-effect-free expression is replaced with a copy of the
//! earlier result when the earlier computation dominates it. Only values
//! built from stable slots (defined at most once in the whole function)
//! participate; anything touched by a second assignment is left alone.

use hashbrown::HashMap;

use crate::{
    index::IndexVec,
    middle::mir::{Function, InstrKind, Operand, SlotId},
    tachyon::{Dominators, Pass},
};

pub struct CommonSubexpressionElimination;

impl Pass for CommonSubexpressionElimination {
    fn name(&self) -> &'static str {
        "cse"
    }

    fn run(&self, function: &mut Function) -> bool {
        let def_counts = function.definition_counts();
        let dominators = Dominators::compute(function);
        let children = dominators.tree_children(function);

        let mut changed = false;

        // Walk the dominator tree; each path down the tree carries its own
        // view of the available expressions
        let mut stack = vec![(function.entry(), HashMap::<String, SlotId>::new())];

        while let Some((block, mut available)) = stack.pop() {
            for index in 0..function.blocks[block].instructions.len() {
                let Some((key, dst)) =
                    expression_key(&function.blocks[block].instructions[index].kind, &def_counts)
                else {
                    continue;
                };

                match available.get(&key) {
                    Some(prior) if *prior != dst => {
                        function.blocks[block].instructions[index].kind = InstrKind::Copy {
                            dst,
                            src: Operand::Slot(*prior),
                        };
                        changed = true;
                    }
                    Some(_) => {}
                    None => {
                        available.insert(key, dst);
                    }
                }
            }

            for child in &children[block] {
                stack.push((*child, available.clone()));
            }
        }

        changed
    }
}

/// A structural key for an instruction eligible for elimination, plus its
/// destination. `None` when the instruction must not participate.
fn expression_key(
    kind: &InstrKind,
    def_counts: &IndexVec<SlotId, usize>,
) -> Option<(String, SlotId)> {
    let stable = |operand: &Operand| match operand {
        Operand::Const(_) => true,
        Operand::Slot(slot) => def_counts[*slot] <= 1,
    };

    let render = |operand: &Operand| match operand {
        Operand::Const(constant) => format!("c{constant:?}"),
        Operand::Slot(slot) => format!("s{slot:?}"),
    };

    let (dst, key) = match kind {
        InstrKind::Binary {
            dst,
            op,
            lhs,
            rhs,
            kind,
        } if stable(lhs) && stable(rhs) => (
            *dst,
            format!("bin:{op:?}:{kind:?}:{}:{}", render(lhs), render(rhs)),
        ),
        InstrKind::Unary {
            dst,
            op,
            operand,
            kind,
        } if stable(operand) => (*dst, format!("un:{op:?}:{kind:?}:{}", render(operand))),
        InstrKind::Range { dst, start, end } if stable(start) && stable(end) => {
            (*dst, format!("range:{}:{}", render(start), render(end)))
        }
        InstrKind::Call {
            dst: Some(dst),
            callee,
            args,
            pure: true,
        } if args.iter().all(stable) => {
            let args: Vec<_> = args.iter().map(render).collect();
            (*dst, format!("call:{callee:?}:{}", args.join(":")))
        }
        _ => return None,
    };

    // The destination itself must be written exactly once, or a later
    // reader could observe the wrong generation of the value
    (def_counts[dst] == 1).then_some((key, dst))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tachyon::test_support::mir_function;

    fn count_binaries(function: &Function) -> usize {
        function
            .blocks
            .iter()
            .flat_map(|block| &block.instructions)
            .filter(|i| matches!(i.kind, InstrKind::Binary { .. }))
            .count()
    }

    #[test]
    fn repeated_pure_expression_collapses_to_a_copy() {
        let mut function = mir_function(
            "fn f(a: int, b: int) {\n  x <- a * b\n  y <- a * b\n  x + y\n}\n",
        );

        let before = count_binaries(&function);
        assert!(CommonSubexpressionElimination.run(&mut function));
        assert_eq!(count_binaries(&function), before - 1);
    }

    #[test]
    fn reassigned_operands_block_elimination() {
        let mut function = mir_function(
            "fn f(a: int, b: int) {\n  a2 <- a\n  x <- a2 * b\n  a2 <- a2 + 1L\n  y <- a2 * b\n  x + y\n}\n",
        );

        let before = count_binaries(&function);
        CommonSubexpressionElimination.run(&mut function);
        assert_eq!(
            count_binaries(&function),
            before,
            "a2 changes between the two multiplies"
        );
    }

    #[test]
    fn sibling_branches_do_not_share_expressions() {
        let mut function = mir_function(
            "fn f(c: bool, a: int, b: int) {\n  x <- 0L\n  if (c) {\n    x <- a * b\n  } else {\n    x <- a * b\n  }\n  x\n}\n",
        );

        let before = count_binaries(&function);
        CommonSubexpressionElimination.run(&mut function);
        assert_eq!(
            count_binaries(&function),
            before,
            "neither arm dominates the other"
        );
    }

    #[test]
    fn pure_calls_are_eliminated_when_dominated() {
        let mut function = mir_function(
            "fn f(n: int) {\n  a <- seq_len(n)\n  b <- seq_len(n)\n  length(a) + length(b)\n}\n",
        );

        assert!(CommonSubexpressionElimination.run(&mut function));
    }
}
