//! Vectorization-preference rewrite. A scalar loop over an indexable
//! aggregate becomes one vector-wide R operation, but only for loop shapes
//! on a strict whitelist where equivalence is provable: the trip count must
//! equal the subject vector's length (via a `length`/`seq_len` definition
//! chain), every instruction in the body must be accounted for, and nothing
//! the loop defines may be observable after it. Everything else is left
//! untouched.

use hashbrown::{HashMap, HashSet};

use crate::{
    frontend::{ast::BinaryOperatorKind, lexer::Span},
    index::IndexVec,
    middle::{
        hir::Builtin,
        mir::{
            BlockId, Callee, Constant, Function, InstrKind, Instruction, LoopInfo, LoopKind,
            Operand, SlotId, Terminator, ValueKind,
        },
    },
    tachyon::{Dominators, Pass},
};

pub struct VectorizePreference;

impl Pass for VectorizePreference {
    fn name(&self) -> &'static str {
        "vectorize"
    }

    fn run(&self, function: &mut Function) -> bool {
        // One rewrite per run; the scheduler iterates to pick up the rest
        for info in function.loops.clone() {
            if try_rewrite(function, &info) {
                return true;
            }
        }

        false
    }
}

enum Rewrite {
    /// `acc <- acc + sum(vector)` replaces the whole loop
    Sum {
        vector: SlotId,
        acc: SlotId,
        span: Span,
    },
    /// `target <- lhs op rhs` (vector-wide) replaces the whole loop
    Map {
        lhs: Operand,
        rhs: Operand,
        op: BinaryOperatorKind,
        target: SlotId,
        span: Span,
    },
}

fn try_rewrite(function: &mut Function, info: &LoopInfo) -> bool {
    let Some(rewrite) = plan_rewrite(function, info) else {
        return false;
    };

    match rewrite {
        Rewrite::Sum { vector, acc, span } => {
            let sum = function.new_temp(function.slots[acc].ty.clone());
            let preheader = &mut function.blocks[info.preheader];
            preheader.instructions.push(Instruction {
                kind: InstrKind::Call {
                    dst: Some(sum),
                    callee: Callee::Builtin(Builtin::Sum),
                    args: vec![Operand::Slot(vector)],
                    pure: true,
                },
                span,
            });
            preheader.instructions.push(Instruction {
                kind: InstrKind::Binary {
                    dst: acc,
                    op: BinaryOperatorKind::Add,
                    lhs: Operand::Slot(acc),
                    rhs: Operand::Slot(sum),
                    kind: ValueKind::Scalar,
                },
                span,
            });
            preheader.terminator = Terminator::Goto(info.exit);
        }
        Rewrite::Map {
            lhs,
            rhs,
            op,
            target,
            span,
        } => {
            let preheader = &mut function.blocks[info.preheader];
            preheader.instructions.push(Instruction {
                kind: InstrKind::Binary {
                    dst: target,
                    op,
                    lhs,
                    rhs,
                    kind: ValueKind::Vector,
                },
                span,
            });
            preheader.terminator = Terminator::Goto(info.exit);
        }
    }

    true
}

/// Decides whether the loop matches a whitelisted shape, with the function
/// borrowed read-only. `None` means leave the loop alone.
fn plan_rewrite(function: &Function, info: &LoopInfo) -> Option<Rewrite> {
    let LoopKind::For { var, start, end } = &info.kind else {
        return None;
    };
    let var = *var;

    // Counted from one, body in a single block that falls into the latch
    if *start != Operand::Const(Constant::Int(1)) {
        return None;
    }
    let latch = info.latch?;
    if !matches!(
        function.blocks[info.body].terminator,
        Terminator::Goto(target) if target == latch
    ) {
        return None;
    }

    let Operand::Slot(limit) = end else {
        return None;
    };
    let limit = *limit;

    let def_counts = function.definition_counts();
    let use_counts = use_counts(function);
    let dominators = Dominators::compute(function);
    let loop_set = loop_block_set(function, info, &dominators);

    // Values the loop computes must die with it
    let observable_outside = |slot: SlotId| slot_used_outside(function, slot, &loop_set);
    if observable_outside(var) {
        return None;
    }

    let body: &[Instruction] = &function.blocks[info.body].instructions;

    // Shape A: sum reduction  acc <- acc + v[i]
    if let [read, add] = body {
        if let (
            InstrKind::IndexRead {
                dst: element,
                base: Operand::Slot(vector),
                index: Operand::Slot(index),
            },
            InstrKind::Binary {
                dst: acc,
                op: BinaryOperatorKind::Add,
                lhs,
                rhs,
                kind: ValueKind::Scalar,
            },
        ) = (&read.kind, &add.kind)
        {
            let accumulates = (*lhs == Operand::Slot(*acc) && *rhs == Operand::Slot(*element))
                || (*rhs == Operand::Slot(*acc) && *lhs == Operand::Slot(*element));

            if accumulates
                && *index == var
                && vector_has_length(function, *vector, limit, &def_counts)
                && def_counts[*element] == 1
                && use_counts.get(element).copied().unwrap_or(0) == 1
                && !observable_outside(*element)
                && loop_definition_count(function, &loop_set, *acc) == 1
                && loop_definition_count(function, &loop_set, *vector) == 0
            {
                return Some(Rewrite::Sum {
                    vector: *vector,
                    acc: *acc,
                    span: add.span,
                });
            }
        }
    }

    // Shape B: element-wise map  dst[i] <- v[i] op k
    if let [read, compute, write] = body {
        if let (
            InstrKind::IndexRead {
                dst: element,
                base: Operand::Slot(source),
                index: Operand::Slot(read_index),
            },
            InstrKind::Binary {
                dst: mapped,
                op,
                lhs,
                rhs,
                kind: ValueKind::Scalar,
            },
            InstrKind::IndexWrite {
                base: target,
                index: write_index,
                value,
            },
        ) = (&read.kind, &compute.kind, &write.kind)
        {
            if !matches!(
                op,
                BinaryOperatorKind::Add
                    | BinaryOperatorKind::Subtract
                    | BinaryOperatorKind::Multiply
                    | BinaryOperatorKind::Divide
                    | BinaryOperatorKind::Modulo
            ) {
                return None;
            }

            // One operand is the element; the other must be invariant
            let element_op = Operand::Slot(*element);
            let element_on_left = *lhs == element_op;
            let other = if element_on_left {
                rhs.clone()
            } else if *rhs == element_op {
                lhs.clone()
            } else {
                return None;
            };

            let invariant_other = match &other {
                Operand::Const(_) => true,
                Operand::Slot(slot) => loop_definition_count(function, &loop_set, *slot) == 0,
            };

            // The loop must cover the source exactly, and overwrite every
            // element of the target
            let lengths_match = vector_has_length(function, *source, limit, &def_counts)
                && (*target == *source
                    || vector_has_length(function, *target, limit, &def_counts));

            if invariant_other
                && lengths_match
                && *read_index == var
                && *write_index == Operand::Slot(var)
                && *value == Operand::Slot(*mapped)
                && def_counts[*element] == 1
                && def_counts[*mapped] == 1
                && use_counts.get(element).copied().unwrap_or(0) == 1
                && use_counts.get(mapped).copied().unwrap_or(0) == 1
                && !observable_outside(*element)
                && !observable_outside(*mapped)
                && loop_definition_count(function, &loop_set, *source) == 0
            {
                let (lhs, rhs) = if element_on_left {
                    (Operand::Slot(*source), other)
                } else {
                    (other, Operand::Slot(*source))
                };

                return Some(Rewrite::Map {
                    lhs,
                    rhs,
                    op: *op,
                    target: *target,
                    span: compute.span,
                });
            }
        }
    }

    None
}

/// Follows a single-def copy chain to its root slot.
fn resolve_copies(
    function: &Function,
    mut slot: SlotId,
    def_counts: &IndexVec<SlotId, usize>,
) -> SlotId {
    for _ in 0..function.slots.len() {
        if def_counts[slot] != 1 {
            return slot;
        }

        match single_definition(function, slot) {
            Some(InstrKind::Copy {
                src: Operand::Slot(source),
                ..
            }) => slot = *source,
            _ => return slot,
        }
    }

    slot
}

fn single_definition<'f>(function: &'f Function, slot: SlotId) -> Option<&'f InstrKind> {
    let mut found = None;
    for block in function.blocks.iter() {
        for instruction in &block.instructions {
            if instruction.kind.dst() == Some(slot) {
                if found.is_some() {
                    return None;
                }
                found = Some(&instruction.kind);
            }
        }
    }
    found
}

/// If `limit` is provably `length(v)` for some vector `v`, returns `v`.
fn subject_of_length_chain(
    function: &Function,
    limit: SlotId,
    def_counts: &IndexVec<SlotId, usize>,
) -> Option<SlotId> {
    let root = resolve_copies(function, limit, def_counts);

    if let Some(InstrKind::Call {
        callee: Callee::Builtin(Builtin::Length),
        args,
        ..
    }) = single_definition(function, root)
    {
        if let [Operand::Slot(vector)] = args.as_slice() {
            if def_counts[*vector] <= 1 {
                return Some(*vector);
            }
        }
    }

    None
}

/// Whether `vector` provably has exactly `limit` elements: the limit is
/// `length(vector)`, or the vector's single definition is `seq_len(n)` with
/// `n` the same value the limit resolves to.
fn vector_has_length(
    function: &Function,
    vector: SlotId,
    limit: SlotId,
    def_counts: &IndexVec<SlotId, usize>,
) -> bool {
    if subject_of_length_chain(function, limit, def_counts) == Some(vector) {
        return true;
    }

    if def_counts[vector] != 1 {
        return false;
    }

    let Some(InstrKind::Call {
        callee: Callee::Builtin(Builtin::SeqLen),
        args,
        ..
    }) = single_definition(function, vector)
    else {
        return false;
    };

    match args.as_slice() {
        [Operand::Slot(n)] => {
            resolve_copies(function, *n, def_counts) == resolve_copies(function, limit, def_counts)
        }
        _ => false,
    }
}

fn loop_block_set(
    function: &Function,
    info: &LoopInfo,
    dominators: &Dominators,
) -> HashSet<BlockId> {
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

fn loop_definition_count(
    function: &Function,
    loop_set: &HashSet<BlockId>,
    slot: SlotId,
) -> usize {
    loop_set
        .iter()
        .flat_map(|block| &function.blocks[*block].instructions)
        .filter(|instruction| instruction.kind.dst() == Some(slot))
        .count()
}

fn slot_used_outside(function: &Function, slot: SlotId, loop_set: &HashSet<BlockId>) -> bool {
    for (id, block) in function.blocks.enumerate() {
        if loop_set.contains(&id) {
            continue;
        }

        for instruction in &block.instructions {
            if instruction.kind.used_slots().contains(&slot) {
                return true;
            }
        }

        let terminator_uses = match &block.terminator {
            Terminator::Branch { condition, .. } => condition.as_slot() == Some(slot),
            Terminator::Return(Some(value)) => value.as_slot() == Some(slot),
            _ => false,
        };
        if terminator_uses {
            return true;
        }
    }

    false
}

fn use_counts(function: &Function) -> HashMap<SlotId, usize> {
    let mut counts: HashMap<SlotId, usize> = HashMap::new();

    for block in function.blocks.iter() {
        for instruction in &block.instructions {
            for slot in instruction.kind.used_slots() {
                *counts.entry(slot).or_default() += 1;
            }
        }

        match &block.terminator {
            Terminator::Branch { condition, .. } => {
                if let Some(slot) = condition.as_slot() {
                    *counts.entry(slot).or_default() += 1;
                }
            }
            Terminator::Return(Some(value)) => {
                if let Some(slot) = value.as_slot() {
                    *counts.entry(slot).or_default() += 1;
                }
            }
            _ => {}
        }
    }

    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{middle::mir, tachyon::test_support::mir_function};

    #[test]
    fn sum_reduction_over_a_whole_vector_is_rewritten() {
        let mut function = mir_function(
            "fn f(v) {\n  s <- 0L\n  for x in v {\n    s <- s + x\n  }\n  s\n}\n",
        );

        assert!(VectorizePreference.run(&mut function));
        mir::purge_unreachable_blocks(&mut function);
        assert!(mir::validate(&function).is_empty());

        let has_sum = function
            .blocks
            .iter()
            .flat_map(|block| &block.instructions)
            .any(|i| {
                matches!(
                    &i.kind,
                    InstrKind::Call {
                        callee: Callee::Builtin(Builtin::Sum),
                        ..
                    }
                )
            });
        assert!(has_sum, "reduction must become sum()");
        assert!(function.loops.is_empty(), "the loop itself must be gone");
    }

    #[test]
    fn elementwise_map_over_matching_lengths_is_rewritten() {
        let mut function = mir_function(
            "fn f(n: int) {\n  p <- seq_len(n)\n  for i in 1L..n {\n    p[i] <- p[i] * 2L\n  }\n  p\n}\n",
        );

        assert!(VectorizePreference.run(&mut function));
        mir::purge_unreachable_blocks(&mut function);
        assert!(mir::validate(&function).is_empty());

        let has_vector_multiply = function
            .blocks
            .iter()
            .flat_map(|block| &block.instructions)
            .any(|i| {
                matches!(
                    i.kind,
                    InstrKind::Binary {
                        op: BinaryOperatorKind::Multiply,
                        kind: ValueKind::Vector,
                        ..
                    }
                )
            });
        assert!(has_vector_multiply);
    }

    #[test]
    fn loops_with_side_effects_are_left_alone() {
        let mut function = mir_function(
            "fn f(v) {\n  s <- 0L\n  for x in v {\n    print(x)\n    s <- s + x\n  }\n  s\n}\n",
        );

        assert!(!VectorizePreference.run(&mut function));
        assert_eq!(function.loops.len(), 1);
    }

    #[test]
    fn partial_width_loops_are_left_alone() {
        // The loop covers 1..n but p has unknown length relative to n
        let mut function = mir_function(
            "fn f(p, n: int) {\n  for i in 1L..n {\n    p[i] <- p[i] * 2L\n  }\n  p\n}\n",
        );

        assert!(!VectorizePreference.run(&mut function));
    }
}
