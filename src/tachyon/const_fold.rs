//! Constant folding. Evaluates operations whose operands are compile-time
//! constants, following R's numeric promotion rules exactly: integer
//! arithmetic stays integer and is only folded when the result fits in 32
//! bits, `/` always produces a double, `%%` takes the sign of the divisor.
//! Single-definition constants are propagated to the uses they dominate so
//! chains of folds converge across scheduler iterations.

use hashbrown::HashMap;

use crate::{
    frontend::ast::{BinaryOperatorKind, UnaryOperatorKind},
    index::Index,
    middle::mir::{
        BlockId, Constant, Function, InstrKind, LoopKind, Operand, SlotId, Terminator, ValueKind,
    },
    tachyon::{Dominators, Pass},
};

pub struct ConstFold;

impl Pass for ConstFold {
    fn name(&self) -> &'static str {
        "const-fold"
    }

    fn run(&self, function: &mut Function) -> bool {
        let mut changed = propagate_constants(function);
        changed |= fold_instructions(function);
        changed |= fold_branches(function);
        changed
    }
}

/// Replaces uses of slots that are defined exactly once, by a constant
/// copy, with the constant itself. Only uses dominated by the definition
/// are rewritten.
fn propagate_constants(function: &mut Function) -> bool {
    let def_counts = function.definition_counts();

    let mut constants: HashMap<SlotId, (Constant, BlockId, usize)> = HashMap::new();
    for (block_id, block) in function.blocks.enumerate() {
        for (index, instruction) in block.instructions.iter().enumerate() {
            if let InstrKind::Copy {
                dst,
                src: Operand::Const(value),
            } = &instruction.kind
            {
                if def_counts[*dst] == 1 {
                    constants.insert(*dst, (value.clone(), block_id, index));
                }
            }
        }
    }

    if constants.is_empty() {
        return false;
    }

    let dominators = Dominators::compute(function);
    let mut changed = false;

    let replace = |operand: &mut Operand, use_block: BlockId, use_index: Option<usize>| -> bool {
        let Operand::Slot(slot) = operand else {
            return false;
        };
        let Some((value, def_block, def_index)) = constants.get(slot) else {
            return false;
        };

        let visible = if *def_block == use_block {
            use_index.map_or(true, |use_index| *def_index < use_index)
        } else {
            dominators.dominates(*def_block, use_block)
        };

        if visible {
            *operand = Operand::Const(value.clone());
            return true;
        }

        false
    };

    for block_id in function.blocks.indices() {
        let block = &mut function.blocks[block_id];

        for index in 0..block.instructions.len() {
            let instruction = &mut block.instructions[index];

            if let InstrKind::Phi { sources, .. } = &mut instruction.kind {
                // A phi's operand is evaluated at the end of its source edge
                for (pred, operand) in sources.iter_mut() {
                    changed |= replace(operand, *pred, None);
                }
                continue;
            }

            for operand in instruction.kind.operands_mut() {
                changed |= replace(operand, block_id, Some(index));
            }
        }

        match &mut block.terminator {
            Terminator::Branch { condition, .. } => {
                changed |= replace(condition, block_id, None);
            }
            Terminator::Return(Some(value)) => {
                changed |= replace(value, block_id, None);
            }
            _ => {}
        }
    }

    // Keep the loop records, which codegen renders, in sync
    for info in &mut function.loops {
        let preheader = info.preheader;
        if let LoopKind::For { start, end, .. } = &mut info.kind {
            changed |= replace(start, preheader, None);
            changed |= replace(end, preheader, None);
        }
    }

    changed
}

fn fold_instructions(function: &mut Function) -> bool {
    let mut changed = false;

    for block in function.blocks.iter_mut() {
        for instruction in &mut block.instructions {
            let folded = match &instruction.kind {
                InstrKind::Binary {
                    dst,
                    op,
                    lhs: Operand::Const(lhs),
                    rhs: Operand::Const(rhs),
                    kind: ValueKind::Scalar,
                } => eval_binary(*op, lhs, rhs).map(|value| (*dst, value)),
                InstrKind::Unary {
                    dst,
                    op,
                    operand: Operand::Const(operand),
                    kind: ValueKind::Scalar,
                } => eval_unary(*op, operand).map(|value| (*dst, value)),
                _ => None,
            };

            if let Some((dst, value)) = folded {
                instruction.kind = InstrKind::Copy {
                    dst,
                    src: Operand::Const(value),
                };
                changed = true;
            }
        }
    }

    changed
}

fn fold_branches(function: &mut Function) -> bool {
    let mut changed = false;

    // Loop headers keep their branch even when the condition is constant;
    // codegen rebuilds the loop from that exact shape
    let headers: Vec<BlockId> = function.loops.iter().map(|info| info.header).collect();

    for (id, block) in function.blocks.iter_mut().enumerate() {
        if headers.contains(&BlockId::new(id)) {
            continue;
        }

        if let Terminator::Branch {
            condition: Operand::Const(Constant::Logical(value)),
            then_block,
            else_block,
        } = &block.terminator
        {
            let target = if *value { *then_block } else { *else_block };
            block.terminator = Terminator::Goto(target);
            changed = true;
        }
    }

    changed
}

/// Numeric view of a constant, after R's logical-to-integer promotion
enum Num {
    Int(i64),
    Double(f64),
}

fn as_num(constant: &Constant) -> Option<Num> {
    match constant {
        Constant::Int(value) => Some(Num::Int(*value as i64)),
        Constant::Double(value) => Some(Num::Double(*value)),
        Constant::Logical(value) => Some(Num::Int(*value as i64)),
        Constant::Str(_) | Constant::Null => None,
    }
}

fn fit_int(value: i64) -> Option<Constant> {
    // R integers are 32-bit; overflow produces NA at runtime, which folding
    // must not anticipate
    i32::try_from(value).ok().map(Constant::Int)
}

pub(crate) fn eval_binary(
    op: BinaryOperatorKind,
    lhs: &Constant,
    rhs: &Constant,
) -> Option<Constant> {
    use BinaryOperatorKind::*;

    // String comparison is the only string operation that folds
    if let (Constant::Str(a), Constant::Str(b)) = (lhs, rhs) {
        let result = match op {
            Equals => a == b,
            NotEquals => a != b,
            LessThan => a < b,
            LessThanOrEqualTo => a <= b,
            GreaterThan => a > b,
            GreaterThanOrEqualTo => a >= b,
            _ => return None,
        };
        return Some(Constant::Logical(result));
    }

    let (a, b) = (as_num(lhs)?, as_num(rhs)?);

    match (a, b) {
        (Num::Int(a), Num::Int(b)) => match op {
            Add => fit_int(a + b),
            Subtract => fit_int(a - b),
            Multiply => fit_int(a * b),
            // Division always promotes to double in R
            Divide => Some(Constant::Double(a as f64 / b as f64)),
            // %% takes the sign of the divisor; x %% 0L is NA, so leave it
            // for the runtime
            Modulo => (b != 0).then(|| fit_int((a % b + b) % b)).flatten(),
            Equals => Some(Constant::Logical(a == b)),
            NotEquals => Some(Constant::Logical(a != b)),
            LessThan => Some(Constant::Logical(a < b)),
            LessThanOrEqualTo => Some(Constant::Logical(a <= b)),
            GreaterThan => Some(Constant::Logical(a > b)),
            GreaterThanOrEqualTo => Some(Constant::Logical(a >= b)),
            LogicalAnd | LogicalOr => None,
        },
        (a, b) => {
            let a = match a {
                Num::Int(value) => value as f64,
                Num::Double(value) => value,
            };
            let b = match b {
                Num::Int(value) => value as f64,
                Num::Double(value) => value,
            };

            let value = match op {
                Add => Constant::Double(a + b),
                Subtract => Constant::Double(a - b),
                Multiply => Constant::Double(a * b),
                Divide => Constant::Double(a / b),
                Modulo => Constant::Double(a - (a / b).floor() * b),
                Equals => Constant::Logical(a == b),
                NotEquals => Constant::Logical(a != b),
                LessThan => Constant::Logical(a < b),
                LessThanOrEqualTo => Constant::Logical(a <= b),
                GreaterThan => Constant::Logical(a > b),
                GreaterThanOrEqualTo => Constant::Logical(a >= b),
                LogicalAnd | LogicalOr => return None,
            };
            Some(value)
        }
    }
}

fn eval_unary(op: UnaryOperatorKind, operand: &Constant) -> Option<Constant> {
    match (op, operand) {
        (UnaryOperatorKind::Negate, Constant::Int(value)) => fit_int(-(*value as i64)),
        (UnaryOperatorKind::Negate, Constant::Double(value)) => Some(Constant::Double(-value)),
        (UnaryOperatorKind::LogicalNot, Constant::Logical(value)) => {
            Some(Constant::Logical(!value))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tachyon::test_support::mir_function;

    fn constants_assigned(function: &Function) -> Vec<Constant> {
        function
            .blocks
            .iter()
            .flat_map(|block| &block.instructions)
            .filter_map(|instruction| match &instruction.kind {
                InstrKind::Copy {
                    src: Operand::Const(value),
                    ..
                } => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn integer_addition_folds_to_a_literal() {
        let mut function = mir_function("fn f() {\n  x <- 2L + 3L\n  x\n}\n");

        assert!(ConstFold.run(&mut function));
        assert!(constants_assigned(&function).contains(&Constant::Int(5)));

        let any_binary = function
            .blocks
            .iter()
            .flat_map(|block| &block.instructions)
            .any(|i| matches!(i.kind, InstrKind::Binary { .. }));
        assert!(!any_binary, "the addition must not survive to runtime");
    }

    #[test]
    fn integer_overflow_is_left_to_the_runtime() {
        let mut function =
            mir_function("fn f() {\n  x <- 2147483647L + 1L\n  x\n}\n");

        ConstFold.run(&mut function);

        let any_binary = function
            .blocks
            .iter()
            .flat_map(|block| &block.instructions)
            .any(|i| matches!(i.kind, InstrKind::Binary { .. }));
        assert!(any_binary, "overflowing addition must not be folded");
    }

    #[test]
    fn division_promotes_to_double() {
        assert_eq!(
            eval_binary(
                BinaryOperatorKind::Divide,
                &Constant::Int(7),
                &Constant::Int(2)
            ),
            Some(Constant::Double(3.5))
        );
    }

    #[test]
    fn modulo_takes_the_sign_of_the_divisor() {
        assert_eq!(
            eval_binary(
                BinaryOperatorKind::Modulo,
                &Constant::Int(-7),
                &Constant::Int(3)
            ),
            Some(Constant::Int(2))
        );
        assert_eq!(
            eval_binary(
                BinaryOperatorKind::Modulo,
                &Constant::Int(7),
                &Constant::Int(0)
            ),
            None
        );
    }

    #[test]
    fn constant_branches_become_gotos() {
        let mut function = mir_function(
            "fn f() {\n  x <- 0L\n  if (1L < 2L) {\n    x <- 1L\n  } else {\n    x <- 2L\n  }\n  x\n}\n",
        );

        assert!(ConstFold.run(&mut function));

        let any_branch = function
            .blocks
            .iter()
            .any(|block| matches!(block.terminator, Terminator::Branch { .. }));
        assert!(!any_branch, "statically-known branch must fold to goto");
    }

    #[test]
    fn propagation_respects_dominance() {
        // `y` is only assigned a constant on one path, so its use must not
        // be rewritten
        let mut function = mir_function(
            "fn f(c: bool) {\n  y <- 0L\n  if (c) {\n    y <- 1L\n  }\n  y + 1L\n}\n",
        );

        ConstFold.run(&mut function);

        let tail_binary_has_slot = function
            .blocks
            .iter()
            .flat_map(|block| &block.instructions)
            .any(|i| {
                matches!(
                    &i.kind,
                    InstrKind::Binary {
                        lhs: Operand::Slot(_),
                        ..
                    }
                )
            });
        assert!(tail_binary_has_slot, "multi-def slot must not be propagated");
    }
}
