//! Inlining. A call to a small, non-recursive callee is replaced by a copy
//! of the callee's body, with every slot renamed into the caller to avoid
//! collisions. Callee bodies come from the pristine pre-optimization
//! snapshot, so results do not depend on the order workers optimize
//! functions in. A size budget bounds code growth, and the one-site-per-run
//! rule together with the scheduler's iteration cap bounds inlining depth.

use std::sync::Arc;

use crate::{
    index::Index,
    middle::mir::{
        BasicBlock, BlockId, Callee, Constant, Function, InstrKind, Instruction, LoopKind,
        Operand, SlotId, SlotKind, Terminator,
    },
    tachyon::{Pass, ProgramSnapshot},
};

const MAX_CALLEE_INSTRUCTIONS: usize = 24;
const MAX_CALLEE_BLOCKS: usize = 8;

pub struct Inline {
    snapshot: Arc<ProgramSnapshot>,
}

impl Inline {
    pub fn new(snapshot: Arc<ProgramSnapshot>) -> Self {
        Self { snapshot }
    }
}

impl Pass for Inline {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn run(&self, function: &mut Function) -> bool {
        // One site per run keeps the block bookkeeping simple; the
        // scheduler re-runs the pass until nothing qualifies
        let Some((block, index, callee)) = self.find_site(function) else {
            return false;
        };

        inline_call(function, block, index, &self.snapshot.functions[callee]);
        true
    }
}

impl Inline {
    fn find_site(&self, function: &Function) -> Option<(BlockId, usize, crate::middle::hir::FnId)> {
        for (block_id, block) in function.blocks.enumerate() {
            // Splitting a loop header or latch would break the loop shape
            // that codegen and the loop passes rely on
            let in_loop_skeleton = function.loops.iter().any(|info| {
                info.header == block_id || info.latch == Some(block_id)
            });
            if in_loop_skeleton {
                continue;
            }

            for (index, instruction) in block.instructions.iter().enumerate() {
                let InstrKind::Call {
                    callee: Callee::Fn(id),
                    args,
                    ..
                } = &instruction.kind
                else {
                    continue;
                };

                // Never inline a directly or transitively recursive callee
                if self.snapshot.recursive.contains(id) {
                    continue;
                }

                let Some(callee) = self.snapshot.functions.get(*id) else {
                    continue;
                };

                let size: usize = callee
                    .blocks
                    .iter()
                    .map(|block| block.instructions.len())
                    .sum();
                if size > MAX_CALLEE_INSTRUCTIONS
                    || callee.blocks.len() > MAX_CALLEE_BLOCKS
                    || callee.params.len() != args.len()
                {
                    continue;
                }

                return Some((block_id, index, *id));
            }
        }

        None
    }
}

fn inline_call(function: &mut Function, block: BlockId, index: usize, callee: &Function) {
    // Split the call site: the call's block keeps everything before the
    // call, a new continuation block receives everything after it
    let mut tail = function.blocks[block].instructions.split_off(index);
    let call = tail.remove(0);

    let InstrKind::Call { dst, args, .. } = call.kind else {
        unreachable!("inline site is not a call");
    };

    let continuation = function.blocks.push(BasicBlock {
        instructions: tail,
        terminator: function.blocks[block].terminator.clone(),
    });

    // Successor phis and loop records that referenced the split block as
    // the edge into them now see the continuation
    let successors = function.blocks[continuation].terminator.successors();
    for successor in successors {
        for instruction in &mut function.blocks[successor].instructions {
            if let InstrKind::Phi { sources, .. } = &mut instruction.kind {
                for (pred, _) in sources.iter_mut() {
                    if *pred == block {
                        *pred = continuation;
                    }
                }
            }
        }
    }
    for info in &mut function.loops {
        if info.preheader == block {
            info.preheader = continuation;
        }
    }

    // Bring the callee's slots across, renamed by offset; its parameters
    // become ordinary locals seeded from the argument values
    let slot_offset = function.slots.len();
    for slot in callee.slots.iter() {
        let mut slot = slot.clone();
        if slot.kind == SlotKind::Param {
            slot.kind = SlotKind::Local;
        }
        function.slots.push(slot);
    }

    for (param, arg) in callee.params.iter().zip(args) {
        function.blocks[block].instructions.push(Instruction {
            kind: InstrKind::Copy {
                dst: param.slot.plus(slot_offset),
                src: arg,
            },
            span: call.span,
        });
    }

    // Splice the callee's blocks in, remapping slot and block ids; returns
    // become assignments to the call destination plus a jump to the
    // continuation
    let block_offset = function.blocks.len();

    for callee_block in callee.blocks.iter() {
        let instructions = callee_block
            .instructions
            .iter()
            .map(|instruction| {
                let mut kind = instruction.kind.clone();
                remap_instruction(&mut kind, slot_offset, block_offset);
                Instruction {
                    kind,
                    span: call.span,
                }
            })
            .collect::<Vec<_>>();

        let terminator = match &callee_block.terminator {
            Terminator::Goto(target) => Terminator::Goto(target.plus(block_offset)),
            Terminator::Branch {
                condition,
                then_block,
                else_block,
            } => {
                let mut condition = condition.clone();
                remap_operand(&mut condition, slot_offset);
                Terminator::Branch {
                    condition,
                    then_block: then_block.plus(block_offset),
                    else_block: else_block.plus(block_offset),
                }
            }
            Terminator::Return(value) => {
                let mut value = value.clone();
                if let Some(value) = &mut value {
                    remap_operand(value, slot_offset);
                }

                // The return value lands in the call's destination before
                // control rejoins the caller
                if let Some(dst) = dst {
                    let src = value.unwrap_or(Operand::Const(Constant::Null));
                    let mut instructions = instructions;
                    instructions.push(Instruction {
                        kind: InstrKind::Copy { dst, src },
                        span: call.span,
                    });
                    function.blocks.push(BasicBlock {
                        instructions,
                        terminator: Terminator::Goto(continuation),
                    });
                    continue;
                }

                Terminator::Goto(continuation)
            }
        };

        function.blocks.push(BasicBlock {
            instructions,
            terminator,
        });
    }

    // Jump from the split block into the inlined entry
    function.blocks[block].terminator = Terminator::Goto(BlockId::new(block_offset));

    // Carry the callee's loop records across
    for info in &callee.loops {
        let mut info = info.clone();
        info.preheader = info.preheader.plus(block_offset);
        info.header = info.header.plus(block_offset);
        info.body = info.body.plus(block_offset);
        info.exit = info.exit.plus(block_offset);
        info.latch = info.latch.map(|latch| latch.plus(block_offset));

        if let LoopKind::For { var, start, end } = &mut info.kind {
            *var = var.plus(slot_offset);
            remap_operand(start, slot_offset);
            remap_operand(end, slot_offset);
        }

        function.loops.push(info);
    }
}

fn remap_operand(operand: &mut Operand, slot_offset: usize) {
    if let Operand::Slot(slot) = operand {
        *slot = slot.plus(slot_offset);
    }
}

fn remap_instruction(kind: &mut InstrKind, slot_offset: usize, block_offset: usize) {
    if let Some(dst) = kind.dst_mut() {
        *dst = dst.plus(slot_offset);
    }

    match kind {
        InstrKind::IndexWrite { base, .. } | InstrKind::FieldWrite { base, .. } => {
            *base = base.plus(slot_offset);
        }
        InstrKind::Phi { sources, .. } => {
            for (pred, _) in sources.iter_mut() {
                *pred = pred.plus(block_offset);
            }
        }
        _ => {}
    }

    for operand in kind.operands_mut() {
        remap_operand(operand, slot_offset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        index::IndexVec,
        middle::mir,
        tachyon::test_support::mir_module,
    };

    fn snapshot_of(functions: Vec<Function>) -> Arc<ProgramSnapshot> {
        Arc::new(ProgramSnapshot::new(IndexVec::from_raw(functions)))
    }

    fn count_fn_calls(function: &Function) -> usize {
        function
            .blocks
            .iter()
            .flat_map(|block| &block.instructions)
            .filter(|i| {
                matches!(
                    i.kind,
                    InstrKind::Call {
                        callee: Callee::Fn(_),
                        ..
                    }
                )
            })
            .count()
    }

    #[test]
    fn small_callee_is_spliced_into_the_caller() {
        let functions = mir_module(
            "fn add(a: int, b: int) -> int = a + b\n\nfn main() {\n  x <- add(1L, 2L)\n  x\n}\n",
        );
        let snapshot = snapshot_of(functions.clone());

        let mut main = functions[1].clone();
        assert_eq!(count_fn_calls(&main), 1);

        assert!(Inline::new(snapshot).run(&mut main));
        mir::purge_unreachable_blocks(&mut main);

        assert_eq!(count_fn_calls(&main), 0);
        assert!(mir::validate(&main).is_empty(), "{:?}", mir::validate(&main));
    }

    #[test]
    fn recursive_callees_are_never_inlined() {
        let functions = mir_module(
            "fn countdown(n: int) {\n  if (n > 0L) {\n    countdown(n - 1L)\n  }\n  n\n}\n\nfn main() {\n  countdown(3L)\n}\n",
        );
        let snapshot = snapshot_of(functions.clone());

        let mut main = functions[1].clone();
        assert!(!Inline::new(snapshot).run(&mut main));
        assert_eq!(count_fn_calls(&main), 1);
    }

    #[test]
    fn mutually_recursive_callees_are_never_inlined() {
        let functions = mir_module(
            "fn ping(n: int) {\n  pong(n)\n}\n\nfn pong(n: int) {\n  ping(n)\n}\n\nfn main() {\n  ping(1L)\n}\n",
        );
        let snapshot = snapshot_of(functions.clone());

        let mut main = functions[2].clone();
        assert!(!Inline::new(snapshot).run(&mut main));
    }

    #[test]
    fn oversized_callees_are_skipped() {
        let mut source = String::from("fn big(a: int) {\n");
        for i in 0..30 {
            source.push_str(&format!("  x{i} <- a + {i}L\n"));
        }
        source.push_str("  a\n}\n\nfn main() {\n  big(1L)\n}\n");

        let functions = mir_module(&source);
        let snapshot = snapshot_of(functions.clone());

        let mut main = functions[1].clone();
        assert!(!Inline::new(snapshot).run(&mut main));
    }
}
