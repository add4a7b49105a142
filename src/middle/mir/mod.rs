//! The mid-level intermediate representation: one control-flow graph per
//! top-level callable. Blocks live in a function-owned table and reference
//! each other by [`BlockId`] only, so the graph has no cyclic ownership and
//! prints/serializes trivially. Every block ends in exactly one terminator,
//! and every block except the entry has at least one predecessor (enforced
//! by [`validate`], restored after edits by [`purge_unreachable_blocks`]).

use hashbrown::HashSet;

use crate::{
    frontend::{
        ast::{BinaryOperatorKind, UnaryOperatorKind},
        intern::InternedSymbol,
        lexer::Span,
    },
    index::{Index, IndexVec, simple_index},
    middle::{
        hir::{Builtin, FnId},
        ty::Ty,
    },
};

pub mod lowering;
pub mod pretty_print;

simple_index! {
    /// Identifies a basic block within its function
    pub struct BlockId;
}

impl BlockId {
    pub const ENTRY: Self = Self(0);
}

simple_index! {
    /// Identifies a storage slot (parameter, named local, or temporary)
    pub struct SlotId;
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: InternedSymbol,
    pub span: Span,
    pub params: Vec<Param>,
    pub slots: IndexVec<SlotId, Slot>,
    pub blocks: IndexVec<BlockId, BasicBlock>,
    pub loops: Vec<LoopInfo>,
    pub ret_ty: Ty,
    /// The synthetic function holding top-level script statements
    pub is_script: bool,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub slot: SlotId,
    pub name: InternedSymbol,
    /// Literal default rendered into the emitted signature, if any
    pub default: Option<Constant>,
}

#[derive(Debug, Clone)]
pub struct Slot {
    pub name: Option<InternedSymbol>,
    pub ty: Ty,
    pub kind: SlotKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// An incoming parameter; never written inside the function
    Param,
    /// A user-visible variable
    Local,
    /// A compiler temporary
    Temp,
}

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub instructions: Vec<Instruction>,
    pub terminator: Terminator,
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub kind: InstrKind,
    pub span: Span,
}

/// Whether an operation works element-wise over whole vectors or on scalars.
/// Decided once during MIR lowering from HIR types; never re-inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Scalar,
    Vector,
}

#[derive(Debug, Clone)]
pub enum InstrKind {
    Copy {
        dst: SlotId,
        src: Operand,
    },
    Unary {
        dst: SlotId,
        op: UnaryOperatorKind,
        operand: Operand,
        kind: ValueKind,
    },
    Binary {
        dst: SlotId,
        op: BinaryOperatorKind,
        lhs: Operand,
        rhs: Operand,
        kind: ValueKind,
    },
    Call {
        dst: Option<SlotId>,
        callee: Callee,
        args: Vec<Operand>,
        /// Conservative side-effect status: only whitelisted builtins are
        /// pure; everything else must never be removed or reordered
        pure: bool,
    },
    IndexRead {
        dst: SlotId,
        base: Operand,
        index: Operand,
    },
    IndexWrite {
        base: SlotId,
        index: Operand,
        value: Operand,
    },
    FieldRead {
        dst: SlotId,
        base: Operand,
        field: InternedSymbol,
    },
    FieldWrite {
        base: SlotId,
        field: InternedSymbol,
        value: Operand,
    },
    MakeVector {
        dst: SlotId,
        elements: Vec<Operand>,
    },
    MakeRecord {
        dst: SlotId,
        fields: Vec<(InternedSymbol, Operand)>,
    },
    /// `start..end`, inclusive; empty when end < start
    Range {
        dst: SlotId,
        start: Operand,
        end: Operand,
    },
    /// Merge of values arriving from different predecessors
    Phi {
        dst: SlotId,
        sources: Vec<(BlockId, Operand)>,
    },
}

impl InstrKind {
    /// The slot this instruction defines, if any
    pub fn dst(&self) -> Option<SlotId> {
        match self {
            InstrKind::Copy { dst, .. }
            | InstrKind::Unary { dst, .. }
            | InstrKind::Binary { dst, .. }
            | InstrKind::IndexRead { dst, .. }
            | InstrKind::FieldRead { dst, .. }
            | InstrKind::MakeVector { dst, .. }
            | InstrKind::MakeRecord { dst, .. }
            | InstrKind::Range { dst, .. }
            | InstrKind::Phi { dst, .. } => Some(*dst),
            InstrKind::Call { dst, .. } => *dst,
            InstrKind::IndexWrite { .. } | InstrKind::FieldWrite { .. } => None,
        }
    }

    pub fn dst_mut(&mut self) -> Option<&mut SlotId> {
        match self {
            InstrKind::Copy { dst, .. }
            | InstrKind::Unary { dst, .. }
            | InstrKind::Binary { dst, .. }
            | InstrKind::IndexRead { dst, .. }
            | InstrKind::FieldRead { dst, .. }
            | InstrKind::MakeVector { dst, .. }
            | InstrKind::MakeRecord { dst, .. }
            | InstrKind::Range { dst, .. }
            | InstrKind::Phi { dst, .. } => Some(dst),
            InstrKind::Call { dst, .. } => dst.as_mut(),
            InstrKind::IndexWrite { .. } | InstrKind::FieldWrite { .. } => None,
        }
    }

    /// Whether removing this instruction (when its result is unused) can
    /// change observable behavior
    pub fn has_side_effects(&self) -> bool {
        match self {
            InstrKind::Call { pure, .. } => !pure,
            InstrKind::IndexWrite { .. } | InstrKind::FieldWrite { .. } => true,
            _ => false,
        }
    }

    /// Every slot this instruction reads
    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            InstrKind::Copy { src, .. } => vec![src],
            InstrKind::Unary { operand, .. } => vec![operand],
            InstrKind::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            InstrKind::Call { args, .. } => args.iter().collect(),
            InstrKind::IndexRead { base, index, .. } => vec![base, index],
            InstrKind::IndexWrite { index, value, .. } => vec![index, value],
            InstrKind::FieldRead { base, .. } => vec![base],
            InstrKind::FieldWrite { value, .. } => vec![value],
            InstrKind::MakeVector { elements, .. } => elements.iter().collect(),
            InstrKind::MakeRecord { fields, .. } => fields.iter().map(|(_, v)| v).collect(),
            InstrKind::Range { start, end, .. } => vec![start, end],
            InstrKind::Phi { sources, .. } => sources.iter().map(|(_, v)| v).collect(),
        }
    }

    pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
        match self {
            InstrKind::Copy { src, .. } => vec![src],
            InstrKind::Unary { operand, .. } => vec![operand],
            InstrKind::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            InstrKind::Call { args, .. } => args.iter_mut().collect(),
            InstrKind::IndexRead { base, index, .. } => vec![base, index],
            InstrKind::IndexWrite { index, value, .. } => vec![index, value],
            InstrKind::FieldRead { base, .. } => vec![base],
            InstrKind::FieldWrite { value, .. } => vec![value],
            InstrKind::MakeVector { elements, .. } => elements.iter_mut().collect(),
            InstrKind::MakeRecord { fields, .. } => fields.iter_mut().map(|(_, v)| v).collect(),
            InstrKind::Range { start, end, .. } => vec![start, end],
            InstrKind::Phi { sources, .. } => sources.iter_mut().map(|(_, v)| v).collect(),
        }
    }

    /// Slots read by this instruction, including write bases (an index write
    /// reads its base vector before copying it back)
    pub fn used_slots(&self) -> Vec<SlotId> {
        let mut used: Vec<SlotId> = self
            .operands()
            .iter()
            .filter_map(|operand| operand.as_slot())
            .collect();

        match self {
            InstrKind::IndexWrite { base, .. } | InstrKind::FieldWrite { base, .. } => {
                used.push(*base)
            }
            _ => {}
        }

        used
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callee {
    Fn(FnId),
    Builtin(Builtin),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Const(Constant),
    Slot(SlotId),
}

impl Operand {
    pub fn as_slot(&self) -> Option<SlotId> {
        match self {
            Operand::Slot(slot) => Some(*slot),
            Operand::Const(_) => None,
        }
    }

    pub fn as_const(&self) -> Option<&Constant> {
        match self {
            Operand::Const(constant) => Some(constant),
            Operand::Slot(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(i32),
    Double(f64),
    Logical(bool),
    Str(String),
    Null,
}

impl Constant {
    pub fn ty(&self) -> Ty {
        match self {
            Constant::Int(_) => Ty::Int,
            Constant::Double(_) => Ty::Double,
            Constant::Logical(_) => Ty::Logical,
            Constant::Str(_) => Ty::Char,
            Constant::Null => Ty::Unit,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Terminator {
    Goto(BlockId),
    Branch {
        condition: Operand,
        then_block: BlockId,
        else_block: BlockId,
    },
    Return(Option<Operand>),
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Goto(target) => vec![*target],
            Terminator::Branch {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            Terminator::Return(_) => Vec::new(),
        }
    }

    pub fn successors_mut(&mut self) -> Vec<&mut BlockId> {
        match self {
            Terminator::Goto(target) => vec![target],
            Terminator::Branch {
                then_block,
                else_block,
                ..
            } => vec![then_block, else_block],
            Terminator::Return(_) => Vec::new(),
        }
    }
}

/// Shape of a loop, recorded at lowering time so LICM has a hoist target
/// and codegen can rebuild structured source.
#[derive(Debug, Clone)]
pub struct LoopInfo {
    pub kind: LoopKind,
    pub preheader: BlockId,
    pub header: BlockId,
    /// Entry block of the body region
    pub body: BlockId,
    /// The increment block of a `for` loop
    pub latch: Option<BlockId>,
    pub exit: BlockId,
}

#[derive(Debug, Clone)]
pub enum LoopKind {
    /// Counted loop over an inclusive range; `var` is the induction slot
    For {
        var: SlotId,
        start: Operand,
        end: Operand,
    },
    While,
}

impl Function {
    pub fn entry(&self) -> BlockId {
        BlockId::ENTRY
    }

    pub fn new_temp(&mut self, ty: Ty) -> SlotId {
        self.slots.push(Slot {
            name: None,
            ty,
            kind: SlotKind::Temp,
        })
    }

    /// Predecessor lists for every block
    pub fn predecessors(&self) -> IndexVec<BlockId, Vec<BlockId>> {
        let mut preds: IndexVec<BlockId, Vec<BlockId>> =
            IndexVec::from_raw(vec![Vec::new(); self.blocks.len()]);

        for (id, block) in self.blocks.enumerate() {
            for successor in block.terminator.successors() {
                preds[successor].push(id);
            }
        }

        preds
    }

    /// Blocks reachable from the entry
    pub fn reachable_blocks(&self) -> HashSet<BlockId> {
        let mut reachable = HashSet::new();
        let mut stack = vec![self.entry()];

        while let Some(block) = stack.pop() {
            if !reachable.insert(block) {
                continue;
            }

            stack.extend(self.blocks[block].terminator.successors());
        }

        reachable
    }

    /// How many times each slot appears as an instruction destination
    pub fn definition_counts(&self) -> IndexVec<SlotId, usize> {
        let mut counts: IndexVec<SlotId, usize> =
            IndexVec::from_raw(vec![0; self.slots.len()]);

        for block in self.blocks.iter() {
            for instruction in &block.instructions {
                if let Some(dst) = instruction.kind.dst() {
                    counts[dst] += 1;
                }
            }
        }

        counts
    }
}

/// Drops blocks unreachable from the entry and renumbers the rest,
/// rewriting terminators, phi sources, and loop records. Keeps the
/// "every non-entry block has a predecessor" invariant true after branch
/// folding.
pub fn purge_unreachable_blocks(function: &mut Function) -> bool {
    let reachable = function.reachable_blocks();

    if reachable.len() == function.blocks.len() {
        return false;
    }

    let mut remap: IndexVec<BlockId, Option<BlockId>> =
        IndexVec::from_raw(vec![None; function.blocks.len()]);
    let mut kept = IndexVec::new();

    let old_blocks = std::mem::take(&mut function.blocks);
    for (id, block) in old_blocks.into_iter().enumerate() {
        let id = BlockId::new(id);
        if reachable.contains(&id) {
            remap[id] = Some(kept.push(block));
        }
    }

    for block in kept.iter_mut() {
        for successor in block.terminator.successors_mut() {
            *successor = remap[*successor].expect("reachable block points at purged block");
        }

        for instruction in &mut block.instructions {
            if let InstrKind::Phi { sources, .. } = &mut instruction.kind {
                sources.retain(|(pred, _)| remap[*pred].is_some());
                for (pred, _) in sources.iter_mut() {
                    *pred = remap[*pred].expect("retained phi source from purged block");
                }
            }
        }
    }

    function.blocks = kept;

    function.loops.retain_mut(|info| {
        let all_reachable = [info.preheader, info.header, info.body, info.exit]
            .into_iter()
            .chain(info.latch)
            .all(|block| remap[block].is_some());

        if !all_reachable {
            return false;
        }

        info.preheader = remap[info.preheader].unwrap();
        info.header = remap[info.header].unwrap();
        info.body = remap[info.body].unwrap();
        info.exit = remap[info.exit].unwrap();
        info.latch = info.latch.map(|latch| remap[latch].unwrap());
        true
    });

    true
}

/// Checks the structural CFG invariants. Returns human-readable violations;
/// an empty list means the function is well-formed.
pub fn validate(function: &Function) -> Vec<String> {
    let mut violations = Vec::new();

    if function.blocks.is_empty() {
        violations.push("function has no blocks".to_owned());
        return violations;
    }

    let preds = function.predecessors();

    for (id, block) in function.blocks.enumerate() {
        for successor in block.terminator.successors() {
            if successor.index() >= function.blocks.len() {
                violations.push(format!(
                    "block {} jumps to out-of-range block {}",
                    id.index(),
                    successor.index()
                ));
            }
        }

        if id != function.entry() && preds[id].is_empty() {
            violations.push(format!("block {} has no predecessors", id.index()));
        }

        for instruction in &block.instructions {
            if let InstrKind::Phi { sources, .. } = &instruction.kind {
                for (pred, _) in sources {
                    if !preds[id].contains(pred) {
                        violations.push(format!(
                            "phi in block {} names non-predecessor block {}",
                            id.index(),
                            pred.index()
                        ));
                    }
                }
            }

            for slot in instruction.kind.used_slots() {
                if slot.index() >= function.slots.len() {
                    violations.push(format!(
                        "instruction in block {} reads out-of-range slot {}",
                        id.index(),
                        slot.index()
                    ));
                }
            }
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_function() -> Function {
        Function {
            name: InternedSymbol::new("t"),
            span: Span::DUMMY,
            params: Vec::new(),
            slots: IndexVec::new(),
            blocks: IndexVec::new(),
            loops: Vec::new(),
            ret_ty: Ty::Unit,
            is_script: false,
        }
    }

    #[test]
    fn purge_drops_orphan_blocks_and_renumbers() {
        let mut function = empty_function();

        // entry -> 2, 1 is unreachable
        function.blocks.push(BasicBlock {
            instructions: Vec::new(),
            terminator: Terminator::Goto(BlockId::new(2)),
        });
        function.blocks.push(BasicBlock {
            instructions: Vec::new(),
            terminator: Terminator::Return(None),
        });
        function.blocks.push(BasicBlock {
            instructions: Vec::new(),
            terminator: Terminator::Return(None),
        });

        assert!(purge_unreachable_blocks(&mut function));
        assert_eq!(function.blocks.len(), 2);
        assert!(validate(&function).is_empty());
        assert!(matches!(
            function.blocks[BlockId::ENTRY].terminator,
            Terminator::Goto(target) if target == BlockId::new(1)
        ));
    }

    #[test]
    fn validate_flags_predecessor_less_blocks() {
        let mut function = empty_function();

        function.blocks.push(BasicBlock {
            instructions: Vec::new(),
            terminator: Terminator::Return(None),
        });
        function.blocks.push(BasicBlock {
            instructions: Vec::new(),
            terminator: Terminator::Return(None),
        });

        let violations = validate(&function);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("no predecessors"));
    }
}
