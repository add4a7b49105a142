//! Renders optimized MIR into R source. Control flow is rebuilt from the
//! graph: loop records become `while`/`for` statements, branch diamonds
//! become `if`/`else` with the merge found through postdominators, phi
//! merges become assignments at the end of each incoming arm, and
//! `break`/`next` fall out of jumps to the enclosing loop's exit and
//! continue targets. Single-use pure temporaries are folded back into the
//! expressions that consume them, so the emitted code reads like source;
//! statement order within a block is preserved exactly, since R evaluates
//! left-to-right and statement order carries side effects.

use hashbrown::{HashMap, HashSet};
use itertools::Itertools;

use crate::{
    frontend::{
        SourceFile,
        ast::{BinaryOperatorKind, UnaryOperatorKind},
        intern::InternedSymbol,
        lexer::Span,
    },
    index::{Index, IndexVec},
    middle::{
        hir::FnId,
        mir::{
            BlockId, Callee, Constant, Function, InstrKind, LoopKind, Operand, SlotId, SlotKind,
            Terminator,
        },
    },
};

/// Emits a complete `name <- function(...) { ... }` definition.
pub fn emit_function(
    function: &Function,
    fn_names: &IndexVec<FnId, InternedSymbol>,
    source: &SourceFile,
    emit_comments: bool,
) -> String {
    let mut emitter = Emitter::new(function, fn_names, source, emit_comments);

    let params = function
        .params
        .iter()
        .map(|param| match &param.default {
            Some(default) => format!(
                "{} = {}",
                emitter.names[param.slot],
                render_constant(default)
            ),
            None => emitter.names[param.slot].clone(),
        })
        .join(", ");

    emitter.line(
        0,
        format!("{} <- function({params}) {{", function.name),
        None,
    );
    emitter.indent = 1;
    emitter.emit_region(function.entry(), None);
    emitter.line(0, "}".to_owned(), None);

    emitter.render()
}

/// Emits the top-level script statements, unwrapped.
pub fn emit_script(
    function: &Function,
    fn_names: &IndexVec<FnId, InternedSymbol>,
    source: &SourceFile,
    emit_comments: bool,
) -> String {
    let mut emitter = Emitter::new(function, fn_names, source, emit_comments);
    emitter.emit_region(function.entry(), None);
    emitter.render()
}

struct PendingExpr {
    text: String,
    reads: Vec<SlotId>,
    span: Span,
}

struct LoopFrame {
    continue_target: BlockId,
    exit: BlockId,
}

struct Emitter<'a> {
    function: &'a Function,
    fn_names: &'a IndexVec<FnId, InternedSymbol>,
    source: &'a SourceFile,
    emit_comments: bool,

    names: IndexVec<SlotId, String>,
    def_counts: IndexVec<SlotId, usize>,
    use_counts: HashMap<SlotId, usize>,
    /// Assignments to perform at the end of each predecessor of a phi
    phi_moves: HashMap<BlockId, Vec<(SlotId, Operand, Span)>>,
    /// Immediate postdominator per block; `None` means only the function
    /// exit postdominates it
    ipostdom: Vec<Option<BlockId>>,
    /// Loop record index by header block
    loop_headers: HashMap<BlockId, usize>,
    /// Induction slot per counted-loop preheader; its init copy is implied
    /// by the emitted `for` and skipped
    preheader_inductions: HashMap<BlockId, SlotId>,

    lines: Vec<(usize, String, Option<Span>)>,
    indent: usize,
    pending: HashMap<SlotId, PendingExpr>,
    pending_order: Vec<SlotId>,
    frames: Vec<LoopFrame>,
    control_depth: usize,
}

impl<'a> Emitter<'a> {
    fn new(
        function: &'a Function,
        fn_names: &'a IndexVec<FnId, InternedSymbol>,
        source: &'a SourceFile,
        emit_comments: bool,
    ) -> Self {
        let mut phi_moves: HashMap<BlockId, Vec<(SlotId, Operand, Span)>> = HashMap::new();
        for block in function.blocks.iter() {
            for instruction in &block.instructions {
                if let InstrKind::Phi { dst, sources } = &instruction.kind {
                    for (pred, operand) in sources {
                        phi_moves.entry(*pred).or_default().push((
                            *dst,
                            operand.clone(),
                            instruction.span,
                        ));
                    }
                }
            }
        }

        let loop_headers = function
            .loops
            .iter()
            .enumerate()
            .map(|(index, info)| (info.header, index))
            .collect();

        let preheader_inductions = function
            .loops
            .iter()
            .filter_map(|info| match &info.kind {
                LoopKind::For { var, .. } => Some((info.preheader, *var)),
                LoopKind::While => None,
            })
            .collect();

        Self {
            names: slot_names(function),
            def_counts: function.definition_counts(),
            use_counts: use_counts(function),
            phi_moves,
            ipostdom: postdominators(function),
            loop_headers,
            preheader_inductions,
            function,
            fn_names,
            source,
            emit_comments,
            lines: Vec::new(),
            indent: 0,
            pending: HashMap::new(),
            pending_order: Vec::new(),
            frames: Vec::new(),
            control_depth: 0,
        }
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for (indent, text, span) in &self.lines {
            out.push_str(&"  ".repeat(*indent));
            out.push_str(text);

            if self.emit_comments {
                if let Some(span) = span {
                    if *span != Span::DUMMY {
                        out.push_str(&format!(
                            " # rr:{}",
                            self.source.line_for_position(span.start)
                        ));
                    }
                }
            }

            out.push('\n');
        }
        out
    }

    fn line(&mut self, indent: usize, text: String, span: Option<Span>) {
        self.lines.push((indent, text, span));
    }

    fn stmt(&mut self, text: String, span: Span) {
        self.lines.push((self.indent, text, Some(span)));
    }

    /* Operand rendering and the pending-expression machinery */

    fn operand(&mut self, operand: &Operand) -> (String, Vec<SlotId>) {
        match operand {
            Operand::Const(constant) => (render_constant(constant), Vec::new()),
            Operand::Slot(slot) => {
                if let Some(pending) = self.pending.remove(slot) {
                    self.pending_order.retain(|s| s != slot);
                    (pending.text, pending.reads)
                } else {
                    (self.names[*slot].clone(), vec![*slot])
                }
            }
        }
    }

    /// Emits any deferred expressions that read `slot`, preserving their
    /// original order, so a following write to `slot` cannot change what
    /// they see.
    fn flush_reading(&mut self, slot: SlotId) {
        let to_flush: Vec<SlotId> = self
            .pending_order
            .iter()
            .copied()
            .filter(|id| self.pending[id].reads.contains(&slot))
            .collect();

        for id in to_flush {
            let pending = self.pending.remove(&id).expect("pending entry exists");
            self.pending_order.retain(|s| *s != id);
            self.stmt(
                format!("{} <- {}", self.names[id], pending.text),
                pending.span,
            );
        }
    }

    fn flush_all(&mut self) {
        let order = std::mem::take(&mut self.pending_order);
        for id in order {
            if let Some(pending) = self.pending.remove(&id) {
                self.stmt(
                    format!("{} <- {}", self.names[id], pending.text),
                    pending.span,
                );
            }
        }
    }

    /* Instructions */

    fn emit_instruction(&mut self, instruction: &crate::middle::mir::Instruction) {
        let span = instruction.span;

        match &instruction.kind {
            // Phis become assignments in their predecessors
            InstrKind::Phi { .. } => {}
            InstrKind::IndexWrite { base, index, value } => {
                let (index_text, _) = self.operand(index);
                let (value_text, _) = self.operand(value);
                self.flush_reading(*base);

                let base = self.names[*base].clone();
                self.stmt(
                    format!("{base}[rr_index1_write({index_text}, \"index\")] <- {value_text}"),
                    span,
                );
            }
            InstrKind::FieldWrite { base, field, value } => {
                let (value_text, _) = self.operand(value);
                self.flush_reading(*base);

                let base = self.names[*base].clone();
                self.stmt(format!("{base}${field} <- {value_text}"), span);
            }
            InstrKind::Call {
                dst: None,
                callee,
                args,
                ..
            } => {
                let (text, _) = self.render_call(callee, args);
                self.stmt(text, span);
            }
            kind => {
                let Some(dst) = kind.dst() else {
                    return;
                };

                let (text, reads, deferable) = self.render_value(kind);

                if deferable
                    && self.function.slots[dst].kind == SlotKind::Temp
                    && self.def_counts[dst] == 1
                    && self.use_counts.get(&dst).copied().unwrap_or(0) == 1
                {
                    self.pending.insert(dst, PendingExpr { text, reads, span });
                    self.pending_order.push(dst);
                } else {
                    self.flush_reading(dst);
                    let name = self.names[dst].clone();
                    self.stmt(format!("{name} <- {text}"), span);
                }
            }
        }
    }

    /// Renders a value-producing instruction. Returns the expression text,
    /// the slots it reads, and whether it is pure enough to defer.
    fn render_value(&mut self, kind: &InstrKind) -> (String, Vec<SlotId>, bool) {
        match kind {
            InstrKind::Copy { src, .. } => {
                let (text, reads) = self.operand(src);
                (text, reads, true)
            }
            InstrKind::Binary { op, lhs, rhs, .. } => {
                let (lhs_text, mut reads) = self.operand(lhs);
                let (rhs_text, rhs_reads) = self.operand(rhs);
                reads.extend(rhs_reads);

                (
                    format!("({lhs_text} {} {rhs_text})", binary_operator(*op)),
                    reads,
                    true,
                )
            }
            InstrKind::Unary { op, operand, .. } => {
                let (text, reads) = self.operand(operand);
                let symbol = match op {
                    UnaryOperatorKind::Negate => "-",
                    UnaryOperatorKind::LogicalNot => "!",
                };
                (format!("({symbol}{text})"), reads, true)
            }
            InstrKind::Call {
                dst: Some(_),
                callee,
                args,
                pure,
            } => {
                let (text, reads) = self.render_call(callee, args);
                (text, reads, *pure)
            }
            InstrKind::IndexRead { base, index, .. } => {
                let (base_text, mut reads) = self.operand(base);
                let (index_text, index_reads) = self.operand(index);
                reads.extend(index_reads);
                if let Some(slot) = base.as_slot() {
                    reads.push(slot);
                }

                (
                    format!("rr_index1_read({base_text}, {index_text}, \"index\")"),
                    reads,
                    true,
                )
            }
            InstrKind::FieldRead { base, field, .. } => {
                let (base_text, mut reads) = self.operand(base);
                if let Some(slot) = base.as_slot() {
                    reads.push(slot);
                }

                (format!("{base_text}${field}"), reads, true)
            }
            InstrKind::MakeVector { elements, .. } => {
                let mut reads = Vec::new();
                let elements = elements
                    .iter()
                    .map(|element| {
                        let (text, element_reads) = self.operand(element);
                        reads.extend(element_reads);
                        text
                    })
                    .join(", ");

                (format!("c({elements})"), reads, true)
            }
            InstrKind::MakeRecord { fields, .. } => {
                let mut reads = Vec::new();
                let fields = fields
                    .iter()
                    .map(|(name, value)| {
                        let (text, value_reads) = self.operand(value);
                        reads.extend(value_reads);
                        format!("{name} = {text}")
                    })
                    .join(", ");

                (format!("list({fields})"), reads, true)
            }
            InstrKind::Range { start, end, .. } => {
                let (start_text, mut reads) = self.operand(start);
                let (end_text, end_reads) = self.operand(end);
                reads.extend(end_reads);

                (format!("rr_seq({start_text}, {end_text})"), reads, true)
            }
            other => unreachable!("not a value-producing instruction: {other:?}"),
        }
    }

    fn render_call(&mut self, callee: &Callee, args: &[Operand]) -> (String, Vec<SlotId>) {
        let name = match callee {
            Callee::Fn(id) => self.fn_names[*id].value(),
            Callee::Builtin(builtin) => builtin.name(),
        };

        let mut reads = Vec::new();
        let args = args
            .iter()
            .map(|arg| {
                let (text, arg_reads) = self.operand(arg);
                reads.extend(arg_reads);
                text
            })
            .join(", ");

        (format!("{name}({args})"), reads)
    }

    fn emit_phi_moves(&mut self, block: BlockId) {
        let Some(moves) = self.phi_moves.get(&block).cloned() else {
            return;
        };

        for (dst, operand, span) in moves {
            let (text, _) = self.operand(&operand);
            self.flush_reading(dst);
            let name = self.names[dst].clone();
            self.stmt(format!("{name} <- {text}"), span);
        }
    }

    /* Structured control flow */

    /// Emits the region starting at `start` until `stop` (exclusive) or a
    /// return.
    fn emit_region(&mut self, start: BlockId, stop: Option<BlockId>) {
        let mut current = start;

        loop {
            if Some(current) == stop {
                return;
            }

            // Falling into the enclosing loop's exit or continue block maps
            // back onto break/next
            if let Some(frame) = self.frames.last() {
                if current == frame.exit {
                    self.flush_all();
                    self.line(self.indent, "break".to_owned(), None);
                    return;
                }
                if current == frame.continue_target {
                    self.flush_all();
                    self.line(self.indent, "next".to_owned(), None);
                    return;
                }
            }

            if let Some(index) = self.loop_headers.get(&current).copied() {
                current = self.emit_loop(index);
                continue;
            }

            let induction = self.preheader_inductions.get(&current).copied();
            for instruction in &self.function.blocks[current].instructions.clone() {
                if let InstrKind::Copy { dst, .. } = &instruction.kind {
                    if Some(*dst) == induction {
                        continue;
                    }
                }
                self.emit_instruction(instruction);
            }
            self.emit_phi_moves(current);

            match self.function.blocks[current].terminator.clone() {
                Terminator::Goto(target) => {
                    if Some(target) == stop {
                        self.flush_all();
                        return;
                    }

                    if let Some(frame) = self.frames.last() {
                        if target == frame.continue_target {
                            self.flush_all();
                            self.line(self.indent, "next".to_owned(), None);
                            return;
                        }
                        if target == frame.exit {
                            self.flush_all();
                            self.line(self.indent, "break".to_owned(), None);
                            return;
                        }
                    }

                    current = target;
                }
                Terminator::Branch {
                    condition,
                    then_block,
                    else_block,
                } => {
                    let merge = self.ipostdom[current.index()];

                    let (condition_text, _) = self.operand(&condition);
                    self.flush_all();

                    self.line(
                        self.indent,
                        format!("if (rr_bool({})) {{", strip_parens(&condition_text)),
                        None,
                    );

                    self.control_depth += 1;
                    self.indent += 1;
                    self.emit_region(then_block, merge);
                    self.indent -= 1;

                    if Some(else_block) != merge {
                        self.line(self.indent, "} else {".to_owned(), None);
                        self.indent += 1;
                        self.emit_region(else_block, merge);
                        self.indent -= 1;
                    }
                    self.control_depth -= 1;

                    self.line(self.indent, "}".to_owned(), None);

                    match merge {
                        Some(merge) => current = merge,
                        None => return,
                    }
                }
                Terminator::Return(value) => {
                    match value {
                        Some(value) => {
                            let (text, _) = self.operand(&value);
                            self.flush_all();

                            if self.control_depth == 0 {
                                let text = strip_parens(&text).to_owned();
                                self.line(self.indent, text, None);
                            } else {
                                self.line(
                                    self.indent,
                                    format!("return({})", strip_parens(&text)),
                                    None,
                                );
                            }
                        }
                        None => {
                            self.flush_all();
                            if self.control_depth > 0 {
                                self.line(
                                    self.indent,
                                    "return(invisible(NULL))".to_owned(),
                                    None,
                                );
                            }
                        }
                    }
                    return;
                }
            }
        }
    }

    /// Emits one loop, returning the block to continue at (the loop exit).
    fn emit_loop(&mut self, index: usize) -> BlockId {
        let info = self.function.loops[index].clone();

        match &info.kind {
            LoopKind::For { var, start, end } => {
                let (start_text, _) = self.operand(start);
                let (end_text, _) = self.operand(end);
                self.flush_all();

                let var_name = self.names[*var].clone();
                self.line(
                    self.indent,
                    format!("for ({var_name} in rr_seq({start_text}, {end_text})) {{"),
                    None,
                );

                let latch = info.latch.expect("counted loops carry a latch");
                self.frames.push(LoopFrame {
                    continue_target: latch,
                    exit: info.exit,
                });
                self.control_depth += 1;
                self.indent += 1;

                self.emit_region(info.body, Some(latch));

                self.indent -= 1;
                self.control_depth -= 1;
                self.frames.pop();

                self.line(self.indent, "}".to_owned(), None);
            }
            LoopKind::While => {
                // The header computes the condition; replay it and see
                // whether it folds entirely into one expression
                let line_mark = self.lines.len();
                for instruction in &self.function.blocks[info.header].instructions.clone() {
                    self.emit_instruction(instruction);
                }

                let Terminator::Branch { condition, .. } =
                    self.function.blocks[info.header].terminator.clone()
                else {
                    unreachable!("loop header must end in a branch");
                };
                let (condition_text, _) = self.operand(&condition);
                // Whatever the condition did not consume is still part of
                // its computation
                self.flush_all();

                self.frames.push(LoopFrame {
                    continue_target: info.header,
                    exit: info.exit,
                });
                self.control_depth += 1;

                if self.lines.len() == line_mark {
                    // Clean condition: a plain while loop
                    self.line(
                        self.indent,
                        format!("while (rr_bool({})) {{", strip_parens(&condition_text)),
                        None,
                    );
                    self.indent += 1;
                    self.emit_region(info.body, Some(info.header));
                    self.indent -= 1;
                    self.line(self.indent, "}".to_owned(), None);
                } else {
                    // The condition needed statements of its own (impure or
                    // reused computations): replay them inside a repeat
                    let header_lines = self.lines.split_off(line_mark);

                    self.line(self.indent, "repeat {".to_owned(), None);
                    self.indent += 1;
                    for (indent, text, span) in header_lines {
                        self.lines.push((indent + 1, text, span));
                    }
                    self.line(
                        self.indent,
                        format!("if (!rr_bool({})) break", strip_parens(&condition_text)),
                        None,
                    );
                    self.emit_region(info.body, Some(info.header));
                    self.indent -= 1;
                    self.line(self.indent, "}".to_owned(), None);
                }

                self.control_depth -= 1;
                self.frames.pop();
            }
        }

        info.exit
    }
}

/* Naming and analysis helpers */

fn slot_names(function: &Function) -> IndexVec<SlotId, String> {
    let mut names = IndexVec::new();
    let mut seen: HashMap<&str, usize> = HashMap::new();

    for (id, slot) in function.slots.enumerate() {
        let name = match slot.kind {
            SlotKind::Param => {
                let base = slot.name.map(|n| n.value()).unwrap_or("param");
                format!(".arg_{base}")
            }
            SlotKind::Local => {
                let base = slot.name.map(|n| n.value()).unwrap_or("local");
                let count = seen.entry(base).or_insert(0);
                *count += 1;
                if *count == 1 {
                    base.to_owned()
                } else {
                    // Shadowed or inlined namesakes get a suffix
                    format!("{base}_{count}")
                }
            }
            SlotKind::Temp => format!(".t{}", id.index()),
        };
        names.push(name);
    }

    names
}

fn use_counts(function: &Function) -> HashMap<SlotId, usize> {
    let mut counts: HashMap<SlotId, usize> = HashMap::new();
    let mut bump = |slot: SlotId| *counts.entry(slot).or_default() += 1;

    for block in function.blocks.iter() {
        for instruction in &block.instructions {
            for slot in instruction.kind.used_slots() {
                bump(slot);
            }
        }

        match &block.terminator {
            Terminator::Branch { condition, .. } => {
                if let Some(slot) = condition.as_slot() {
                    bump(slot);
                }
            }
            Terminator::Return(Some(value)) => {
                if let Some(slot) = value.as_slot() {
                    bump(slot);
                }
            }
            _ => {}
        }
    }

    for info in &function.loops {
        if let LoopKind::For { var, start, end } = &info.kind {
            bump(*var);
            if let Some(slot) = start.as_slot() {
                bump(slot);
            }
            if let Some(slot) = end.as_slot() {
                bump(slot);
            }
        }
    }

    counts
}

/// Immediate postdominators, via the iterative dominator algorithm over the
/// reversed graph with a virtual exit joining every return block.
fn postdominators(function: &Function) -> Vec<Option<BlockId>> {
    let n = function.blocks.len();
    let exit = n;

    // Successors in the reversed graph are predecessors in the original;
    // the virtual exit leads to every returning block
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n + 1];
    for (id, block) in function.blocks.enumerate() {
        if matches!(block.terminator, Terminator::Return(_)) {
            successors[exit].push(id.index());
        }

        for target in block.terminator.successors() {
            successors[target.index()].push(id.index());
        }
    }

    // Predecessors in the reversed graph are successors in the original,
    // plus the virtual exit edge for returns
    let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); n + 1];
    for (node, next) in successors.iter().enumerate() {
        for target in next {
            predecessors[*target].push(node);
        }
    }

    // Reverse postorder from the virtual exit
    let mut order = Vec::new();
    let mut seen = HashSet::new();
    let mut stack = vec![(exit, false)];
    while let Some((node, processed)) = stack.pop() {
        if processed {
            order.push(node);
            continue;
        }
        if !seen.insert(node) {
            continue;
        }
        stack.push((node, true));
        for next in &successors[node] {
            if !seen.contains(next) {
                stack.push((*next, false));
            }
        }
    }
    order.reverse();

    let mut position = vec![usize::MAX; n + 1];
    for (index, node) in order.iter().enumerate() {
        position[*node] = index;
    }

    let mut idom: Vec<Option<usize>> = vec![None; n + 1];
    idom[exit] = Some(exit);

    let intersect = |idom: &[Option<usize>], mut a: usize, mut b: usize| {
        while a != b {
            while position[a] > position[b] {
                a = idom[a].expect("processed node has an idom");
            }
            while position[b] > position[a] {
                b = idom[b].expect("processed node has an idom");
            }
        }
        a
    };

    let mut changed = true;
    while changed {
        changed = false;

        for node in order.iter().copied().skip(1) {
            let mut new_idom = None;
            for pred in predecessors[node].iter().copied() {
                if idom[pred].is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => pred,
                    Some(current) => intersect(&idom, pred, current),
                });
            }

            if let Some(new_idom) = new_idom {
                if idom[node] != Some(new_idom) {
                    idom[node] = Some(new_idom);
                    changed = true;
                }
            }
        }
    }

    (0..n)
        .map(|node| match idom[node] {
            Some(postdom) if postdom != exit && postdom != node => {
                Some(BlockId::new(postdom))
            }
            _ => None,
        })
        .collect()
}

fn binary_operator(op: BinaryOperatorKind) -> &'static str {
    match op {
        BinaryOperatorKind::Add => "+",
        BinaryOperatorKind::Subtract => "-",
        BinaryOperatorKind::Multiply => "*",
        BinaryOperatorKind::Divide => "/",
        BinaryOperatorKind::Modulo => "%%",
        BinaryOperatorKind::Equals => "==",
        BinaryOperatorKind::NotEquals => "!=",
        BinaryOperatorKind::LessThan => "<",
        BinaryOperatorKind::LessThanOrEqualTo => "<=",
        BinaryOperatorKind::GreaterThan => ">",
        BinaryOperatorKind::GreaterThanOrEqualTo => ">=",
        // Short-circuit operators lower to branching; these spellings only
        // serve defensive rendering
        BinaryOperatorKind::LogicalAnd => "&&",
        BinaryOperatorKind::LogicalOr => "||",
    }
}

pub fn render_constant(constant: &Constant) -> String {
    match constant {
        Constant::Int(value) => format!("{value}L"),
        Constant::Double(value) => render_double(*value),
        Constant::Logical(true) => "TRUE".to_owned(),
        Constant::Logical(false) => "FALSE".to_owned(),
        Constant::Str(value) => render_string(value),
        Constant::Null => "NULL".to_owned(),
    }
}

fn render_double(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_owned();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Inf" } else { "-Inf" }.to_owned();
    }

    let text = format!("{value}");
    // A double literal must not read back as an integer
    if text.contains('.') || text.contains('e') || text.contains('E') {
        text
    } else {
        format!("{text}.0")
    }
}

fn render_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

/// Strips one redundant outer paren pair: `(i <= n)` reads better as
/// `i <= n` inside `while (...)`.
fn strip_parens(text: &str) -> &str {
    let stripped = text
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'));

    let Some(stripped) = stripped else {
        return text;
    };

    // Only strip when the pair actually wraps the whole expression
    let mut depth = 0usize;
    for (index, c) in stripped.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                if depth == 0 {
                    let _ = index;
                    return text;
                }
                depth -= 1;
            }
            _ => {}
        }
    }

    stripped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_render_as_r_literals() {
        assert_eq!(render_double(1.5), "1.5");
        assert_eq!(render_double(3.0), "3.0");
        assert_eq!(render_double(f64::INFINITY), "Inf");
        assert_eq!(render_double(f64::NAN), "NaN");
        assert_eq!(render_double(-2.0), "-2.0");
    }

    #[test]
    fn strings_are_escaped() {
        assert_eq!(render_string("a\"b\n"), "\"a\\\"b\\n\"");
    }

    #[test]
    fn outer_parens_strip_only_when_redundant() {
        assert_eq!(strip_parens("(i <= n)"), "i <= n");
        assert_eq!(strip_parens("(a) + (b)"), "(a) + (b)");
        assert_eq!(strip_parens("f(x)"), "f(x)");
    }
}
