//! HIR to MIR lowering. Control constructs become explicit blocks and
//! branch terminators, short-circuit operators become control flow, loops
//! get a dedicated preheader (the hoist target for loop-invariant code
//! motion), and every operation is tagged scalar or vector from its HIR
//! types. Reaching this stage with unresolved HIR is a compiler defect and
//! reports an internal-compiler-error diagnostic.

use hashbrown::HashMap;

use crate::{
    diagnostics::{Diagnostic, DiagnosticBag, Stage},
    frontend::{
        ast::BinaryOperatorKind,
        intern::InternedSymbol,
        lexer::Span,
    },
    index::IndexVec,
    middle::{
        hir::{
            self, BindingId, Builtin, FnId, HirBlock, HirExpr, HirExprKind, HirForIter,
            HirLValue, HirLit, HirModule, HirStmt,
        },
        mir::{
            BasicBlock, BlockId, Callee, Constant, Function, InstrKind, Instruction, LoopInfo,
            LoopKind, Operand, Param, Slot, SlotId, SlotKind, Terminator, ValueKind,
        },
        ty::Ty,
    },
};

/// Lowers one top-level function to its control-flow graph.
pub fn lower_function(hir: &HirModule, id: FnId, diagnostics: &DiagnosticBag) -> Function {
    let function = &hir.functions[id];

    let mut cx = LoweringContext::new(hir, diagnostics, function.name, function.span, false);
    cx.function.ret_ty = function.ret_ty.clone();

    for param in &function.params {
        let slot = cx.function.slots.push(Slot {
            name: Some(param.name),
            ty: param.ty.clone(),
            kind: SlotKind::Param,
        });

        let default = param.default.as_ref().and_then(|default| {
            if let HirExprKind::Lit(lit) = &default.kind {
                Some(constant_of(lit))
            } else {
                None
            }
        });

        cx.function.params.push(Param {
            slot,
            name: param.name,
            default,
        });

        // A reassigned parameter gets a distinct local seeded at entry, so
        // the incoming value stays readable and is never recomputed
        if hir.bindings.get(param.binding).reassigned {
            let local = cx.function.slots.push(Slot {
                name: Some(param.name),
                ty: param.ty.clone(),
                kind: SlotKind::Local,
            });
            cx.push(
                InstrKind::Copy {
                    dst: local,
                    src: Operand::Slot(slot),
                },
                param.span,
            );
            cx.slots_by_binding.insert(param.binding, local);
        } else {
            cx.slots_by_binding.insert(param.binding, slot);
        }
    }

    let value = cx.lower_block_value(&function.body);
    cx.terminate_current(Terminator::Return(value));

    cx.finish()
}

/// Lowers the top-level script statements into a synthetic function whose
/// body is emitted at the top level of the generated program.
pub fn lower_script(hir: &HirModule, diagnostics: &DiagnosticBag) -> Function {
    let span = hir
        .script
        .first()
        .map(stmt_span)
        .unwrap_or(Span::DUMMY);

    let mut cx = LoweringContext::new(hir, diagnostics, InternedSymbol::new(".script"), span, true);

    for stmt in &hir.script {
        cx.lower_stmt(stmt);
    }
    cx.terminate_current(Terminator::Return(None));

    cx.finish()
}

fn stmt_span(stmt: &HirStmt) -> Span {
    match stmt {
        HirStmt::Let { span, .. }
        | HirStmt::Assign { span, .. }
        | HirStmt::For { span, .. }
        | HirStmt::Break(span)
        | HirStmt::Continue(span)
        | HirStmt::Return(_, span) => *span,
        HirStmt::If { condition, .. } | HirStmt::While { condition, .. } => condition.span,
        HirStmt::Expr(expression) => expression.span,
    }
}

/// Whether lowering this expression produces control flow of its own
/// (short-circuit operators or if-expressions, at any depth).
fn expr_needs_control_flow(expression: &HirExpr) -> bool {
    match &expression.kind {
        HirExprKind::Binary { op, lhs, rhs } => {
            op.is_short_circuit()
                || expr_needs_control_flow(lhs)
                || expr_needs_control_flow(rhs)
        }
        HirExprKind::If { .. } => true,
        HirExprKind::Unary { operand, .. } => expr_needs_control_flow(operand),
        HirExprKind::Call { args, .. } => args.iter().any(expr_needs_control_flow),
        HirExprKind::Index { base, index } => {
            expr_needs_control_flow(base) || expr_needs_control_flow(index)
        }
        HirExprKind::Field { base, .. } => expr_needs_control_flow(base),
        HirExprKind::Vector(elements) => elements.iter().any(expr_needs_control_flow),
        HirExprKind::Record(fields) => {
            fields.iter().any(|(_, value)| expr_needs_control_flow(value))
        }
        HirExprKind::Range { start, end } => {
            expr_needs_control_flow(start) || expr_needs_control_flow(end)
        }
        HirExprKind::Lit(_) | HirExprKind::Binding(_) | HirExprKind::Error => false,
    }
}

fn constant_of(lit: &HirLit) -> Constant {
    match lit {
        HirLit::Int(value) => Constant::Int(*value),
        HirLit::Double(value) => Constant::Double(*value),
        HirLit::Logical(value) => Constant::Logical(*value),
        HirLit::Str(value) => Constant::Str(value.clone()),
    }
}

struct LoopFrame {
    continue_target: BlockId,
    exit: BlockId,
}

struct LoweringContext<'a> {
    hir: &'a HirModule,
    diagnostics: &'a DiagnosticBag,
    function: Function,
    slots_by_binding: HashMap<BindingId, SlotId>,
    current: BlockId,
    loop_stack: Vec<LoopFrame>,
}

impl<'a> LoweringContext<'a> {
    fn new(
        hir: &'a HirModule,
        diagnostics: &'a DiagnosticBag,
        name: InternedSymbol,
        span: Span,
        is_script: bool,
    ) -> Self {
        let mut blocks = IndexVec::new();
        let entry = blocks.push(BasicBlock {
            instructions: Vec::new(),
            terminator: Terminator::Return(None),
        });

        Self {
            hir,
            diagnostics,
            function: Function {
                name,
                span,
                params: Vec::new(),
                slots: IndexVec::new(),
                blocks,
                loops: Vec::new(),
                ret_ty: Ty::Unit,
                is_script,
            },
            slots_by_binding: HashMap::new(),
            current: entry,
            loop_stack: Vec::new(),
        }
    }

    fn finish(mut self) -> Function {
        super::purge_unreachable_blocks(&mut self.function);

        for violation in super::validate(&self.function) {
            self.diagnostics.record(Diagnostic::internal(
                Stage::MirLower,
                format!(
                    "lowering of `{}` produced a malformed graph: {violation}",
                    self.function.name
                ),
                self.function.span,
            ));
        }

        self.function
    }

    fn internal_error(&self, message: impl Into<String>, span: Span) {
        self.diagnostics
            .record(Diagnostic::internal(Stage::MirLower, message, span));
    }

    fn new_block(&mut self) -> BlockId {
        self.function.blocks.push(BasicBlock {
            instructions: Vec::new(),
            terminator: Terminator::Return(None),
        })
    }

    fn push(&mut self, kind: InstrKind, span: Span) {
        self.function.blocks[self.current]
            .instructions
            .push(Instruction { kind, span });
    }

    fn terminate(&mut self, block: BlockId, terminator: Terminator) {
        self.function.blocks[block].terminator = terminator;
    }

    fn terminate_current(&mut self, terminator: Terminator) {
        self.terminate(self.current, terminator);
    }

    fn slot_for_binding(&mut self, binding: BindingId) -> SlotId {
        if let Some(slot) = self.slots_by_binding.get(&binding) {
            return *slot;
        }

        let info = self.hir.bindings.get(binding);
        let slot = self.function.slots.push(Slot {
            name: Some(info.name),
            ty: info.ty.clone(),
            kind: SlotKind::Local,
        });
        self.slots_by_binding.insert(binding, slot);
        slot
    }

    fn value_kind_of(&self, lhs: &Ty, rhs: Option<&Ty>) -> ValueKind {
        if lhs.is_vector() || rhs.is_some_and(|ty| ty.is_vector()) {
            ValueKind::Vector
        } else {
            ValueKind::Scalar
        }
    }

    /* Statements */

    fn lower_block_discard(&mut self, block: &HirBlock) {
        for stmt in &block.stmts {
            self.lower_stmt(stmt);
        }
    }

    /// Lowers a block, returning the operand of its trailing expression
    /// statement (the block's value), if any.
    fn lower_block_value(&mut self, block: &HirBlock) -> Option<Operand> {
        let (last, rest) = block.stmts.split_last()?;

        for stmt in rest {
            self.lower_stmt(stmt);
        }

        match last {
            HirStmt::Expr(expression) if expression.ty != Ty::Unit => {
                Some(self.lower_expr(expression))
            }
            other => {
                self.lower_stmt(other);
                None
            }
        }
    }

    fn lower_stmt(&mut self, stmt: &HirStmt) {
        match stmt {
            HirStmt::Let { binding, value, span } => {
                let dst = self.slot_for_binding(*binding);
                self.lower_expr_into(dst, value, *span);
            }
            HirStmt::Assign {
                target,
                value,
                span,
            } => match target {
                HirLValue::Binding(binding) => {
                    let dst = self.slot_for_binding(*binding);
                    self.lower_expr_into(dst, value, *span);
                }
                HirLValue::Index { base, index } => {
                    let base = self.lower_expr(base);
                    let index = self.lower_expr(index);
                    let value = self.lower_expr(value);

                    let Some(base) = base.as_slot() else {
                        self.internal_error("index write into a constant base", *span);
                        return;
                    };

                    self.push(InstrKind::IndexWrite { base, index, value }, *span);
                }
                HirLValue::Field { base, field } => {
                    let base = self.lower_expr(base);
                    let value = self.lower_expr(value);

                    let Some(base) = base.as_slot() else {
                        self.internal_error("field write into a constant base", *span);
                        return;
                    };

                    self.push(
                        InstrKind::FieldWrite {
                            base,
                            field: *field,
                            value,
                        },
                        *span,
                    );
                }
            },
            HirStmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let condition_op = self.lower_expr(condition);

                let then_block = self.new_block();
                let merge = self.new_block();
                let else_block = match else_branch {
                    Some(_) => self.new_block(),
                    None => merge,
                };

                self.terminate_current(Terminator::Branch {
                    condition: condition_op,
                    then_block,
                    else_block,
                });

                self.current = then_block;
                self.lower_block_discard(then_branch);
                self.terminate_current(Terminator::Goto(merge));

                if let Some(else_branch) = else_branch {
                    self.current = else_block;
                    self.lower_block_discard(else_branch);
                    self.terminate_current(Terminator::Goto(merge));
                }

                self.current = merge;
            }
            HirStmt::While { condition, body } => {
                let preheader = self.new_block();
                self.terminate_current(Terminator::Goto(preheader));

                let header = self.new_block();
                self.terminate(preheader, Terminator::Goto(header));

                let body_block = self.new_block();
                let exit = self.new_block();

                self.function.loops.push(LoopInfo {
                    kind: LoopKind::While,
                    preheader,
                    header,
                    body: body_block,
                    latch: None,
                    exit,
                });

                self.loop_stack.push(LoopFrame {
                    continue_target: header,
                    exit,
                });

                if expr_needs_control_flow(condition) {
                    // A condition that branches internally (short-circuit,
                    // if-expression) cannot live in the single header
                    // block. The loop becomes
                    //   while (TRUE) { if (cond) { body } else { break } }
                    // with the condition's own control flow inside the
                    // body region, re-evaluated every iteration.
                    self.terminate(
                        header,
                        Terminator::Branch {
                            condition: Operand::Const(Constant::Logical(true)),
                            then_block: body_block,
                            else_block: exit,
                        },
                    );

                    self.current = body_block;
                    let condition_op = self.lower_expr(condition);

                    let guarded = self.new_block();
                    self.terminate_current(Terminator::Branch {
                        condition: condition_op,
                        then_block: guarded,
                        else_block: exit,
                    });

                    self.current = guarded;
                    self.lower_block_discard(body);
                    self.terminate_current(Terminator::Goto(header));
                } else {
                    self.current = header;
                    let condition_op = self.lower_expr(condition);
                    self.terminate(
                        header,
                        Terminator::Branch {
                            condition: condition_op,
                            then_block: body_block,
                            else_block: exit,
                        },
                    );

                    self.current = body_block;
                    self.lower_block_discard(body);
                    self.terminate_current(Terminator::Goto(header));
                }

                self.loop_stack.pop();
                self.current = exit;
            }
            HirStmt::For {
                binding,
                iter,
                body,
                span,
            } => self.lower_for(*binding, iter, body, *span),
            HirStmt::Break(span) => {
                let Some(frame) = self.loop_stack.last() else {
                    self.internal_error("`break` survived HIR checks outside a loop", *span);
                    return;
                };

                let exit = frame.exit;
                self.terminate_current(Terminator::Goto(exit));
                self.current = self.new_block();
            }
            HirStmt::Continue(span) => {
                let Some(frame) = self.loop_stack.last() else {
                    self.internal_error("`continue` survived HIR checks outside a loop", *span);
                    return;
                };

                let target = frame.continue_target;
                self.terminate_current(Terminator::Goto(target));
                self.current = self.new_block();
            }
            HirStmt::Return(value, _) => {
                let value = value.as_ref().map(|value| self.lower_expr(value));
                self.terminate_current(Terminator::Return(value));
                self.current = self.new_block();
            }
            HirStmt::Expr(expression) => {
                // A unit-valued call in statement position has no
                // destination at all
                if let HirExprKind::Call { callee, args } = &expression.kind {
                    if expression.ty == Ty::Unit {
                        let args = args.iter().map(|arg| self.lower_expr(arg)).collect();
                        let (callee, pure) = self.lower_callee(callee);
                        self.push(
                            InstrKind::Call {
                                dst: None,
                                callee,
                                args,
                                pure,
                            },
                            expression.span,
                        );
                        return;
                    }
                }

                let _ = self.lower_expr(expression);
            }
        }
    }

    fn lower_for(
        &mut self,
        binding: BindingId,
        iter: &HirForIter,
        body: &HirBlock,
        span: Span,
    ) {
        // Normalize both iteration forms onto a counted loop:
        //   range:  var counts start..end directly
        //   vector: a hidden index counts 1..length(v), the user variable is
        //           re-read from the snapshot each iteration
        let (induction, start_op, end_op, element_read) = match iter {
            HirForIter::Range { start, end } => {
                let start_op = self.lower_expr(start);
                let end_op = self.lower_expr(end);
                let var = self.slot_for_binding(binding);
                (var, start_op, end_op, None)
            }
            HirForIter::Vector(vector) => {
                let vector_op = self.lower_expr(vector);

                // R snapshots the iterated vector before the first pass
                let snapshot = self.function.new_temp(vector.ty.clone());
                self.push(
                    InstrKind::Copy {
                        dst: snapshot,
                        src: vector_op,
                    },
                    span,
                );

                let length = self.function.new_temp(Ty::Int);
                self.push(
                    InstrKind::Call {
                        dst: Some(length),
                        callee: Callee::Builtin(Builtin::Length),
                        args: vec![Operand::Slot(snapshot)],
                        pure: true,
                    },
                    span,
                );

                let index = self.function.new_temp(Ty::Int);
                let var = self.slot_for_binding(binding);
                (
                    index,
                    Operand::Const(Constant::Int(1)),
                    Operand::Slot(length),
                    Some((var, snapshot, index)),
                )
            }
        };

        let preheader = self.new_block();
        self.terminate_current(Terminator::Goto(preheader));
        self.current = preheader;

        self.push(
            InstrKind::Copy {
                dst: induction,
                src: start_op.clone(),
            },
            span,
        );

        // Snapshot the bound so body writes to it cannot change the trip
        // count, matching R's for semantics
        let limit_op = match &end_op {
            Operand::Const(_) => end_op.clone(),
            Operand::Slot(_) => {
                let limit = self.function.new_temp(Ty::Int);
                self.push(
                    InstrKind::Copy {
                        dst: limit,
                        src: end_op.clone(),
                    },
                    span,
                );
                Operand::Slot(limit)
            }
        };

        let header = self.new_block();
        self.terminate_current(Terminator::Goto(header));
        self.current = header;

        let condition = self.function.new_temp(Ty::Logical);
        self.push(
            InstrKind::Binary {
                dst: condition,
                op: BinaryOperatorKind::LessThanOrEqualTo,
                lhs: Operand::Slot(induction),
                rhs: limit_op.clone(),
                kind: ValueKind::Scalar,
            },
            span,
        );

        let body_block = self.new_block();
        let latch = self.new_block();
        let exit = self.new_block();

        self.terminate(
            header,
            Terminator::Branch {
                condition: Operand::Slot(condition),
                then_block: body_block,
                else_block: exit,
            },
        );

        self.function.loops.push(LoopInfo {
            kind: LoopKind::For {
                var: induction,
                start: start_op,
                end: limit_op,
            },
            preheader,
            header,
            body: body_block,
            latch: Some(latch),
            exit,
        });

        self.loop_stack.push(LoopFrame {
            continue_target: latch,
            exit,
        });

        self.current = body_block;

        if let Some((var, snapshot, index)) = element_read {
            self.push(
                InstrKind::IndexRead {
                    dst: var,
                    base: Operand::Slot(snapshot),
                    index: Operand::Slot(index),
                },
                span,
            );
        }

        self.lower_block_discard(body);
        self.terminate_current(Terminator::Goto(latch));

        self.current = latch;
        self.push(
            InstrKind::Binary {
                dst: induction,
                op: BinaryOperatorKind::Add,
                lhs: Operand::Slot(induction),
                rhs: Operand::Const(Constant::Int(1)),
                kind: ValueKind::Scalar,
            },
            span,
        );
        self.terminate_current(Terminator::Goto(header));

        self.loop_stack.pop();
        self.current = exit;
    }

    /* Expressions */

    fn lower_callee(&self, callee: &hir::Callee) -> (Callee, bool) {
        match callee {
            // User functions are conservatively impure; inlining may expose
            // their bodies to the optimizer later
            hir::Callee::Fn(id) => (Callee::Fn(*id), false),
            hir::Callee::Builtin(builtin) => (Callee::Builtin(*builtin), builtin.is_pure()),
        }
    }

    fn lower_expr(&mut self, expression: &HirExpr) -> Operand {
        match &expression.kind {
            HirExprKind::Lit(lit) => Operand::Const(constant_of(lit)),
            HirExprKind::Binding(binding) => Operand::Slot(self.slot_for_binding(*binding)),
            HirExprKind::Error => {
                self.internal_error(
                    "unresolved HIR reached MIR lowering",
                    expression.span,
                );
                Operand::Const(Constant::Null)
            }
            _ => {
                let dst = self.function.new_temp(expression.ty.clone());
                self.lower_expr_into(dst, expression, expression.span);
                Operand::Slot(dst)
            }
        }
    }

    /// Lowers an expression so its result lands in `dst` without an extra
    /// temporary-and-copy.
    fn lower_expr_into(&mut self, dst: SlotId, expression: &HirExpr, span: Span) {
        match &expression.kind {
            HirExprKind::Lit(_) | HirExprKind::Binding(_) | HirExprKind::Error => {
                let src = self.lower_expr(expression);
                self.push(InstrKind::Copy { dst, src }, span);
            }
            HirExprKind::Binary { op, lhs, rhs } if op.is_short_circuit() => {
                self.lower_short_circuit(dst, *op, lhs, rhs, span);
            }
            HirExprKind::Binary { op, lhs, rhs } => {
                let kind = self.value_kind_of(&lhs.ty, Some(&rhs.ty));
                let lhs = self.lower_expr(lhs);
                let rhs = self.lower_expr(rhs);
                self.push(
                    InstrKind::Binary {
                        dst,
                        op: *op,
                        lhs,
                        rhs,
                        kind,
                    },
                    span,
                );
            }
            HirExprKind::Unary { op, operand } => {
                let kind = self.value_kind_of(&operand.ty, None);
                let operand = self.lower_expr(operand);
                self.push(
                    InstrKind::Unary {
                        dst,
                        op: *op,
                        operand,
                        kind,
                    },
                    span,
                );
            }
            HirExprKind::Call { callee, args } => {
                let args = args.iter().map(|arg| self.lower_expr(arg)).collect();
                let (callee, pure) = self.lower_callee(callee);
                self.push(
                    InstrKind::Call {
                        dst: Some(dst),
                        callee,
                        args,
                        pure,
                    },
                    span,
                );
            }
            HirExprKind::Index { base, index } => {
                let base = self.lower_expr(base);
                let index = self.lower_expr(index);
                self.push(InstrKind::IndexRead { dst, base, index }, span);
            }
            HirExprKind::Field { base, field } => {
                let base = self.lower_expr(base);
                self.push(
                    InstrKind::FieldRead {
                        dst,
                        base,
                        field: *field,
                    },
                    span,
                );
            }
            HirExprKind::Vector(elements) => {
                let elements = elements
                    .iter()
                    .map(|element| self.lower_expr(element))
                    .collect();
                self.push(InstrKind::MakeVector { dst, elements }, span);
            }
            HirExprKind::Record(fields) => {
                let fields = fields
                    .iter()
                    .map(|(name, value)| (*name, self.lower_expr(value)))
                    .collect();
                self.push(InstrKind::MakeRecord { dst, fields }, span);
            }
            HirExprKind::Range { start, end } => {
                let start = self.lower_expr(start);
                let end = self.lower_expr(end);
                self.push(InstrKind::Range { dst, start, end }, span);
            }
            HirExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let condition_op = self.lower_expr(condition);

                let then_block = self.new_block();
                let else_block = self.new_block();
                let merge = self.new_block();

                self.terminate_current(Terminator::Branch {
                    condition: condition_op,
                    then_block,
                    else_block,
                });

                self.current = then_block;
                let then_value = self.lower_block_value(then_branch);
                let then_last = self.current;
                self.terminate_current(Terminator::Goto(merge));

                self.current = else_block;
                let else_value = self.lower_block_value(else_branch);
                let else_last = self.current;
                self.terminate_current(Terminator::Goto(merge));

                self.current = merge;

                match (then_value, else_value) {
                    (Some(then_value), Some(else_value)) => {
                        self.push(
                            InstrKind::Phi {
                                dst,
                                sources: vec![(then_last, then_value), (else_last, else_value)],
                            },
                            span,
                        );
                    }
                    _ => {
                        // A unit-valued if used for effect only
                        self.push(
                            InstrKind::Copy {
                                dst,
                                src: Operand::Const(Constant::Null),
                            },
                            span,
                        );
                    }
                }
            }
        }
    }

    /// `a && b` and `a || b` evaluate their right side only when needed, so
    /// they lower to branching and a merge, never to an eager binary op.
    fn lower_short_circuit(
        &mut self,
        dst: SlotId,
        op: BinaryOperatorKind,
        lhs: &HirExpr,
        rhs: &HirExpr,
        span: Span,
    ) {
        let lhs_op = self.lower_expr(lhs);
        let branch_block = self.current;

        let rhs_block = self.new_block();
        let merge = self.new_block();

        let short_value = match op {
            BinaryOperatorKind::LogicalAnd => {
                self.terminate_current(Terminator::Branch {
                    condition: lhs_op,
                    then_block: rhs_block,
                    else_block: merge,
                });
                Constant::Logical(false)
            }
            BinaryOperatorKind::LogicalOr => {
                self.terminate_current(Terminator::Branch {
                    condition: lhs_op,
                    then_block: merge,
                    else_block: rhs_block,
                });
                Constant::Logical(true)
            }
            _ => unreachable!("not a short-circuit operator: {op:?}"),
        };

        self.current = rhs_block;
        let rhs_op = self.lower_expr(rhs);
        let rhs_last = self.current;
        self.terminate_current(Terminator::Goto(merge));

        self.current = merge;
        self.push(
            InstrKind::Phi {
                dst,
                sources: vec![
                    (branch_block, Operand::Const(short_value)),
                    (rhs_last, rhs_op),
                ],
            },
            span,
        );
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::{
        index::Index,
        diagnostics::DiagnosticBag,
        frontend::{
            SourceFile,
            parser::{DEFAULT_ERROR_CAP, Parser},
        },
        middle::{lower::lower_module, mir},
    };

    fn lower_first_function(input: &str) -> Function {
        let source = SourceFile::new_in_memory(input);
        let diagnostics = DiagnosticBag::new();
        let module = Parser::parse_module(&source, &diagnostics, DEFAULT_ERROR_CAP);
        let hir = lower_module(&module, &diagnostics);

        assert!(!diagnostics.has_errors(), "{:?}", diagnostics.drain());

        let function = lower_function(&hir, FnId::new(0), &diagnostics);
        assert!(!diagnostics.has_errors(), "{:?}", diagnostics.drain());
        function
    }

    #[test]
    fn straight_line_code_stays_in_one_block() {
        let function = lower_first_function(indoc! {r#"
            fn f(a, b) {
              let x = a + b
              x
            }
        "#});

        assert_eq!(function.blocks.len(), 1);
        assert!(mir::validate(&function).is_empty());
        assert!(matches!(
            function.blocks[BlockId::ENTRY].terminator,
            Terminator::Return(Some(_))
        ));
    }

    #[test]
    fn if_else_lowers_to_a_diamond() {
        let function = lower_first_function(indoc! {r#"
            fn f(x: int) {
              if (x > 1L) {
                print(x)
              } else {
                print(0L)
              }
              x
            }
        "#});

        // entry + then + else + merge
        assert_eq!(function.blocks.len(), 4);
        assert!(mir::validate(&function).is_empty());
        assert!(matches!(
            function.blocks[BlockId::ENTRY].terminator,
            Terminator::Branch { .. }
        ));
    }

    #[test]
    fn while_loop_records_loop_info_with_preheader() {
        let function = lower_first_function(indoc! {r#"
            fn f(n: int) {
              i <- 0L
              while (i < n) {
                i <- i + 1L
              }
              i
            }
        "#});

        assert!(mir::validate(&function).is_empty());
        assert_eq!(function.loops.len(), 1);

        let info = &function.loops[0];
        assert!(matches!(info.kind, LoopKind::While));
        assert!(info.latch.is_none());

        // The preheader falls straight into the header
        assert!(matches!(
            function.blocks[info.preheader].terminator,
            Terminator::Goto(target) if target == info.header
        ));
    }

    #[test]
    fn for_range_gets_counted_loop_shape() {
        let function = lower_first_function(indoc! {r#"
            fn f(n) {
              let s = 0L
              for i in 1L..n {
                s += i
              }
              s
            }
        "#});

        assert!(mir::validate(&function).is_empty());
        assert_eq!(function.loops.len(), 1);

        let info = &function.loops[0];
        let LoopKind::For { start, .. } = &info.kind else {
            panic!("expected counted loop");
        };
        assert_eq!(*start, Operand::Const(Constant::Int(1)));
        assert!(info.latch.is_some());

        // The latch holds exactly the induction increment
        let latch = &function.blocks[info.latch.unwrap()];
        assert_eq!(latch.instructions.len(), 1);
        assert!(matches!(
            latch.instructions[0].kind,
            InstrKind::Binary {
                op: BinaryOperatorKind::Add,
                ..
            }
        ));
    }

    #[test]
    fn break_and_continue_target_exit_and_latch() {
        let function = lower_first_function(indoc! {r#"
            fn f(n) {
              for i in 1L..n {
                if (i > 2L) {
                  break
                }
                continue
              }
              n
            }
        "#});

        assert!(mir::validate(&function).is_empty());

        let info = &function.loops[0];
        let exit = info.exit;
        let latch = info.latch.unwrap();

        let mut saw_break = false;
        let mut saw_continue = false;
        for block in function.blocks.iter() {
            if let Terminator::Goto(target) = block.terminator {
                if target == exit {
                    saw_break = true;
                }
                if target == latch {
                    saw_continue = true;
                }
            }
        }

        assert!(saw_break);
        assert!(saw_continue);
    }

    #[test]
    fn short_circuit_and_lowers_to_branching() {
        let function = lower_first_function(indoc! {r#"
            fn f(a, b) {
              x <- a > 1L && b > 2L
              x
            }
        "#});

        assert!(mir::validate(&function).is_empty());

        // The right side must live in its own block, guarded by a branch
        assert!(function.blocks.len() >= 3);
        assert!(matches!(
            function.blocks[BlockId::ENTRY].terminator,
            Terminator::Branch { .. }
        ));

        let has_phi = function.blocks.iter().any(|block| {
            block
                .instructions
                .iter()
                .any(|i| matches!(i.kind, InstrKind::Phi { .. }))
        });
        assert!(has_phi, "short-circuit merge must be a phi");
    }

    #[test]
    fn if_expression_merges_through_a_phi() {
        let function = lower_first_function(indoc! {r#"
            fn f(c: bool, a: int, b: int) {
              x <- if (c) a else b
              x
            }
        "#});

        assert!(mir::validate(&function).is_empty());

        let phis = function
            .blocks
            .iter()
            .flat_map(|block| &block.instructions)
            .filter(|i| matches!(i.kind, InstrKind::Phi { .. }))
            .count();
        assert_eq!(phis, 1);
    }

    #[test]
    fn vector_operations_are_tagged_vector() {
        let function = lower_first_function(indoc! {r#"
            fn f(n: int) {
              v <- seq_len(n)
              w <- v * 2L
              w
            }
        "#});

        let tagged = function
            .blocks
            .iter()
            .flat_map(|block| &block.instructions)
            .any(|i| {
                matches!(
                    i.kind,
                    InstrKind::Binary {
                        kind: ValueKind::Vector,
                        ..
                    }
                )
            });
        assert!(tagged, "vector multiply must carry the vector kind");
    }
}
