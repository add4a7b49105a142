//! AST to HIR lowering: name resolution against the scope tree, desugaring,
//! and local type inference. This stage reports `UnboundName`,
//! `Redeclaration`, and `TypeMismatch` diagnostics; inference failures
//! degrade the node to `Ty::Unknown` instead of halting, so one pass can
//! report every independent problem it finds.

use hashbrown::HashMap;

use crate::{
    diagnostics::{Diagnostic, DiagnosticBag, DiagnosticKind, Stage},
    frontend::{
        SourceFile,
        ast::{
            self, BinaryOperatorKind, ExpressionKind, FunctionBody, ItemKind, LiteralKind,
            StatementKind, UnaryOperatorKind,
        },
        intern::InternedSymbol,
        lexer::Span,
    },
    index::{Index, IndexVec},
    middle::{
        hir::{
            BindingId, BindingKind, BindingTable, Builtin, Callee, FnId, HirBlock, HirExpr,
            HirExprKind, HirForIter, HirFunction, HirLValue, HirLit, HirModule, HirParam, HirStmt,
            ScopeId, ScopeTree,
        },
        ty::Ty,
    },
};

/// A function signature as visible to call sites. Collected for every
/// function before any body is lowered so forward calls resolve.
#[derive(Debug)]
struct FnSig {
    params: Vec<SigParam>,
    ret: Ty,
}

#[derive(Debug)]
struct SigParam {
    name: InternedSymbol,
    ty: Ty,
    default: Option<HirExpr>,
    span: Span,
}

pub struct Lowerer<'a> {
    source: &'a SourceFile,
    diagnostics: &'a DiagnosticBag,
    bindings: BindingTable,
    scopes: ScopeTree,
    global_scope: ScopeId,
    signatures: Vec<FnSig>,
    fn_ids_by_name: HashMap<InternedSymbol, FnId>,

    /* per-body state */
    current_scope: ScopeId,
    /// Where R-style implicit declarations land (the enclosing function's
    /// scope, or the global scope for script statements)
    function_scope: ScopeId,
    in_function: bool,
    loop_depth: usize,
    return_tys: Vec<Ty>,
}

pub fn lower_module(module: &ast::Module, diagnostics: &DiagnosticBag) -> HirModule {
    let mut scopes = ScopeTree::default();
    let global_scope = scopes.push(None);

    let mut lowerer = Lowerer {
        source: module.source_file,
        diagnostics,
        bindings: BindingTable::default(),
        scopes,
        global_scope,
        signatures: Vec::new(),
        fn_ids_by_name: HashMap::new(),
        current_scope: global_scope,
        function_scope: global_scope,
        in_function: false,
        loop_depth: 0,
        return_tys: Vec::new(),
    };

    lowerer.collect_signatures(module);

    let mut functions = IndexVec::new();
    let mut script = Vec::new();

    for item in &module.items {
        match &item.kind {
            ItemKind::Function(definition) => {
                let id = functions.next_index();
                let function = lowerer.lower_function(id, definition);
                functions.push(function);
            }
            ItemKind::Statement(statement) => {
                lowerer.current_scope = lowerer.global_scope;
                lowerer.function_scope = lowerer.global_scope;
                lowerer.in_function = false;

                if let Some(statement) = lowerer.lower_statement(statement) {
                    script.push(statement);
                }
            }
        }
    }

    HirModule {
        functions,
        script,
        bindings: lowerer.bindings,
        scopes: lowerer.scopes,
    }
}

impl<'a> Lowerer<'a> {
    fn error(&self, kind: DiagnosticKind, message: impl Into<String>, span: Span) {
        self.diagnostics
            .record(Diagnostic::error(Stage::HirBuild, kind, message, span));
    }

    fn warning(&self, kind: DiagnosticKind, message: impl Into<String>, span: Span) {
        self.diagnostics
            .record(Diagnostic::warning(Stage::HirBuild, kind, message, span));
    }

    /* Pass 1: signatures */

    fn collect_signatures(&mut self, module: &ast::Module) {
        for item in &module.items {
            let ItemKind::Function(definition) = &item.kind else {
                continue;
            };

            let id = FnId::new(self.signatures.len());

            if self
                .fn_ids_by_name
                .insert(definition.name.symbol, id)
                .is_some()
            {
                self.error(
                    DiagnosticKind::Redeclaration,
                    format!(
                        "function `{}` is defined more than once",
                        definition.name.symbol
                    ),
                    definition.name.span,
                );
            }

            let params = definition
                .parameters
                .iter()
                .map(|parameter| {
                    // Defaults are lowered in the global scope; they may not
                    // reference other parameters
                    let default = parameter
                        .default
                        .as_ref()
                        .map(|default| self.lower_expression(default));

                    let ty = parameter
                        .ty
                        .as_ref()
                        .map(|annotation| self.resolve_annotation(annotation))
                        .or_else(|| default.as_ref().map(|d| d.ty.clone()))
                        .unwrap_or(Ty::Unknown);

                    SigParam {
                        name: parameter.name.symbol,
                        ty,
                        default,
                        span: parameter.span,
                    }
                })
                .collect();

            let ret = definition
                .return_type
                .as_ref()
                .map(|annotation| self.resolve_annotation(annotation))
                .unwrap_or(Ty::Unknown);

            self.signatures.push(FnSig { params, ret });
        }
    }

    fn resolve_annotation(&self, annotation: &ast::TypeAnnotation) -> Ty {
        match Ty::from_annotation(annotation.symbol.value()) {
            Some(ty) => ty,
            None => {
                self.error(
                    DiagnosticKind::TypeMismatch,
                    format!("unknown type name `{}`", annotation.symbol),
                    annotation.span,
                );
                Ty::Unknown
            }
        }
    }

    /* Pass 2: bodies */

    fn lower_function(&mut self, id: FnId, definition: &ast::FunctionDefinition) -> HirFunction {
        let function_scope = self.scopes.push(Some(self.global_scope));
        self.current_scope = function_scope;
        self.function_scope = function_scope;
        self.in_function = true;
        self.loop_depth = 0;
        self.return_tys.clear();

        let mut params = Vec::new();

        for (index, parameter) in definition.parameters.iter().enumerate() {
            if self
                .scopes
                .lookup_shallow(function_scope, parameter.name.symbol)
                .is_some()
            {
                self.error(
                    DiagnosticKind::Redeclaration,
                    format!("duplicate parameter name `{}`", parameter.name.symbol),
                    parameter.name.span,
                );
                continue;
            }

            let signature = &self.signatures[id.index()].params[index];
            let ty = signature.ty.clone();
            let default = signature.default.clone();

            let binding = self.bindings.declare(
                parameter.name.symbol,
                parameter.name.span,
                ty.clone(),
                BindingKind::Param(id),
            );
            self.scopes
                .bind(function_scope, parameter.name.symbol, binding);

            params.push(HirParam {
                binding,
                name: parameter.name.symbol,
                ty,
                default,
                span: parameter.span,
            });
        }

        let body = match &definition.body {
            FunctionBody::Block(block) => self.lower_block(block),
            FunctionBody::Expression(expression) => {
                let expression = self.lower_expression(expression);
                HirBlock {
                    stmts: vec![HirStmt::Expr(expression)],
                }
            }
        };

        // The function's value is its body value joined with every explicit
        // return; a body that ends in `return` contributes no fall-through
        // value of its own
        let mut result_tys = self.return_tys.clone();
        if !matches!(body.stmts.last(), Some(HirStmt::Return(..))) {
            result_tys.push(body.value_ty());
        }
        let inferred = result_tys
            .into_iter()
            .reduce(|a, b| a.join(&b))
            .unwrap_or(Ty::Unit);

        let declared = self.signatures[id.index()].ret.clone();
        let ret_ty = if declared.is_unknown() {
            self.signatures[id.index()].ret = inferred.clone();
            inferred
        } else {
            if !inferred.is_unknown() && declared.join(&inferred).is_unknown() {
                self.error(
                    DiagnosticKind::TypeMismatch,
                    format!(
                        "function `{}` is declared to return {declared} but its body produces {inferred}",
                        definition.name.symbol
                    ),
                    definition.name.span,
                );
            }
            declared
        };

        HirFunction {
            name: definition.name.symbol,
            span: definition.span,
            params,
            ret_ty,
            body,
        }
    }

    fn lower_block(&mut self, block: &ast::Block) -> HirBlock {
        let scope = self.scopes.push(Some(self.current_scope));
        let previous = self.current_scope;
        self.current_scope = scope;

        let stmts = block
            .statements
            .iter()
            .filter_map(|statement| self.lower_statement(statement))
            .collect();

        self.current_scope = previous;

        HirBlock { stmts }
    }

    fn lower_statement(&mut self, statement: &ast::Statement) -> Option<HirStmt> {
        match &statement.kind {
            StatementKind::Let { name, ty, value } => {
                let value = self.lower_expression(value);

                let declared = ty.as_ref().map(|annotation| self.resolve_annotation(annotation));
                let binding_ty = match &declared {
                    Some(declared) if !value.ty.is_unknown() => {
                        if declared.join(&value.ty).is_unknown() {
                            self.error(
                                DiagnosticKind::TypeMismatch,
                                format!(
                                    "`{}` is declared as {declared} but initialized with {}",
                                    name.symbol, value.ty
                                ),
                                value.span,
                            );
                            Ty::Unknown
                        } else {
                            declared.clone()
                        }
                    }
                    Some(declared) => declared.clone(),
                    None => value.ty.clone(),
                };

                if let Some(existing) = self.scopes.lookup_shallow(self.current_scope, name.symbol)
                {
                    let first = self.bindings.get(existing).span;
                    self.error(
                        DiagnosticKind::Redeclaration,
                        format!(
                            "`{}` is declared twice in the same scope (first at {}:{})",
                            name.symbol,
                            self.source.line_for_position(first.start),
                            self.source.column_for_position(first.start),
                        ),
                        name.span,
                    );
                    return None;
                }

                let kind = if self.in_function {
                    BindingKind::Local
                } else {
                    BindingKind::Global
                };
                let binding = self
                    .bindings
                    .declare(name.symbol, name.span, binding_ty, kind);
                self.scopes.bind(self.current_scope, name.symbol, binding);

                Some(HirStmt::Let {
                    binding,
                    value,
                    span: statement.span,
                })
            }
            StatementKind::Assign {
                target,
                operator,
                value,
            } => self.lower_assignment(statement.span, target, operator.as_ref(), value),
            StatementKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let condition = self.lower_condition(condition);
                let then_branch = self.lower_block(then_branch);
                let else_branch = else_branch.as_ref().map(|block| self.lower_block(block));

                Some(HirStmt::If {
                    condition,
                    then_branch,
                    else_branch,
                })
            }
            StatementKind::While { condition, body } => {
                let condition = self.lower_condition(condition);

                self.loop_depth += 1;
                let body = self.lower_block(body);
                self.loop_depth -= 1;

                Some(HirStmt::While { condition, body })
            }
            StatementKind::For {
                binding,
                iterable,
                body,
            } => self.lower_for(statement.span, binding, iterable, body),
            StatementKind::Break => {
                if self.loop_depth == 0 {
                    self.error(
                        DiagnosticKind::Syntax,
                        "`break` outside of a loop",
                        statement.span,
                    );
                }
                Some(HirStmt::Break(statement.span))
            }
            StatementKind::Continue => {
                if self.loop_depth == 0 {
                    self.error(
                        DiagnosticKind::Syntax,
                        "`continue` outside of a loop",
                        statement.span,
                    );
                }
                Some(HirStmt::Continue(statement.span))
            }
            StatementKind::Return(value) => {
                if !self.in_function {
                    self.error(
                        DiagnosticKind::Syntax,
                        "`return` outside of a function",
                        statement.span,
                    );
                }

                let value = value.as_ref().map(|value| self.lower_expression(value));
                self.return_tys
                    .push(value.as_ref().map(|v| v.ty.clone()).unwrap_or(Ty::Unit));

                Some(HirStmt::Return(value, statement.span))
            }
            StatementKind::Expression(expression) => {
                Some(HirStmt::Expr(self.lower_expression(expression)))
            }
        }
    }

    fn lower_for(
        &mut self,
        span: Span,
        binding: &ast::Identifier,
        iterable: &ast::Expression,
        body: &ast::Block,
    ) -> Option<HirStmt> {
        let (iter, element_ty) = match &iterable.kind {
            ExpressionKind::Range { start, end } => {
                let start = self.lower_expression(start);
                let end = self.lower_expression(end);

                for bound in [&start, &end] {
                    if !bound.ty.is_numeric() && !bound.ty.is_unknown() {
                        self.error(
                            DiagnosticKind::TypeMismatch,
                            format!("range bound must be numeric, found {}", bound.ty),
                            bound.span,
                        );
                    }
                }

                let element_ty = start.ty.join(&end.ty);
                (HirForIter::Range { start, end }, element_ty)
            }
            _ => {
                let value = self.lower_expression(iterable);
                let element_ty = value.ty.element();
                (HirForIter::Vector(value), element_ty)
            }
        };

        // The loop variable lives in a scope of its own wrapping the body
        let loop_scope = self.scopes.push(Some(self.current_scope));
        let previous = self.current_scope;
        self.current_scope = loop_scope;

        let loop_binding =
            self.bindings
                .declare(binding.symbol, binding.span, element_ty, BindingKind::Local);
        self.scopes.bind(loop_scope, binding.symbol, loop_binding);

        self.loop_depth += 1;
        let body = self.lower_block(body);
        self.loop_depth -= 1;

        self.current_scope = previous;

        Some(HirStmt::For {
            binding: loop_binding,
            iter,
            body,
            span,
        })
    }

    fn lower_assignment(
        &mut self,
        span: Span,
        target: &ast::Expression,
        operator: Option<&ast::BinaryOperator>,
        value: &ast::Expression,
    ) -> Option<HirStmt> {
        let value = self.lower_expression(value);
        let target = self.lower_assignment_target(target, &value)?;

        // Desugar `x += v` into `x = x + v`. Lowering is deterministic and
        // running it on the desugared form is a no-op because HIR has no
        // compound assignment to re-expand.
        let value = match operator {
            Some(operator) => {
                let lhs = self.lvalue_as_expr(&target, span);
                let ty = self.binary_result_ty(operator.kind, &lhs.ty, &value.ty, span);

                HirExpr {
                    ty,
                    span: value.span,
                    kind: HirExprKind::Binary {
                        op: operator.kind,
                        lhs: Box::new(lhs),
                        rhs: Box::new(value),
                    },
                }
            }
            None => value,
        };

        // Refine the target binding's type from the assigned value
        if let HirLValue::Binding(binding) = &target {
            let current = self.bindings.get(*binding).ty.clone();
            let joined = if current.is_unknown() {
                value.ty.clone()
            } else if value.ty.is_unknown() {
                current.clone()
            } else {
                let joined = current.join(&value.ty);
                if joined.is_unknown() {
                    self.error(
                        DiagnosticKind::TypeMismatch,
                        format!(
                            "`{}` has type {current} but is assigned {}",
                            self.bindings.get(*binding).name,
                            value.ty
                        ),
                        value.span,
                    );
                }
                joined
            };
            self.bindings.bindings[*binding].ty = joined;
        }

        Some(HirStmt::Assign {
            target,
            value,
            span,
        })
    }

    fn lower_assignment_target(
        &mut self,
        target: &ast::Expression,
        value: &HirExpr,
    ) -> Option<HirLValue> {
        match &target.kind {
            ExpressionKind::Grouping(inner) => self.lower_assignment_target(inner, value),
            ExpressionKind::Identifier(identifier) => {
                if let Some(binding) = self.scopes.lookup(self.current_scope, identifier.symbol) {
                    self.bindings.bindings[binding].reassigned = true;
                    return Some(HirLValue::Binding(binding));
                }

                // A dotted name whose prefix is bound to a record is a field
                // assignment. Only one level deep: `a.b.c <- v` would lose
                // the update under R's copy semantics when lowered through a
                // temporary.
                if let Some((base, fields)) = self.resolve_dotted(identifier.symbol) {
                    if fields.len() > 1 {
                        self.error(
                            DiagnosticKind::Syntax,
                            "nested field assignment targets are not supported",
                            identifier.span,
                        );
                        return None;
                    }

                    let (field, base) = self.build_field_chain(base, fields, identifier.span);
                    return Some(HirLValue::Field { base, field });
                }

                // Otherwise this is an R-style implicit declaration in the
                // enclosing function (or script) scope
                let kind = if self.in_function {
                    BindingKind::Local
                } else {
                    BindingKind::Global
                };
                let binding = self.bindings.declare(
                    identifier.symbol,
                    identifier.span,
                    value.ty.clone(),
                    kind,
                );
                self.scopes
                    .bind(self.function_scope, identifier.symbol, binding);

                Some(HirLValue::Binding(binding))
            }
            ExpressionKind::Index { base, index } => {
                // Only plain names can be written through an index; nested
                // targets like `m[i][j]` would lose the update under R's
                // copy semantics
                if !matches!(base.kind, ExpressionKind::Identifier(_)) {
                    self.error(
                        DiagnosticKind::Syntax,
                        "indexed assignment target must be a plain name",
                        base.span,
                    );
                    return None;
                }

                let base = self.lower_expression(base);
                let index = self.lower_expression(index);

                if !base.ty.is_vector() && !base.ty.is_unknown() && base.ty != Ty::Record {
                    self.error(
                        DiagnosticKind::TypeMismatch,
                        format!("cannot index into a value of type {}", base.ty),
                        base.span,
                    );
                }

                Some(HirLValue::Index { base, index })
            }
            _ => {
                self.error(
                    DiagnosticKind::Syntax,
                    "invalid assignment target",
                    target.span,
                );
                None
            }
        }
    }

    /// Rebuilds an lvalue as the expression it reads as, for compound
    /// assignment desugaring.
    fn lvalue_as_expr(&self, target: &HirLValue, span: Span) -> HirExpr {
        match target {
            HirLValue::Binding(binding) => HirExpr {
                ty: self.bindings.get(*binding).ty.clone(),
                span,
                kind: HirExprKind::Binding(*binding),
            },
            HirLValue::Index { base, index } => HirExpr {
                ty: base.ty.element(),
                span,
                kind: HirExprKind::Index {
                    base: Box::new(base.clone()),
                    index: Box::new(index.clone()),
                },
            },
            HirLValue::Field { base, field } => HirExpr {
                ty: Ty::Unknown,
                span,
                kind: HirExprKind::Field {
                    base: Box::new(base.clone()),
                    field: *field,
                },
            },
        }
    }

    /// Resolves a dotted name against bound prefixes, longest first. Returns
    /// the base binding and the remaining field path.
    fn resolve_dotted(&self, symbol: InternedSymbol) -> Option<(BindingId, Vec<InternedSymbol>)> {
        let full = symbol.value();

        for (position, _) in full.match_indices('.').collect::<Vec<_>>().into_iter().rev() {
            let prefix = InternedSymbol::new(&full[..position]);

            if let Some(binding) = self.scopes.lookup(self.current_scope, prefix) {
                if self.bindings.get(binding).ty != Ty::Record {
                    continue;
                }

                let fields = full[position + 1..]
                    .split('.')
                    .map(InternedSymbol::new)
                    .collect();
                return Some((binding, fields));
            }
        }

        None
    }

    /// Builds `base$f1$f2` style access; returns the final field name and
    /// the expression it is read from.
    fn build_field_chain(
        &self,
        base: BindingId,
        mut fields: Vec<InternedSymbol>,
        span: Span,
    ) -> (InternedSymbol, HirExpr) {
        let last = fields.pop().expect("dotted name has at least one field");

        let mut expr = HirExpr {
            ty: self.bindings.get(base).ty.clone(),
            span,
            kind: HirExprKind::Binding(base),
        };

        for field in fields {
            expr = HirExpr {
                ty: Ty::Unknown,
                span,
                kind: HirExprKind::Field {
                    base: Box::new(expr),
                    field,
                },
            };
        }

        (last, expr)
    }

    fn lower_condition(&mut self, condition: &ast::Expression) -> HirExpr {
        let condition = self.lower_expression(condition);

        if condition.ty != Ty::Logical && !condition.ty.is_unknown() {
            self.error(
                DiagnosticKind::TypeMismatch,
                format!("condition must be a logical scalar, found {}", condition.ty),
                condition.span,
            );
        }

        condition
    }

    /* Expressions */

    fn lower_expression(&mut self, expression: &ast::Expression) -> HirExpr {
        let span = expression.span;

        match &expression.kind {
            ExpressionKind::Literal(literal) => self.lower_literal(literal),
            ExpressionKind::Grouping(inner) => self.lower_expression(inner),
            ExpressionKind::Identifier(identifier) => {
                if let Some(binding) = self.scopes.lookup(self.current_scope, identifier.symbol) {
                    return HirExpr {
                        ty: self.bindings.get(binding).ty.clone(),
                        span,
                        kind: HirExprKind::Binding(binding),
                    };
                }

                if let Some((base, fields)) = self.resolve_dotted(identifier.symbol) {
                    let (field, base) = self.build_field_chain(base, fields, span);
                    return HirExpr {
                        ty: Ty::Unknown,
                        span,
                        kind: HirExprKind::Field {
                            base: Box::new(base),
                            field,
                        },
                    };
                }

                self.error(
                    DiagnosticKind::UnboundName,
                    format!("use of unbound name `{}`", identifier.symbol),
                    identifier.span,
                );

                HirExpr {
                    ty: Ty::Unknown,
                    span,
                    kind: HirExprKind::Error,
                }
            }
            ExpressionKind::Call { target, arguments } => self.lower_call(span, target, arguments),
            ExpressionKind::Binary { operator, lhs, rhs } => {
                let lhs = self.lower_expression(lhs);
                let rhs = self.lower_expression(rhs);
                let ty = self.binary_result_ty(operator.kind, &lhs.ty, &rhs.ty, operator.span);

                HirExpr {
                    ty,
                    span,
                    kind: HirExprKind::Binary {
                        op: operator.kind,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                }
            }
            ExpressionKind::Unary { operator, operand } => {
                let operand = self.lower_expression(operand);

                let ty = match operator.kind {
                    UnaryOperatorKind::LogicalNot => {
                        if operand.ty != Ty::Logical
                            && operand.ty != Ty::vector_of(Ty::Logical)
                            && !operand.ty.is_unknown()
                        {
                            self.error(
                                DiagnosticKind::TypeMismatch,
                                format!("`!` requires a logical operand, found {}", operand.ty),
                                operand.span,
                            );
                            Ty::Unknown
                        } else {
                            operand.ty.clone()
                        }
                    }
                    UnaryOperatorKind::Negate => {
                        if !operand.ty.element().is_numeric() && !operand.ty.is_unknown() {
                            self.error(
                                DiagnosticKind::TypeMismatch,
                                format!("cannot negate a value of type {}", operand.ty),
                                operand.span,
                            );
                            Ty::Unknown
                        } else {
                            operand.ty.clone()
                        }
                    }
                };

                HirExpr {
                    ty,
                    span,
                    kind: HirExprKind::Unary {
                        op: operator.kind,
                        operand: Box::new(operand),
                    },
                }
            }
            ExpressionKind::Index { base, index } => {
                let base = self.lower_expression(base);
                let index = self.lower_expression(index);

                let ty = match &base.ty {
                    Ty::Vector(element) => (**element).clone(),
                    Ty::Record | Ty::Unknown => Ty::Unknown,
                    // R scalars are length-one vectors, so indexing one is
                    // legal if unusual
                    scalar => scalar.clone(),
                };

                HirExpr {
                    ty,
                    span,
                    kind: HirExprKind::Index {
                        base: Box::new(base),
                        index: Box::new(index),
                    },
                }
            }
            ExpressionKind::Array(elements) => {
                let elements: Vec<_> = elements
                    .iter()
                    .map(|element| self.lower_expression(element))
                    .collect();

                let element_ty = elements
                    .iter()
                    .fold(None::<Ty>, |acc, e| match acc {
                        None => Some(e.ty.clone()),
                        Some(previous) => Some(previous.join(&e.ty)),
                    })
                    .unwrap_or(Ty::Unknown);

                HirExpr {
                    ty: Ty::vector_of(element_ty.element()),
                    span,
                    kind: HirExprKind::Vector(elements),
                }
            }
            ExpressionKind::Record(fields) => {
                let fields = fields
                    .iter()
                    .map(|(name, value)| (name.symbol, self.lower_expression(value)))
                    .collect();

                HirExpr {
                    ty: Ty::Record,
                    span,
                    kind: HirExprKind::Record(fields),
                }
            }
            ExpressionKind::Range { start, end } => {
                let start = self.lower_expression(start);
                let end = self.lower_expression(end);

                let element = start.ty.join(&end.ty);

                HirExpr {
                    ty: Ty::vector_of(element.element()),
                    span,
                    kind: HirExprKind::Range {
                        start: Box::new(start),
                        end: Box::new(end),
                    },
                }
            }
            ExpressionKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let condition = self.lower_condition(condition);
                let then_branch = self.lower_branch_expression(then_branch);
                let else_branch = self.lower_branch_expression(else_branch);

                let then_ty = then_branch.value_ty();
                let else_ty = else_branch.value_ty();
                let ty = if then_ty.is_unknown() || else_ty.is_unknown() {
                    Ty::Unknown
                } else {
                    let joined = then_ty.join(&else_ty);
                    if joined.is_unknown() {
                        self.error(
                            DiagnosticKind::TypeMismatch,
                            format!("`if` arms have incompatible types {then_ty} and {else_ty}"),
                            span,
                        );
                    }
                    joined
                };

                HirExpr {
                    ty,
                    span,
                    kind: HirExprKind::If {
                        condition: Box::new(condition),
                        then_branch: Box::new(then_branch),
                        else_branch: Box::new(else_branch),
                    },
                }
            }
            ExpressionKind::Block(block) => {
                // A block in expression position only occurs as an if arm;
                // handled here for completeness
                let block = self.lower_block(block);
                let ty = block.value_ty();

                HirExpr {
                    ty,
                    span,
                    kind: HirExprKind::If {
                        condition: Box::new(HirExpr {
                            ty: Ty::Logical,
                            span,
                            kind: HirExprKind::Lit(HirLit::Logical(true)),
                        }),
                        then_branch: Box::new(block.clone()),
                        else_branch: Box::new(block),
                    },
                }
            }
        }
    }

    /// Lowers an if-expression arm into a block
    fn lower_branch_expression(&mut self, expression: &ast::Expression) -> HirBlock {
        if let ExpressionKind::Block(block) = &expression.kind {
            return self.lower_block(block);
        }

        let expression = self.lower_expression(expression);
        HirBlock {
            stmts: vec![HirStmt::Expr(expression)],
        }
    }

    fn lower_call(
        &mut self,
        span: Span,
        target: &ast::Expression,
        arguments: &[ast::Expression],
    ) -> HirExpr {
        let ExpressionKind::Identifier(identifier) = &target.kind else {
            self.error(
                DiagnosticKind::TypeMismatch,
                "only named functions can be called",
                target.span,
            );
            return HirExpr {
                ty: Ty::Unknown,
                span,
                kind: HirExprKind::Error,
            };
        };

        let mut args: Vec<_> = arguments
            .iter()
            .map(|argument| self.lower_expression(argument))
            .collect();

        if let Some(id) = self.fn_ids_by_name.get(&identifier.symbol).copied() {
            let signature = &self.signatures[id.index()];

            if args.len() > signature.params.len() {
                self.error(
                    DiagnosticKind::TypeMismatch,
                    format!(
                        "`{}` takes {} argument(s) but {} were supplied",
                        identifier.symbol,
                        signature.params.len(),
                        args.len()
                    ),
                    span,
                );
            } else {
                // Materialize defaults for the missing trailing arguments
                for param in &signature.params[args.len()..] {
                    match &param.default {
                        Some(default) => args.push(default.clone()),
                        None => {
                            self.error(
                                DiagnosticKind::TypeMismatch,
                                format!(
                                    "missing argument `{}` in call to `{}`",
                                    param.name, identifier.symbol
                                ),
                                span,
                            );
                            break;
                        }
                    }
                }
            }

            let ty = signature.ret.clone();
            return HirExpr {
                ty,
                span,
                kind: HirExprKind::Call {
                    callee: Callee::Fn(id),
                    args,
                },
            };
        }

        if let Some(builtin) = Builtin::from_name(identifier.symbol.value()) {
            self.check_builtin_arity(builtin, args.len(), span);
            let ty = builtin.result_ty(&args.iter().map(|a| a.ty.clone()).collect::<Vec<_>>());

            return HirExpr {
                ty,
                span,
                kind: HirExprKind::Call {
                    callee: Callee::Builtin(builtin),
                    args,
                },
            };
        }

        if self
            .scopes
            .lookup(self.current_scope, identifier.symbol)
            .is_some()
        {
            self.error(
                DiagnosticKind::TypeMismatch,
                format!("`{}` is not callable", identifier.symbol),
                identifier.span,
            );
        } else {
            self.error(
                DiagnosticKind::UnboundName,
                format!("call to undefined function `{}`", identifier.symbol),
                identifier.span,
            );
        }

        HirExpr {
            ty: Ty::Unknown,
            span,
            kind: HirExprKind::Error,
        }
    }

    fn check_builtin_arity(&self, builtin: Builtin, supplied: usize, span: Span) {
        let expected = match builtin {
            Builtin::Print
            | Builtin::SeqLen
            | Builtin::Length
            | Builtin::Sum
            | Builtin::Round
            | Builtin::Sqrt
            | Builtin::Abs => Some(1),
            Builtin::Cat | Builtin::Min | Builtin::Max | Builtin::Concat => None,
        };

        if let Some(expected) = expected {
            if supplied != expected {
                self.error(
                    DiagnosticKind::TypeMismatch,
                    format!(
                        "`{}` takes {expected} argument(s) but {supplied} were supplied",
                        builtin.name()
                    ),
                    span,
                );
            }
        } else if supplied == 0 && matches!(builtin, Builtin::Min | Builtin::Max) {
            self.error(
                DiagnosticKind::TypeMismatch,
                format!("`{}` requires at least one argument", builtin.name()),
                span,
            );
        }
    }

    fn binary_result_ty(
        &self,
        op: BinaryOperatorKind,
        lhs: &Ty,
        rhs: &Ty,
        span: Span,
    ) -> Ty {
        if lhs.is_unknown() || rhs.is_unknown() {
            return Ty::Unknown;
        }

        if op.is_short_circuit() {
            if *lhs != Ty::Logical || *rhs != Ty::Logical {
                self.error(
                    DiagnosticKind::TypeMismatch,
                    format!("`&&`/`||` require logical scalars, found {lhs} and {rhs}"),
                    span,
                );
                return Ty::Unknown;
            }
            return Ty::Logical;
        }

        if op.is_comparison() {
            if lhs.join(rhs).is_unknown() {
                self.error(
                    DiagnosticKind::TypeMismatch,
                    format!("cannot compare {lhs} with {rhs}"),
                    span,
                );
                return Ty::Unknown;
            }

            return if lhs.is_vector() || rhs.is_vector() {
                Ty::vector_of(Ty::Logical)
            } else {
                Ty::Logical
            };
        }

        // Arithmetic
        let joined = lhs.join(rhs);
        if !joined.element().is_numeric() {
            self.error(
                DiagnosticKind::TypeMismatch,
                format!("cannot apply arithmetic to {lhs} and {rhs}"),
                span,
            );
            return Ty::Unknown;
        }

        match op {
            // Division always produces doubles in R
            BinaryOperatorKind::Divide => {
                if joined.is_vector() {
                    Ty::vector_of(Ty::Double)
                } else {
                    Ty::Double
                }
            }
            _ => joined,
        }
    }

    fn lower_literal(&mut self, literal: &ast::Literal) -> HirExpr {
        let text = literal.symbol.value();
        let span = literal.span;

        let (ty, lit) = match literal.kind {
            LiteralKind::Boolean => (
                Ty::Logical,
                HirLit::Logical(matches!(text, "TRUE" | "true")),
            ),
            LiteralKind::Integer => {
                let digits = text.strip_suffix('L').unwrap_or(text);
                match digits.parse::<i64>() {
                    Ok(value) if i32::try_from(value).is_ok() => {
                        (Ty::Int, HirLit::Int(value as i32))
                    }
                    Ok(value) => {
                        // R itself degrades over-wide L literals to double
                        // with a warning
                        self.warning(
                            DiagnosticKind::TypeMismatch,
                            format!("integer literal {value} is out of range; using double"),
                            span,
                        );
                        (Ty::Double, HirLit::Double(value as f64))
                    }
                    Err(_) => {
                        self.error(
                            DiagnosticKind::Syntax,
                            format!("invalid integer literal `{text}`"),
                            span,
                        );
                        (Ty::Unknown, HirLit::Int(0))
                    }
                }
            }
            LiteralKind::Float => match text.parse::<f64>() {
                Ok(value) => (Ty::Double, HirLit::Double(value)),
                Err(_) => {
                    self.error(
                        DiagnosticKind::Syntax,
                        format!("invalid numeric literal `{text}`"),
                        span,
                    );
                    (Ty::Unknown, HirLit::Double(0.0))
                }
            },
            LiteralKind::String => {
                let inner = text
                    .strip_prefix('"')
                    .and_then(|t| t.strip_suffix('"'))
                    .unwrap_or(text);

                let mut value = String::with_capacity(inner.len());
                let mut chars = inner.chars();
                while let Some(c) = chars.next() {
                    if c != '\\' {
                        value.push(c);
                        continue;
                    }

                    match chars.next() {
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some(other) => value.push(other),
                        None => {}
                    }
                }

                (Ty::Char, HirLit::Str(value))
            }
        };

        HirExpr {
            ty,
            span,
            kind: HirExprKind::Lit(lit),
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::frontend::parser::{DEFAULT_ERROR_CAP, Parser};

    fn lower(input: &str) -> (HirModule, Vec<crate::diagnostics::Diagnostic>) {
        let source = SourceFile::new_in_memory(input);
        let diagnostics = DiagnosticBag::new();
        let module = Parser::parse_module(&source, &diagnostics, DEFAULT_ERROR_CAP);
        let hir = lower_module(&module, &diagnostics);
        (hir, diagnostics.drain())
    }

    fn function<'m>(hir: &'m HirModule, name: &str) -> &'m HirFunction {
        hir.functions
            .iter()
            .find(|f| f.name.value() == name)
            .expect("function not found")
    }

    #[test]
    fn typed_hints_and_fn_short_form_are_lowered() {
        let (hir, diagnostics) = lower(indoc! {r#"
            fn add(a: f64, b: i64) -> f64 = a + b

            fn main() {
              z: int = 10L
              add(1.5, z)
            }
        "#});

        assert!(diagnostics.is_empty(), "{diagnostics:?}");

        let add = function(&hir, "add");
        assert_eq!(add.ret_ty, Ty::Double);
        assert_eq!(add.params[0].ty, Ty::Double);
        assert_eq!(add.params[1].ty, Ty::Int);

        let main = function(&hir, "main");
        let HirStmt::Let { binding, .. } = &main.body.stmts[0] else {
            panic!("expected let statement");
        };
        assert_eq!(hir.bindings.get(*binding).ty, Ty::Int);
    }

    #[test]
    fn compound_assignment_desugars_to_binary() {
        let (hir, diagnostics) = lower(indoc! {r#"
            fn main(n) {
              let s = 0L
              for i in 1L..n {
                s += i
              }
              s
            }
        "#});

        assert!(diagnostics.is_empty(), "{diagnostics:?}");

        let main = function(&hir, "main");
        let HirStmt::For { iter, body, .. } = &main.body.stmts[1] else {
            panic!("expected for statement");
        };

        assert!(matches!(iter, HirForIter::Range { .. }));

        let HirStmt::Assign { value, .. } = &body.stmts[0] else {
            panic!("expected assignment in loop body");
        };
        assert!(matches!(
            &value.kind,
            HirExprKind::Binary {
                op: BinaryOperatorKind::Add,
                ..
            }
        ));
    }

    #[test]
    fn compound_assignment_supports_index_and_field_targets() {
        let (hir, diagnostics) = lower(indoc! {r#"
            fn main() {
              let arr = [1L, 2L, 3L]
              let rec = {x: 10L}
              arr[1L] += 2L
              rec.x -= 3L
              arr[1L] + rec.x
            }
        "#});

        assert!(diagnostics.is_empty(), "{diagnostics:?}");

        let main = function(&hir, "main");

        let mut saw_index = false;
        let mut saw_field = false;
        for stmt in &main.body.stmts {
            if let HirStmt::Assign { target, value, .. } = stmt {
                match target {
                    HirLValue::Index { .. } => {
                        saw_index = matches!(
                            &value.kind,
                            HirExprKind::Binary {
                                op: BinaryOperatorKind::Add,
                                ..
                            }
                        );
                    }
                    HirLValue::Field { .. } => {
                        saw_field = matches!(
                            &value.kind,
                            HirExprKind::Binary {
                                op: BinaryOperatorKind::Subtract,
                                ..
                            }
                        );
                    }
                    _ => {}
                }
            }
        }

        assert!(saw_index, "index compound assignment not desugared");
        assert!(saw_field, "field compound assignment not desugared");
    }

    #[test]
    fn default_parameters_are_preserved_and_typed() {
        let (hir, diagnostics) = lower(indoc! {r#"
            f <- function(a = 0.0, b = 0L, c = TRUE, d = "x") {
              a + b
            }
        "#});

        assert!(diagnostics.is_empty(), "{diagnostics:?}");

        let f = function(&hir, "f");
        assert_eq!(f.params.len(), 4);
        assert!(f.params.iter().all(|p| p.default.is_some()));
        assert_eq!(f.params[0].ty, Ty::Double);
        assert_eq!(f.params[1].ty, Ty::Int);
        assert_eq!(f.params[2].ty, Ty::Logical);
        assert_eq!(f.params[3].ty, Ty::Char);
    }

    #[test]
    fn unbound_name_reports_exactly_one_error_at_the_reference() {
        let input = "main <- function() {\n  print(missing_thing)\n}\n";
        let (_, diagnostics) = lower(input);

        let unbound: Vec<_> = diagnostics
            .iter()
            .filter(|d| d.kind == DiagnosticKind::UnboundName)
            .collect();

        assert_eq!(unbound.len(), 1);
        let span = unbound[0].span;
        assert_eq!(&input[span.start..span.end], "missing_thing");
    }

    #[test]
    fn same_scope_redeclaration_is_an_error() {
        let (_, diagnostics) = lower(indoc! {r#"
            fn main() {
              let x = 1L
              let x = 2L
            }
        "#});

        assert_eq!(
            diagnostics
                .iter()
                .filter(|d| d.kind == DiagnosticKind::Redeclaration)
                .count(),
            1
        );
    }

    #[test]
    fn conflicting_inference_degrades_to_unknown_with_a_diagnostic() {
        let (hir, diagnostics) = lower(indoc! {r#"
            fn main() {
              x <- 1L
              x <- "text"
              x
            }
        "#});

        assert!(
            diagnostics
                .iter()
                .any(|d| d.kind == DiagnosticKind::TypeMismatch)
        );

        // Downstream still sees the function; its value degraded to unknown
        let main = function(&hir, "main");
        assert_eq!(main.ret_ty, Ty::Unknown);
    }

    #[test]
    fn r_style_operator_aliases_resolve_identically() {
        let (hir, diagnostics) = lower(indoc! {r#"
            main <- function() {
              x <- 1L
              y = 2L
              x + y
            }
        "#});

        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        assert_eq!(function(&hir, "main").ret_ty, Ty::Int);
    }
}
