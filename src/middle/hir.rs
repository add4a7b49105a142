//! The high-level intermediate representation. Still close to the surface
//! syntax, but every name is resolved to a binding, sugar (compound
//! assignment, expression-bodied functions, call-site defaults) is gone, and
//! every expression carries an inferred type. Grouping parens and most node
//! IDs from the AST are dropped.

use hashbrown::HashMap;
use strum::EnumString;

use crate::{
    frontend::{
        ast::{BinaryOperatorKind, UnaryOperatorKind},
        intern::InternedSymbol,
        lexer::Span,
    },
    index::{IndexVec, simple_index},
    middle::ty::Ty,
};

simple_index! {
    /// Identifies a resolved binding (parameter, local, or script global)
    pub struct BindingId;
}

simple_index! {
    /// Identifies a lexical scope in the scope tree
    pub struct ScopeId;
}

simple_index! {
    /// Identifies a top-level function in its module
    pub struct FnId;
}

#[derive(Debug)]
pub struct HirModule {
    pub functions: IndexVec<FnId, HirFunction>,
    /// Top-level script statements in source order
    pub script: Vec<HirStmt>,
    pub bindings: BindingTable,
    pub scopes: ScopeTree,
}

#[derive(Debug)]
pub struct HirFunction {
    pub name: InternedSymbol,
    pub span: Span,
    pub params: Vec<HirParam>,
    pub ret_ty: Ty,
    pub body: HirBlock,
}

#[derive(Debug)]
pub struct HirParam {
    pub binding: BindingId,
    pub name: InternedSymbol,
    pub ty: Ty,
    pub default: Option<HirExpr>,
    pub span: Span,
}

/// A sequence of statements. The block's value is the value of its trailing
/// expression statement, if any; otherwise unit.
#[derive(Debug, Clone)]
pub struct HirBlock {
    pub stmts: Vec<HirStmt>,
}

impl HirBlock {
    /// The inferred type of the block's value
    pub fn value_ty(&self) -> Ty {
        match self.stmts.last() {
            Some(HirStmt::Expr(expression)) => expression.ty.clone(),
            _ => Ty::Unit,
        }
    }
}

#[derive(Debug, Clone)]
pub enum HirStmt {
    /// An explicit declaration (`let x = v`, `x: int = v`)
    Let {
        binding: BindingId,
        value: HirExpr,
        span: Span,
    },
    /// Assignment to an already-visible target, or an R-style implicit
    /// declaration. Compound assignments have been desugared away.
    Assign {
        target: HirLValue,
        value: HirExpr,
        span: Span,
    },
    If {
        condition: HirExpr,
        then_branch: HirBlock,
        else_branch: Option<HirBlock>,
    },
    While {
        condition: HirExpr,
        body: HirBlock,
    },
    For {
        binding: BindingId,
        iter: HirForIter,
        body: HirBlock,
        span: Span,
    },
    Break(Span),
    Continue(Span),
    Return(Option<HirExpr>, Span),
    Expr(HirExpr),
}

#[derive(Debug, Clone)]
pub enum HirForIter {
    /// `start..end`, always inclusive
    Range { start: HirExpr, end: HirExpr },
    /// Iteration over the elements of a vector value
    Vector(HirExpr),
}

#[derive(Debug, Clone)]
pub enum HirLValue {
    Binding(BindingId),
    Index { base: HirExpr, index: HirExpr },
    Field { base: HirExpr, field: InternedSymbol },
}

#[derive(Debug, Clone)]
pub struct HirExpr {
    pub ty: Ty,
    pub span: Span,
    pub kind: HirExprKind,
}

#[derive(Debug, Clone)]
pub enum HirExprKind {
    Lit(HirLit),
    Binding(BindingId),
    Call {
        callee: Callee,
        args: Vec<HirExpr>,
    },
    Binary {
        op: BinaryOperatorKind,
        lhs: Box<HirExpr>,
        rhs: Box<HirExpr>,
    },
    Unary {
        op: UnaryOperatorKind,
        operand: Box<HirExpr>,
    },
    Index {
        base: Box<HirExpr>,
        index: Box<HirExpr>,
    },
    Field {
        base: Box<HirExpr>,
        field: InternedSymbol,
    },
    Vector(Vec<HirExpr>),
    Record(Vec<(InternedSymbol, HirExpr)>),
    /// `start..end`, always inclusive
    Range {
        start: Box<HirExpr>,
        end: Box<HirExpr>,
    },
    If {
        condition: Box<HirExpr>,
        then_branch: Box<HirBlock>,
        else_branch: Box<HirBlock>,
    },
    /// Placeholder produced when resolution failed. Never survives past the
    /// HIR stage because the pipeline halts on its diagnostic.
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HirLit {
    Int(i32),
    Double(f64),
    Logical(bool),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callee {
    Fn(FnId),
    Builtin(Builtin),
}

/// The R functions RR programs may call directly. Purity here is what the
/// optimizer relies on: anything not in this list is assumed to have side
/// effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Builtin {
    Print,
    Cat,
    SeqLen,
    Length,
    Sum,
    Round,
    Sqrt,
    Abs,
    Min,
    Max,
    #[strum(serialize = "c")]
    Concat,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        name.parse().ok()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::Cat => "cat",
            Builtin::SeqLen => "seq_len",
            Builtin::Length => "length",
            Builtin::Sum => "sum",
            Builtin::Round => "round",
            Builtin::Sqrt => "sqrt",
            Builtin::Abs => "abs",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Concat => "c",
        }
    }

    pub fn is_pure(&self) -> bool {
        !matches!(self, Builtin::Print | Builtin::Cat)
    }

    /// Result type given argument types
    pub fn result_ty(&self, args: &[Ty]) -> Ty {
        let join_args = || {
            args.iter()
                .fold(None::<Ty>, |acc, ty| match acc {
                    None => Some(ty.clone()),
                    Some(previous) => Some(previous.join(ty)),
                })
                .unwrap_or(Ty::Unknown)
        };

        match self {
            Builtin::Print | Builtin::Cat => Ty::Unit,
            Builtin::SeqLen => Ty::vector_of(Ty::Int),
            Builtin::Length => Ty::Int,
            // sum over integers stays integer in R
            Builtin::Sum => args.first().map(|t| t.element()).unwrap_or(Ty::Unknown),
            Builtin::Round | Builtin::Sqrt => Ty::Double,
            Builtin::Abs => args.first().map(|t| t.element()).unwrap_or(Ty::Unknown),
            Builtin::Min | Builtin::Max => join_args().element(),
            Builtin::Concat => match join_args() {
                Ty::Vector(element) => Ty::Vector(element),
                Ty::Unknown => Ty::Unknown,
                scalar => Ty::vector_of(scalar),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Param(FnId),
    Local,
    /// Declared at script top level
    Global,
}

#[derive(Debug)]
pub struct Binding {
    pub name: InternedSymbol,
    pub span: Span,
    pub ty: Ty,
    pub kind: BindingKind,
    /// Whether any assignment (re-)writes this binding after its
    /// declaration. Parameters with `true` get an entry copy in codegen.
    pub reassigned: bool,
}

/// All bindings of a module. Built once during HIR construction and
/// read-only afterward.
#[derive(Debug, Default)]
pub struct BindingTable {
    pub bindings: IndexVec<BindingId, Binding>,
}

impl BindingTable {
    pub fn declare(&mut self, name: InternedSymbol, span: Span, ty: Ty, kind: BindingKind) -> BindingId {
        self.bindings.push(Binding {
            name,
            span,
            ty,
            kind,
            reassigned: false,
        })
    }

    pub fn get(&self, id: BindingId) -> &Binding {
        &self.bindings[id]
    }
}

#[derive(Debug)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    pub entries: HashMap<InternedSymbol, BindingId>,
}

/// The lexical scope tree. Child scopes keep a non-owning (index) link to
/// their parent for lookup fallthrough.
#[derive(Debug, Default)]
pub struct ScopeTree {
    pub scopes: IndexVec<ScopeId, Scope>,
}

impl ScopeTree {
    pub fn push(&mut self, parent: Option<ScopeId>) -> ScopeId {
        self.scopes.push(Scope {
            parent,
            entries: HashMap::new(),
        })
    }

    pub fn bind(&mut self, scope: ScopeId, name: InternedSymbol, binding: BindingId) {
        self.scopes[scope].entries.insert(name, binding);
    }

    /// Looks a name up in the given scope only, without parent fallthrough
    pub fn lookup_shallow(&self, scope: ScopeId, name: InternedSymbol) -> Option<BindingId> {
        self.scopes[scope].entries.get(&name).copied()
    }

    /// Walks the scope chain from the given scope towards the root
    pub fn lookup(&self, mut scope: ScopeId, name: InternedSymbol) -> Option<BindingId> {
        loop {
            if let Some(binding) = self.lookup_shallow(scope, name) {
                return Some(binding);
            }

            scope = self.scopes[scope].parent?;
        }
    }
}
