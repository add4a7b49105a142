//! rrc compiles programs written in the RR language into equivalent,
//! runnable R source. The pipeline is strictly staged: parse, HIR build
//! (scope resolution, desugaring, inference), MIR lowering (explicit
//! control-flow graphs), the Tachyon optimizer, and finally R code
//! generation. Diagnostics from every stage collect in one per-run bag;
//! any stage that records an error finishes its own best-effort pass and
//! then halts the pipeline, so partial code is never emitted.

use std::sync::Arc;

use rayon::prelude::*;

use crate::{
    diagnostics::{Diagnostic, DiagnosticBag, Stage},
    frontend::{SourceFile, parser::Parser},
    index::IndexVec,
    middle::{
        lower,
        mir::{self, Function, lowering, pretty_print},
    },
    tachyon::ProgramSnapshot,
};

pub mod backend;
pub mod diagnostics;
pub mod frontend;
pub mod index;
pub mod middle;
pub mod tachyon;

pub use frontend::parser::DEFAULT_ERROR_CAP;
pub use tachyon::OptLevel;

#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Which Tachyon passes run, and their iteration cap
    pub opt_level: OptLevel,
    /// Annotate emitted statements with `# rr:<line>` provenance comments
    pub emit_comments: bool,
    /// Maximum number of syntax errors collected before the parse gives up
    pub error_cap: usize,
    /// Whether the generated program keeps its runtime guards strict
    pub runtime_checks: bool,
    /// Capture a pretty-printed dump of the optimized MIR
    pub dump_mir: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            opt_level: OptLevel::Full,
            emit_comments: false,
            error_cap: DEFAULT_ERROR_CAP,
            runtime_checks: true,
            dump_mir: false,
        }
    }
}

#[derive(Debug)]
pub struct CompileOutput {
    /// The generated program; present only when the run was fully clean
    pub r_source: Option<String>,
    /// Every diagnostic of the run, ordered by source position
    pub diagnostics: Vec<Diagnostic>,
    /// The optimized MIR, when requested
    pub mir_dump: Option<String>,
}

/// Compiles one RR source unit. This is the single entry point the CLI and
/// other collaborators use; they supply source text and options, and render
/// the returned diagnostics and emitted code however they like.
pub fn compile(source: &SourceFile, options: &CompileOptions) -> CompileOutput {
    let bag = DiagnosticBag::new();

    log::debug!("parsing {}", source.origin);
    let module = Parser::parse_module(source, &bag, options.error_cap);
    if bag.has_errors() {
        return halted(bag);
    }

    log::debug!("building HIR");
    let hir = lower::lower_module(&module, &bag);
    if bag.has_errors() {
        return halted(bag);
    }

    // Each top-level callable owns a self-contained graph, so lowering and
    // optimization fan out across them; the diagnostic bag is the only
    // shared state
    log::debug!("lowering MIR for {} function(s)", hir.functions.len());
    let functions: Vec<Function> = hir
        .functions
        .indices()
        .collect::<Vec<_>>()
        .into_par_iter()
        .map(|id| lowering::lower_function(&hir, id, &bag))
        .collect();
    let script = lowering::lower_script(&hir, &bag);
    if bag.has_errors() {
        return halted(bag);
    }

    log::debug!("running tachyon at {:?}", options.opt_level);
    let snapshot = Arc::new(ProgramSnapshot::new(IndexVec::from_raw(functions)));
    let cap = options.opt_level.iteration_cap();

    let mut optimized: Vec<Function> = snapshot
        .functions
        .iter()
        .cloned()
        .collect::<Vec<_>>()
        .into_par_iter()
        .map(|mut function| {
            let passes = options.opt_level.passes(snapshot.clone());
            tachyon::optimize(&mut function, &passes, cap);
            function
        })
        .collect();

    let mut script = script;
    {
        let passes = options.opt_level.passes(snapshot.clone());
        tachyon::optimize(&mut script, &passes, cap);
    }

    for function in optimized.iter().chain(std::iter::once(&script)) {
        for violation in mir::validate(function) {
            bag.record(Diagnostic::internal(
                Stage::Optimize,
                format!(
                    "optimization left `{}` with a malformed graph: {violation}",
                    function.name
                ),
                function.span,
            ));
        }
    }
    if bag.has_errors() {
        return halted(bag);
    }

    let functions = IndexVec::from_raw(std::mem::take(&mut optimized));

    let mir_dump = options.dump_mir.then(|| {
        let mut dump = String::new();
        for function in functions.iter().chain(std::iter::once(&script)) {
            dump.push_str(&pretty_print::pretty_print_function(function));
            dump.push('\n');
        }
        dump
    });

    log::debug!("emitting R source");
    let r_source = backend::emit_program(&functions, &script, source, options);

    CompileOutput {
        r_source: Some(r_source),
        diagnostics: bag.drain(),
        mir_dump,
    }
}

fn halted(bag: DiagnosticBag) -> CompileOutput {
    CompileOutput {
        r_source: None,
        diagnostics: bag.drain(),
        mir_dump: None,
    }
}
