//! The backend renders optimized MIR into a complete, self-contained R
//! program: the runtime prelude, switch configuration, every function
//! definition, then the top-level script statements in source order.

use crate::{
    CompileOptions,
    frontend::{SourceFile, intern::InternedSymbol},
    index::IndexVec,
    middle::{hir::FnId, mir::Function},
};

pub mod rgen;
pub mod runtime;

pub fn emit_program(
    functions: &IndexVec<FnId, Function>,
    script: &Function,
    source: &SourceFile,
    options: &CompileOptions,
) -> String {
    let fn_names: IndexVec<FnId, InternedSymbol> =
        IndexVec::from_raw(functions.iter().map(|function| function.name).collect());

    let mut out = String::new();
    out.push_str(&format!("# Generated by rrc from {}\n", source.origin));
    out.push_str(runtime::R_RUNTIME);

    if !options.runtime_checks {
        out.push_str(runtime::R_RUNTIME_FAST_CONFIG);
    }
    out.push('\n');

    for function in functions.iter() {
        out.push_str(&rgen::emit_function(
            function,
            &fn_names,
            source,
            options.emit_comments,
        ));
        out.push('\n');
    }

    out.push_str(&rgen::emit_script(
        script,
        &fn_names,
        source,
        options.emit_comments,
    ));

    out
}
