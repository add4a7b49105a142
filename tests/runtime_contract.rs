//! The generated program's runtime contract: the prelude is always
//! embedded, its switch environment and guard helpers exist, and generated
//! code routes indexing and conditions through them.

use rrc::{CompileOptions, compile, backend::runtime::R_RUNTIME, frontend::SourceFile};

#[test]
fn rr_bool_requires_logical_scalar() {
    assert!(
        R_RUNTIME.contains("if (!is.logical(x)) rr_type_error"),
        "rr_bool should reject non-logical conditions"
    );
}

#[test]
fn strict_index_read_path_exists() {
    assert!(
        R_RUNTIME.contains("rr_index1_read_strict <- function"),
        "strict index-read helper should exist"
    );
    assert!(
        R_RUNTIME.contains(".rr_env$strict_index_read <-"),
        "strict index-read runtime switch should exist"
    );
    assert!(
        R_RUNTIME.contains("if (.rr_env$strict_index_read)"),
        "rr_index1_read should route to the strict helper when enabled"
    );
}

#[test]
fn runtime_mode_fast_path_switches_exist() {
    assert!(
        R_RUNTIME.contains(".rr_env$runtime_mode <-"),
        "runtime mode switch should exist"
    );
    assert!(
        R_RUNTIME.contains(".rr_env$fast_runtime <-"),
        "fast-runtime switch should exist"
    );
    assert!(
        R_RUNTIME.contains(".rr_env$enable_marks <-"),
        "mark toggle switch should exist"
    );
    assert!(
        R_RUNTIME.contains("if (!.rr_env$enable_marks) return(invisible(NULL))"),
        "rr_mark should support fast no-op mode"
    );
}

#[test]
fn ranges_route_through_rr_seq() {
    assert!(
        R_RUNTIME.contains("rr_seq <- function(from, to)"),
        "inclusive-range helper should exist"
    );
    assert!(
        R_RUNTIME.contains("if (to < from) return(vector("),
        "an empty range must not count down like R's `:`"
    );
}

#[test]
fn generated_programs_embed_the_prelude() {
    let source = SourceFile::new_in_memory("v <- seq_len(3L)\nprint(v[2L])\n");
    let output = compile(&source, &CompileOptions::default());
    let emitted = output.r_source.expect("clean compile");

    assert!(emitted.contains(".rr_env <- new.env(parent = emptyenv())"));
    assert!(emitted.contains("rr_index1_read <- function"));
    assert!(emitted.contains(r#"rr_index1_read(v, 2L, "index")"#));
}
