use indoc::indoc;

use rrc::{
    CompileOptions, OptLevel, compile,
    diagnostics::DiagnosticKind,
    frontend::SourceFile,
};

fn options_at(opt_level: OptLevel) -> CompileOptions {
    CompileOptions {
        opt_level,
        ..CompileOptions::default()
    }
}

fn compile_clean(source: &str, opt_level: OptLevel) -> String {
    let source = SourceFile::new_in_memory(source);
    let output = compile(&source, &options_at(opt_level));

    let errors: Vec<_> = output
        .diagnostics
        .iter()
        .filter(|d| d.severity == rrc::diagnostics::Severity::Error)
        .collect();
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");

    output.r_source.expect("clean run must emit source")
}

const HYBRID_PROGRAM: &str = indoc! {r#"
    fn add(a: float, b: float) -> float = a + b

    main <- function() {
      x: int = 10L
      y = add(1.0, x)
      print(y)
      y
    }

    print(main())
"#};

#[test]
fn hybrid_surface_syntax_compiles_at_every_level() {
    for opt_level in [OptLevel::None, OptLevel::Basic, OptLevel::Full] {
        let emitted = compile_clean(HYBRID_PROGRAM, opt_level);

        assert!(emitted.contains("add <- function(.arg_a, .arg_b)"));
        assert!(emitted.contains("main <- function()"));
        assert!(emitted.contains("print("));
    }
}

#[test]
fn observable_calls_survive_every_level() {
    // No call sites to inline here, so the emitted text is comparable
    // one-to-one across levels
    let program = indoc! {r#"
        report <- function(v) {
          for x in v {
            print(x)
          }
          print("done")
        }
    "#};

    let baseline = compile_clean(program, OptLevel::None);
    let optimized = compile_clean(program, OptLevel::Full);

    assert_eq!(
        baseline.matches("print(").count(),
        optimized.matches("print(").count(),
        "optimization must not add or drop observable output"
    );
}

#[test]
fn compilation_is_byte_identical_across_runs() {
    // The over-wide literal produces a warning, so diagnostic ordering is
    // exercised too
    let program = indoc! {r#"
        f <- function(seed) {
          seed = (seed * 1103515245L + 12345L) % 2147483648L
          seed
        }

        g <- function(a, b) {
          a * b
        }

        print(f(1L))
    "#};

    let source = SourceFile::new_in_memory(program);
    let first = compile(&source, &options_at(OptLevel::Full));
    let second = compile(&source, &options_at(OptLevel::Full));

    assert_eq!(first.r_source, second.r_source);
    assert_eq!(
        first
            .diagnostics
            .iter()
            .map(|d| (d.span, d.message.clone()))
            .collect::<Vec<_>>(),
        second
            .diagnostics
            .iter()
            .map(|d| (d.span, d.message.clone()))
            .collect::<Vec<_>>(),
    );
}

#[test]
fn binding_error_halts_with_one_diagnostic_at_the_reference() {
    let program = "main <- function() {\n  print(missing_thing)\n}\n";
    let source = SourceFile::new_in_memory(program);
    let output = compile(&source, &CompileOptions::default());

    assert!(output.r_source.is_none(), "no code on a failed run");

    let unbound: Vec<_> = output
        .diagnostics
        .iter()
        .filter(|d| d.kind == DiagnosticKind::UnboundName)
        .collect();
    assert_eq!(unbound.len(), 1);

    let span = unbound[0].span;
    assert_eq!(&program[span.start..span.end], "missing_thing");
}

#[test]
fn independent_syntax_errors_are_all_reported() {
    let program = "x <- )\ny <- 1L\nz <- ]\n";
    let source = SourceFile::new_in_memory(program);
    let output = compile(&source, &CompileOptions::default());

    assert!(output.r_source.is_none());
    assert_eq!(
        output
            .diagnostics
            .iter()
            .filter(|d| d.kind == DiagnosticKind::Syntax)
            .count(),
        2
    );
}

#[test]
fn error_cap_bounds_the_parse() {
    let program = "a <- )\nb <- )\nc <- )\nd <- )\n";
    let source = SourceFile::new_in_memory(program);
    let output = compile(
        &source,
        &CompileOptions {
            error_cap: 2,
            ..CompileOptions::default()
        },
    );

    assert!(output.r_source.is_none());
    assert_eq!(output.diagnostics.len(), 2);
}

#[test]
fn single_line_and_no_paren_forms_compile() {
    let program = indoc! {r#"
        main <- function() {
          s <- 0L
          i <- 0L
          while (i < 5L) i <- i + 1L
          for (k in 1L..5L) s <- s + k
          if (i == 5L) s <- s + 100L else s <- 0L
          while i < 9L {
            i <- i + 1L
          }
          print(s)
          s
        }

        print(main())
    "#};

    let emitted = compile_clean(program, OptLevel::None);

    assert!(emitted.contains("while (rr_bool(i < 5L))"));
    assert!(emitted.contains("for (k in rr_seq(1L, 5L))"));
    assert!(emitted.contains("if (rr_bool(i == 5L))"));
}

#[test]
fn default_parameters_render_into_the_signature() {
    let program = indoc! {r#"
        f <- function(a = 0.0, b = 0L, c = TRUE, d = "x") {
          a + b
        }

        print(f())
    "#};

    let emitted = compile_clean(program, OptLevel::None);

    assert!(emitted.contains(
        r#"f <- function(.arg_a = 0.0, .arg_b = 0L, .arg_c = TRUE, .arg_d = "x")"#
    ));
}

#[test]
fn call_site_defaults_are_materialized() {
    let program = indoc! {r#"
        f <- function(a, b = 2L) {
          a + b
        }

        print(f(1L))
    "#};

    let emitted = compile_clean(program, OptLevel::None);

    // The missing argument is filled in at the call site
    assert!(emitted.contains("f(1L, 2L)"), "emitted:\n{emitted}");
}

#[test]
fn if_expressions_become_branch_assignments() {
    let program = indoc! {r#"
        pick <- function(c: bool, a: int, b: int) {
          x <- if (c) a else b
          x
        }
    "#};

    let emitted = compile_clean(program, OptLevel::None);

    assert!(emitted.contains("x <- .arg_a"));
    assert!(emitted.contains("x <- .arg_b"));
    assert!(emitted.contains("} else {"));
}

#[test]
fn provenance_comments_follow_the_flag() {
    let program = "main <- function() {\n  x <- 1L\n  x\n}\n";
    let source = SourceFile::new_in_memory(program);

    let without = compile(&source, &CompileOptions::default());
    assert!(!without.r_source.unwrap().contains("# rr:"));

    let with = compile(
        &source,
        &CompileOptions {
            emit_comments: true,
            ..CompileOptions::default()
        },
    );
    assert!(with.r_source.unwrap().contains("# rr:2"));
}

#[test]
fn no_runtime_flips_the_fast_switches() {
    let program = "print(1L)\n";
    let source = SourceFile::new_in_memory(program);

    let strict = compile(&source, &CompileOptions::default());
    assert!(!strict.r_source.unwrap().contains(".rr_env$fast_runtime <- TRUE"));

    let fast = compile(
        &source,
        &CompileOptions {
            runtime_checks: false,
            ..CompileOptions::default()
        },
    );
    let emitted = fast.r_source.unwrap();
    assert!(emitted.contains(".rr_env$fast_runtime <- TRUE"));
    assert!(emitted.contains(r#".rr_env$runtime_mode <- "off""#));
    // The helpers generated code depends on are still there
    assert!(emitted.contains("rr_index1_read <- function"));
}

#[test]
fn mir_dump_is_captured_on_request() {
    let program = "main <- function() {\n  1L + 2L\n}\n";
    let source = SourceFile::new_in_memory(program);
    let output = compile(
        &source,
        &CompileOptions {
            dump_mir: true,
            opt_level: OptLevel::None,
            ..CompileOptions::default()
        },
    );

    let dump = output.mir_dump.expect("dump requested");
    assert!(dump.contains("main"));
    assert!(dump.contains("ret"));
}
