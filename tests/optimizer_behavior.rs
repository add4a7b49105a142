//! End-to-end behavior of the Tachyon pass pipeline, observed through the
//! emitted R source.

use indoc::indoc;

use rrc::{CompileOptions, OptLevel, compile, frontend::SourceFile};

fn emit_at(source: &str, opt_level: OptLevel) -> String {
    let source = SourceFile::new_in_memory(source);
    let output = compile(
        &source,
        &CompileOptions {
            opt_level,
            ..CompileOptions::default()
        },
    );

    output
        .r_source
        .unwrap_or_else(|| panic!("compile failed: {:?}", output.diagnostics))
}

#[test]
fn constant_folding_emits_the_literal() {
    let program = indoc! {r#"
        main <- function() {
          x <- 2L + 3L
          print(x)
        }

        main()
    "#};

    let unoptimized = emit_at(program, OptLevel::None);
    assert!(unoptimized.contains("(2L + 3L)"));

    let optimized = emit_at(program, OptLevel::Full);
    assert!(
        !optimized.contains("(2L + 3L)"),
        "the addition must fold away:\n{optimized}"
    );
    assert!(
        optimized.contains("print(5L)"),
        "the folded constant must reach the call:\n{optimized}"
    );
}

#[test]
fn dead_code_is_removed_but_side_effects_stay() {
    let program = indoc! {r#"
        main <- function(a) {
          unused <- a * 1000L
          print(a)
          a
        }
    "#};

    let optimized = emit_at(program, OptLevel::Full);

    assert!(
        !optimized.contains("unused"),
        "the dead multiply must be eliminated:\n{optimized}"
    );
    assert!(
        optimized.contains("print(.arg_a)"),
        "the call's output is observable:\n{optimized}"
    );
}

#[test]
fn loop_invariant_multiply_is_hoisted_exactly_once() {
    let program = indoc! {r#"
        main <- function(a, b, n) {
          s <- 0L
          for i in 1L..n {
            x <- a * b
            s <- s + x
          }
          s
        }
    "#};

    let optimized = emit_at(program, OptLevel::Full);

    assert_eq!(
        optimized.matches("(.arg_a * .arg_b)").count(),
        1,
        "the invariant multiply must appear exactly once:\n{optimized}"
    );

    let hoisted = optimized.find("(.arg_a * .arg_b)").unwrap();
    let loop_start = optimized.find("for (").expect("loop survives");
    assert!(
        hoisted < loop_start,
        "the multiply must sit in front of the loop:\n{optimized}"
    );
}

#[test]
fn common_subexpressions_collapse() {
    let program = indoc! {r#"
        main <- function(a, b) {
          x <- a * b
          y <- a * b
          print(x)
          print(y)
        }
    "#};

    let optimized = emit_at(program, OptLevel::Full);

    assert_eq!(
        optimized.matches("(.arg_a * .arg_b)").count(),
        1,
        "the recomputation must reuse the first result:\n{optimized}"
    );
}

#[test]
fn small_calls_are_inlined_at_full_optimization() {
    let program = indoc! {r#"
        fn add(a: float, b: float) -> float = a + b

        main <- function() {
          y <- add(1.0, 10.0)
          print(y)
          y
        }

        print(main())
    "#};

    let optimized = emit_at(program, OptLevel::Full);

    assert!(
        !optimized.contains("add("),
        "every call to the small callee must be gone:\n{optimized}"
    );
    // Folding through the inlined body leaves the literal result
    assert!(optimized.contains("11"), "{optimized}");
}

#[test]
fn recursive_callees_are_never_inlined() {
    let program = indoc! {r#"
        fn countdown(n: int) {
          if (n > 0L) {
            countdown(n - 1L)
          }
          n
        }

        main <- function() {
          countdown(3L)
        }
    "#};

    let optimized = emit_at(program, OptLevel::Full);

    assert!(
        optimized.contains("countdown("),
        "recursive calls must survive:\n{optimized}"
    );
}

#[test]
fn whole_vector_map_loops_become_vector_operations() {
    let program = indoc! {r#"
        main <- function(n) {
          p <- seq_len(n)
          for i in 1L..n {
            p[i] <- p[i] * 2L
          }
          p
        }
    "#};

    let unoptimized = emit_at(program, OptLevel::None);
    assert!(unoptimized.contains("for ("));

    let optimized = emit_at(program, OptLevel::Full);
    assert!(
        !optimized.contains("for ("),
        "the scalar loop must be rewritten:\n{optimized}"
    );
    assert!(
        optimized.contains("(p * 2L)"),
        "the rewrite must use R's vectorized multiply:\n{optimized}"
    );
}

#[test]
fn whole_vector_reductions_become_sum() {
    let program = indoc! {r#"
        total <- function(v) {
          s <- 0L
          for x in v {
            s <- s + x
          }
          s
        }
    "#};

    let optimized = emit_at(program, OptLevel::Full);

    assert!(
        optimized.contains("sum("),
        "the reduction must use sum():\n{optimized}"
    );
    assert!(!optimized.contains("for ("), "{optimized}");
}

#[test]
fn partial_width_loops_are_not_vectorized() {
    // Nothing proves p has n elements, so the loop must stay
    let program = indoc! {r#"
        main <- function(p, n) {
          for i in 1L..n {
            p[i] <- p[i] * 2L
          }
          p
        }
    "#};

    let optimized = emit_at(program, OptLevel::Full);
    assert!(optimized.contains("for ("), "{optimized}");
}

#[test]
fn loops_with_observable_effects_are_not_vectorized() {
    let program = indoc! {r#"
        main <- function(v) {
          s <- 0L
          for x in v {
            print(x)
            s <- s + x
          }
          s
        }
    "#};

    let unoptimized = emit_at(program, OptLevel::None);
    let optimized = emit_at(program, OptLevel::Full);

    assert!(optimized.contains("for ("), "{optimized}");
    assert_eq!(
        unoptimized.matches("print(").count(),
        optimized.matches("print(").count(),
    );
}
