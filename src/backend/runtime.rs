//! The embedded R runtime prelude. Every generated program is
//! self-contained: the prelude defines the `.rr_env` switch environment and
//! the guard helpers generated code calls. `--no-runtime` does not drop the
//! prelude (generated code depends on its helpers); it flips the switches
//! so every guard becomes a cheap passthrough.

/// R source prepended to every generated program.
pub const R_RUNTIME: &str = r#"# rr runtime -------------------------------------------------------------
.rr_env <- new.env(parent = emptyenv())
.rr_env$runtime_mode <- "strict"
.rr_env$fast_runtime <- FALSE
.rr_env$strict_index_read <- FALSE
.rr_env$enable_marks <- FALSE

rr_type_error <- function(what, value) {
  stop(sprintf("rr: expected %s but got %s", what, paste(class(value), collapse = "/")),
       call. = FALSE)
}

rr_bool <- function(x) {
  if (.rr_env$fast_runtime) return(x)
  if (!is.logical(x)) rr_type_error("a logical scalar", x)
  if (length(x) != 1L) rr_type_error("a logical scalar", x)
  if (is.na(x)) rr_type_error("a non-NA condition", x)
  x
}

rr_index1_read_strict <- function(x, i, what) {
  if (!is.numeric(i) || length(i) != 1L || is.na(i)) rr_type_error("a scalar index", i)
  if (i < 1L || i > length(x)) {
    stop(sprintf("rr: %s out of bounds (%d of %d)", what, as.integer(i), length(x)),
         call. = FALSE)
  }
  x[[i]]
}

rr_index1_read <- function(x, i, what) {
  if (.rr_env$fast_runtime) return(x[[i]])
  if (.rr_env$strict_index_read) return(rr_index1_read_strict(x, i, what))
  if (!is.numeric(i) || length(i) != 1L || is.na(i)) rr_type_error("a scalar index", i)
  x[[i]]
}

rr_index1_write <- function(i, what) {
  if (.rr_env$fast_runtime) return(i)
  if (!is.numeric(i) || length(i) != 1L || is.na(i)) rr_type_error("a scalar index", i)
  if (i < 1L) {
    stop(sprintf("rr: %s out of bounds (%d)", what, as.integer(i)), call. = FALSE)
  }
  i
}

rr_seq <- function(from, to) {
  if (to < from) return(vector(mode = if (is.integer(from)) "integer" else "numeric"))
  seq.int(from, to)
}

rr_mark <- function(label) {
  if (!.rr_env$enable_marks) return(invisible(NULL))
  cat(sprintf("[rr] %s\n", label))
  invisible(NULL)
}
# -------------------------------------------------------------------------
"#;

/// Switch overrides appended after the prelude when runtime checking is
/// disabled.
pub const R_RUNTIME_FAST_CONFIG: &str = r#".rr_env$runtime_mode <- "off"
.rr_env$fast_runtime <- TRUE
"#;

