//! Shared diagnostic layer used by every compiler stage. Diagnostics are
//! recorded into a per-compilation [`DiagnosticBag`] and returned to the
//! caller at the end of the run; no stage ever aborts the process itself.

use colored::Colorize;
use parking_lot::Mutex;

use crate::frontend::{SourceFile, lexer::Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Note,
    Warning,
    Error,
}

impl core::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Note => f.write_str("note"),
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
        }
    }
}

/// The pipeline stage a diagnostic originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Parse,
    HirBuild,
    MirLower,
    Optimize,
    Codegen,
}

impl core::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Parse => f.write_str("parse"),
            Stage::HirBuild => f.write_str("hir"),
            Stage::MirLower => f.write_str("mir"),
            Stage::Optimize => f.write_str("tachyon"),
            Stage::Codegen => f.write_str("codegen"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticKind {
    Syntax,
    UnboundName,
    Redeclaration,
    TypeMismatch,
    /// A stage invariant was violated by an earlier stage's output. Always
    /// fatal, and always a compiler defect rather than a user mistake.
    Internal,
}

impl core::fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiagnosticKind::Syntax => f.write_str("syntax"),
            DiagnosticKind::UnboundName => f.write_str("unbound-name"),
            DiagnosticKind::Redeclaration => f.write_str("redeclaration"),
            DiagnosticKind::TypeMismatch => f.write_str("type-mismatch"),
            DiagnosticKind::Internal => f.write_str("internal-compiler-error"),
        }
    }
}

/// A single immutable diagnostic
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub stage: Stage,
    pub kind: DiagnosticKind,
    pub message: String,
    pub span: Span,
    pub suggestion: Option<String>,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn error(
        stage: Stage,
        kind: DiagnosticKind,
        message: impl Into<String>,
        span: Span,
    ) -> Self {
        Self {
            severity: Severity::Error,
            stage,
            kind,
            message: message.into(),
            span,
            suggestion: None,
            notes: Vec::new(),
        }
    }

    pub fn warning(
        stage: Stage,
        kind: DiagnosticKind,
        message: impl Into<String>,
        span: Span,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(stage, kind, message, span)
        }
    }

    /// An internal-compiler-error diagnostic, reported with maximum detail
    pub fn internal(stage: Stage, message: impl Into<String>, span: Span) -> Self {
        let mut diagnostic = Self::error(stage, DiagnosticKind::Internal, message, span);
        diagnostic
            .notes
            .push("this is a bug in the compiler, not in the compiled program".to_owned());

        #[cfg(feature = "error-backtrace")]
        {
            diagnostic
                .notes
                .push(format!("{}", std::backtrace::Backtrace::force_capture()));
        }

        diagnostic
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Renders the diagnostic in the usual `error: ... --> file:line:col`
    /// shape with a caret underline below the offending source line.
    pub fn render(&self, source: &SourceFile) -> String {
        let mut out = String::new();

        let header = format!("{}[{}]", self.severity, self.kind);
        let header = match self.severity {
            Severity::Error => header.red().bold(),
            Severity::Warning => header.yellow().bold(),
            Severity::Note => header.blue().bold(),
        };
        out.push_str(&format!("{header}: {}\n", self.message.bold()));

        let line = source.line_for_position(self.span.start);
        let column = source.column_for_position(self.span.start);
        out.push_str(&format!(
            "  {} {}:{}:{} ({})\n",
            "-->".cyan(),
            source.origin,
            line,
            column,
            self.stage
        ));

        if let Some(text) = source.line_text(line) {
            let gutter_width = line.to_string().len();
            out.push_str(&format!(
                "{} {}\n",
                format!("{line} |").cyan(),
                text.trim_end()
            ));

            let width = source
                .value_of_span(self.span)
                .lines()
                .next()
                .map(|l| l.chars().count())
                .unwrap_or(1)
                .max(1);
            out.push_str(&format!(
                "{:gutter$} {} {}{}\n",
                "",
                "|".cyan(),
                " ".repeat(column - 1),
                "^".repeat(width).red().bold(),
                gutter = gutter_width,
            ));
        }

        if let Some(suggestion) = &self.suggestion {
            out.push_str(&format!("  {}: {suggestion}\n", "suggestion".green()));
        }

        for note in &self.notes {
            out.push_str(&format!("  {}: {note}\n", "note".blue()));
        }

        out
    }
}

/// Ordered, run-scoped collection of diagnostics. Shared between pipeline
/// stages (and worker threads inside a stage), created at the start of a
/// compilation run and drained at its end.
#[derive(Debug, Default)]
pub struct DiagnosticBag {
    entries: Mutex<Vec<Diagnostic>>,
}

impl DiagnosticBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, diagnostic: Diagnostic) {
        self.entries.lock().push(diagnostic);
    }

    pub fn has_errors(&self) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn error_count(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    /// Consumes the bag, returning diagnostics ordered by source position.
    ///
    /// Ordering is by span (then severity, stage, and message), never by
    /// arrival order, so concurrent recording from worker threads cannot
    /// change the output between runs.
    pub fn drain(self) -> Vec<Diagnostic> {
        let mut entries = self.entries.into_inner();
        entries.sort_by(|a, b| {
            (a.span.start, a.span.end, b.severity, a.stage, &a.message).cmp(&(
                b.span.start,
                b.span.end,
                a.severity,
                b.stage,
                &b.message,
            ))
        });
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(start: usize, end: usize) -> Span {
        Span::new(start, end)
    }

    #[test]
    fn drain_orders_by_source_position() {
        let bag = DiagnosticBag::new();
        bag.record(Diagnostic::error(
            Stage::HirBuild,
            DiagnosticKind::UnboundName,
            "second",
            span(10, 12),
        ));
        bag.record(Diagnostic::error(
            Stage::Parse,
            DiagnosticKind::Syntax,
            "first",
            span(2, 3),
        ));

        let drained = bag.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].message, "first");
        assert_eq!(drained[1].message, "second");
    }

    #[test]
    fn errors_sort_before_warnings_at_the_same_span() {
        let bag = DiagnosticBag::new();
        bag.record(Diagnostic::warning(
            Stage::HirBuild,
            DiagnosticKind::TypeMismatch,
            "a warning",
            span(4, 5),
        ));
        bag.record(Diagnostic::error(
            Stage::HirBuild,
            DiagnosticKind::TypeMismatch,
            "an error",
            span(4, 5),
        ));

        let drained = bag.drain();
        assert_eq!(drained[0].severity, Severity::Error);
        assert_eq!(drained[1].severity, Severity::Warning);
    }

    #[test]
    fn render_includes_position_and_underline() {
        let source = crate::frontend::SourceFile::new_in_memory("x <- oops\n");
        let diagnostic = Diagnostic::error(
            Stage::HirBuild,
            DiagnosticKind::UnboundName,
            "use of unbound name `oops`",
            span(5, 9),
        );

        let rendered = diagnostic.render(&source);
        let plain = String::from_utf8(strip_ansi_escapes::strip(rendered.as_bytes())).unwrap();

        assert!(plain.contains("error[unbound-name]"));
        assert!(plain.contains("<memory>:1:6"));
        assert!(plain.contains("^^^^"));
    }
}
