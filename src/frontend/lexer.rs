use std::{collections::VecDeque, str::Chars};

use itertools::{PeekNth, peek_nth};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use strum::EnumString;

use crate::{
    diagnostics::{Diagnostic, DiagnosticBag, DiagnosticKind, Stage},
    frontend::SourceFile,
};

#[derive(Debug)]
pub struct Lexer<'source, 'diag> {
    source: &'source SourceFile,
    diagnostics: &'diag DiagnosticBag,
    position: usize,
    chars: PeekNth<Chars<'source>>,
    peek_buffer: VecDeque<Token>,
    /// Nesting depth of parens/brackets. Newlines are insignificant inside
    /// an open paren or bracket, like in R.
    group_depth: usize,
    last_kind: Option<TokenKind>,
}

#[derive(Debug, Clone, Copy)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /* Words */
    Keyword(Keyword), // function
    Identifier,       // main, idx.cube

    /* Literals */
    BooleanLiteral, // TRUE
    IntegerLiteral, // 1L
    FloatLiteral,   // 1.5, 2 (an unsuffixed whole number is a double, as in R)
    StringLiteral,  // "hello"

    /* Delimiters */
    OpenParen,    // (
    CloseParen,   // )
    OpenBracket,  // [
    CloseBracket, // ]
    OpenBrace,    // {
    CloseBrace,   // }
    Semicolon,    // ;
    Comma,        // ,
    Colon,        // :
    Arrow,        // ->
    DotDot,       // ..

    /// Statement-terminating newline. Emitted only at group depth zero and
    /// only after a token that can end a statement.
    Newline,

    /* Unary ops */
    Bang, // !

    /* Unary + binary ops */
    Minus, // -

    /* Binary ops */
    Plus,                 // +
    Star,                 // *
    Slash,                // /
    Percent,              // % (R's %%)
    LogicalAnd,           // &&
    LogicalOr,            // ||
    DoubleEquals,         // ==
    NotEquals,            // !=
    LessThan,             // <
    LessThanOrEqualTo,    // <=
    GreaterThan,          // >
    GreaterThanOrEqualTo, // >=

    /* Assignment */
    LeftArrow,     // <-
    Equals,        // =
    PlusEquals,    // +=
    MinusEquals,   // -=
    StarEquals,    // *=
    SlashEquals,   // /=
    PercentEquals, // %=
}

impl TokenKind {
    pub fn is_assignment_operator(&self) -> bool {
        matches!(
            self,
            Self::LeftArrow
                | Self::Equals
                | Self::PlusEquals
                | Self::MinusEquals
                | Self::StarEquals
                | Self::SlashEquals
                | Self::PercentEquals
        )
    }

    pub fn is_comparison_operator(&self) -> bool {
        matches!(
            self,
            Self::NotEquals
                | Self::DoubleEquals
                | Self::LessThan
                | Self::LessThanOrEqualTo
                | Self::GreaterThan
                | Self::GreaterThanOrEqualTo
        )
    }

    pub fn is_term_operator(&self) -> bool {
        matches!(self, Self::Plus | Self::Minus)
    }

    pub fn is_factor_operator(&self) -> bool {
        matches!(self, Self::Star | Self::Slash | Self::Percent)
    }

    pub fn is_unary_operator(&self) -> bool {
        matches!(self, Self::Bang | Self::Minus)
    }

    pub fn is_statement_terminator(&self) -> bool {
        matches!(self, Self::Newline | Self::Semicolon)
    }

    /// Whether a token of this kind can be the last token of a statement.
    /// A newline after any other kind is a line continuation.
    fn can_end_statement(&self) -> bool {
        matches!(
            self,
            Self::Identifier
                | Self::BooleanLiteral
                | Self::IntegerLiteral
                | Self::FloatLiteral
                | Self::StringLiteral
                | Self::CloseParen
                | Self::CloseBracket
                | Self::CloseBrace
                | Self::Keyword(Keyword::Break)
                | Self::Keyword(Keyword::Continue)
                | Self::Keyword(Keyword::Return)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Keyword {
    Function,
    Fn,
    Let,
    If,
    Else,
    While,
    For,
    In,
    Break,
    Continue,
    Return,
}

/// Table of single char tokens (matched after longer sequences are checked
/// for)
static SINGLE_TOKENS: Lazy<BTreeMap<char, TokenKind>> = Lazy::new(|| {
    BTreeMap::from([
        ('(', TokenKind::OpenParen),
        (')', TokenKind::CloseParen),
        ('[', TokenKind::OpenBracket),
        (']', TokenKind::CloseBracket),
        ('{', TokenKind::OpenBrace),
        ('}', TokenKind::CloseBrace),
        (';', TokenKind::Semicolon),
        (',', TokenKind::Comma),
        (':', TokenKind::Colon),
        ('!', TokenKind::Bang),
        ('-', TokenKind::Minus),
        ('+', TokenKind::Plus),
        ('*', TokenKind::Star),
        ('/', TokenKind::Slash),
        ('%', TokenKind::Percent),
        ('=', TokenKind::Equals),
        ('<', TokenKind::LessThan),
        ('>', TokenKind::GreaterThan),
    ])
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const DUMMY: Self = Self { start: 0, end: 0 };

    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn to(self, other: Span) -> Self {
        Self {
            start: self.start,
            end: other.end,
        }
    }
}

impl<'source, 'diag> Lexer<'source, 'diag> {
    pub fn new(source: &'source SourceFile, diagnostics: &'diag DiagnosticBag) -> Self {
        Self {
            source,
            diagnostics,
            chars: peek_nth(source.contents.chars()),
            position: 0,
            peek_buffer: VecDeque::new(),
            group_depth: 0,
            last_kind: None,
        }
    }

    pub fn is_eof(&mut self) -> bool {
        self.peek().is_none()
    }

    pub fn source(&self) -> &SourceFile {
        self.source
    }

    fn report_error(&self, span: Span, message: &str) {
        self.diagnostics.record(Diagnostic::error(
            Stage::Parse,
            DiagnosticKind::Syntax,
            message,
            span,
        ));
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        self.position += c.len_utf8();
        Some(c)
    }

    fn ignore_line(&mut self) {
        while let Some(c) = self.chars.peek().copied() {
            if c == '\n' {
                break;
            }

            self.bump();
        }
    }

    fn read_string(&mut self) -> Token {
        let start_position = self.position;

        // Consume the opening quote
        assert_eq!(self.bump(), Some('"'));

        while let Some(c) = self.chars.peek().copied() {
            if c == '\n' {
                break;
            }

            self.bump();

            if c == '\\' {
                // Escape sequence: consume whatever follows verbatim
                self.bump();
                continue;
            }

            if c == '"' {
                return Token {
                    span: self.new_span(start_position),
                    kind: TokenKind::StringLiteral,
                };
            }
        }

        let span = self.new_span(start_position);
        self.report_error(span, "unterminated string literal");

        Token {
            span,
            kind: TokenKind::StringLiteral,
        }
    }

    // Keyword, identifier, or boolean literal. Identifiers may contain dots
    // (`idx.cube`), but never two in a row so that `1L..n` style ranges still
    // lex as three tokens.
    fn read_word(&mut self) -> Token {
        let start_position = self.position;

        while let Some(c) = self.chars.peek().copied() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.bump();
                continue;
            }

            if c == '.'
                && self
                    .chars
                    .peek_nth(1)
                    .is_some_and(|c| c.is_ascii_alphanumeric() || *c == '_')
            {
                self.bump();
                continue;
            }

            break;
        }

        let span = self.new_span(start_position);
        let value = self.source.value_of_span(span);

        let kind = match value {
            "TRUE" | "FALSE" | "true" | "false" => TokenKind::BooleanLiteral,
            _ => match value.parse() {
                Ok(keyword) => TokenKind::Keyword(keyword),
                Err(_) => TokenKind::Identifier,
            },
        };

        Token { kind, span }
    }

    // 1L, 2, 1.5
    fn read_number(&mut self) -> Token {
        let start_position = self.position;
        let mut kind = TokenKind::FloatLiteral;

        while let Some(c) = self.chars.peek().copied() {
            if c.is_ascii_digit() {
                self.bump();
                continue;
            }

            // A dot continues the number only when followed by a digit;
            // `1..n` must stay a range.
            if c == '.' && self.chars.peek_nth(1).is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
                continue;
            }

            if c == 'L' {
                self.bump();
                kind = TokenKind::IntegerLiteral;
            }

            break;
        }

        Token {
            kind,
            span: self.new_span(start_position),
        }
    }

    fn read_single(&mut self, kind: TokenKind) -> Token {
        let start_position = self.position;

        self.bump();

        Token {
            kind,
            span: self.new_span(start_position),
        }
    }

    fn read_double(&mut self, kind: TokenKind) -> Token {
        let start_position = self.position;

        self.bump();
        self.bump();

        Token {
            kind,
            span: self.new_span(start_position),
        }
    }

    fn new_span(&self, start: usize) -> Span {
        Span {
            start,
            end: self.position,
        }
    }

    pub fn peek(&mut self) -> Option<Token> {
        self.peek_nth(0)
    }

    pub fn peek_nth(&mut self, n: usize) -> Option<Token> {
        while self.peek_buffer.len() <= n {
            let token = self.lex_token()?;
            self.peek_buffer.push_back(token);
        }

        self.peek_buffer.get(n).copied()
    }

    pub fn next(&mut self) -> Option<Token> {
        if let Some(token) = self.peek_buffer.pop_front() {
            return Some(token);
        }

        self.lex_token()
    }

    fn lex_token(&mut self) -> Option<Token> {
        while let Some(c) = self.chars.peek().copied() {
            let token = match c {
                '\n' => {
                    let start = self.position;
                    self.bump();

                    if self.group_depth == 0
                        && self.last_kind.is_some_and(|k| k.can_end_statement())
                    {
                        Token {
                            kind: TokenKind::Newline,
                            span: Span::new(start, start + 1),
                        }
                    } else {
                        continue;
                    }
                }
                c if c.is_whitespace() => {
                    self.bump();
                    continue;
                }

                // Comments (both R and Rust styles are accepted)
                '#' => {
                    self.ignore_line();
                    continue;
                }
                '/' if self.chars.peek_nth(1).is_some_and(|c| *c == '/') => {
                    self.ignore_line();
                    continue;
                }

                '"' => self.read_string(),

                n if n.is_ascii_digit() => self.read_number(),
                '.' if self.chars.peek_nth(1).is_some_and(|c| c.is_ascii_digit()) => {
                    self.read_number()
                }

                a if a.is_ascii_alphabetic() || a == '_' => self.read_word(),
                // Leading-dot names like `.count`
                '.' if self
                    .chars
                    .peek_nth(1)
                    .is_some_and(|c| c.is_ascii_alphabetic() || *c == '_') =>
                {
                    self.read_word()
                }

                // Assignment arrow (<-)
                '<' if self.chars.peek_nth(1).is_some_and(|c| *c == '-') => {
                    self.read_double(TokenKind::LeftArrow)
                }
                // Arrow (->)
                '-' if self.chars.peek_nth(1).is_some_and(|c| *c == '>') => {
                    self.read_double(TokenKind::Arrow)
                }
                // Range (..)
                '.' if self.chars.peek_nth(1).is_some_and(|c| *c == '.') => {
                    self.read_double(TokenKind::DotDot)
                }

                '=' if self.chars.peek_nth(1).is_some_and(|c| *c == '=') => {
                    self.read_double(TokenKind::DoubleEquals)
                }
                '!' if self.chars.peek_nth(1).is_some_and(|c| *c == '=') => {
                    self.read_double(TokenKind::NotEquals)
                }
                '<' if self.chars.peek_nth(1).is_some_and(|c| *c == '=') => {
                    self.read_double(TokenKind::LessThanOrEqualTo)
                }
                '>' if self.chars.peek_nth(1).is_some_and(|c| *c == '=') => {
                    self.read_double(TokenKind::GreaterThanOrEqualTo)
                }

                '+' if self.chars.peek_nth(1).is_some_and(|c| *c == '=') => {
                    self.read_double(TokenKind::PlusEquals)
                }
                '-' if self.chars.peek_nth(1).is_some_and(|c| *c == '=') => {
                    self.read_double(TokenKind::MinusEquals)
                }
                '*' if self.chars.peek_nth(1).is_some_and(|c| *c == '=') => {
                    self.read_double(TokenKind::StarEquals)
                }
                '/' if self.chars.peek_nth(1).is_some_and(|c| *c == '=') => {
                    self.read_double(TokenKind::SlashEquals)
                }
                '%' if self.chars.peek_nth(1).is_some_and(|c| *c == '=') => {
                    self.read_double(TokenKind::PercentEquals)
                }

                '&' if self.chars.peek_nth(1).is_some_and(|c| *c == '&') => {
                    self.read_double(TokenKind::LogicalAnd)
                }
                '|' if self.chars.peek_nth(1).is_some_and(|c| *c == '|') => {
                    self.read_double(TokenKind::LogicalOr)
                }

                s if SINGLE_TOKENS.contains_key(&s) => {
                    self.read_single(*SINGLE_TOKENS.get(&s).unwrap())
                }
                c => {
                    let start = self.position;
                    self.bump();
                    self.report_error(
                        Span::new(start, self.position),
                        &format!("unexpected character in input: `{c}`"),
                    );
                    continue;
                }
            };

            match token.kind {
                TokenKind::OpenParen | TokenKind::OpenBracket => self.group_depth += 1,
                TokenKind::CloseParen | TokenKind::CloseBracket => {
                    self.group_depth = self.group_depth.saturating_sub(1)
                }
                _ => {}
            }

            self.last_kind = Some(token.kind);
            return Some(token);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::SourceFile;

    fn kinds(input: &str) -> Vec<TokenKind> {
        let source = SourceFile::new_in_memory(input);
        let diagnostics = DiagnosticBag::new();
        let mut lexer = Lexer::new(&source, &diagnostics);
        let mut out = Vec::new();

        while let Some(token) = lexer.next() {
            out.push(token.kind);
        }

        assert!(!diagnostics.has_errors(), "lex errors for input {input:?}");
        out
    }

    #[test]
    fn lexes_r_style_assignment_and_integer_suffix() {
        assert_eq!(
            kinds("x <- 1L"),
            vec![
                TokenKind::Identifier,
                TokenKind::LeftArrow,
                TokenKind::IntegerLiteral,
            ]
        );
    }

    #[test]
    fn dotted_names_lex_as_single_identifiers() {
        assert_eq!(
            kinds("idx.cube(2L)"),
            vec![
                TokenKind::Identifier,
                TokenKind::OpenParen,
                TokenKind::IntegerLiteral,
                TokenKind::CloseParen,
            ]
        );
    }

    #[test]
    fn range_after_integer_literal_stays_a_range() {
        assert_eq!(
            kinds("1L..n"),
            vec![
                TokenKind::IntegerLiteral,
                TokenKind::DotDot,
                TokenKind::Identifier,
            ]
        );
    }

    #[test]
    fn newline_terminates_only_complete_statements() {
        // The newline after `+` is a continuation, the one after `2L` is a
        // terminator.
        assert_eq!(
            kinds("x <- 1L +\n2L\ny <- x"),
            vec![
                TokenKind::Identifier,
                TokenKind::LeftArrow,
                TokenKind::IntegerLiteral,
                TokenKind::Plus,
                TokenKind::IntegerLiteral,
                TokenKind::Newline,
                TokenKind::Identifier,
                TokenKind::LeftArrow,
                TokenKind::Identifier,
            ]
        );
    }

    #[test]
    fn newlines_inside_parens_are_insignificant() {
        assert_eq!(
            kinds("f(\n1L,\n2L\n)"),
            vec![
                TokenKind::Identifier,
                TokenKind::OpenParen,
                TokenKind::IntegerLiteral,
                TokenKind::Comma,
                TokenKind::IntegerLiteral,
                TokenKind::CloseParen,
            ]
        );
    }

    #[test]
    fn keywords_and_booleans_are_recognized() {
        assert_eq!(
            kinds("while TRUE { break }"),
            vec![
                TokenKind::Keyword(Keyword::While),
                TokenKind::BooleanLiteral,
                TokenKind::OpenBrace,
                TokenKind::Keyword(Keyword::Break),
                TokenKind::CloseBrace,
            ]
        );
    }

    #[test]
    fn comments_are_ignored() {
        assert_eq!(
            kinds("x # trailing\n// a whole line\nx"),
            vec![
                TokenKind::Identifier,
                TokenKind::Newline,
                TokenKind::Identifier,
            ]
        );
    }
}
