use super::{
    ast::{Item, ItemKind, NodeId},
    intern::InternedSymbol,
};
use crate::{
    diagnostics::{Diagnostic, DiagnosticBag, DiagnosticKind, Stage},
    frontend::{
        SourceFile,
        ast::{
            BinaryOperator, BinaryOperatorKind, Block, Expression, ExpressionKind,
            FunctionBody, FunctionDefinition, Identifier, Literal, LiteralKind, Module, Parameter,
            Statement, StatementKind, TypeAnnotation, UnaryOperator, UnaryOperatorKind,
        },
        lexer::{Keyword, Lexer, Span, Token, TokenKind},
    },
};

pub const DEFAULT_ERROR_CAP: usize = 20;

#[derive(Debug)]
pub struct Parser<'source, 'diag> {
    lexer: Lexer<'source, 'diag>,
    diagnostics: &'diag DiagnosticBag,
    next_node_id: u32,
    error_count: usize,
    error_cap: usize,
}

impl<'source, 'diag> Parser<'source, 'diag> {
    /// Parses a whole source file. Always returns a module; syntax errors are
    /// recorded into the diagnostic bag, and parsing resynchronizes at
    /// statement boundaries until the error cap is reached.
    pub fn parse_module(
        source_file: &'source SourceFile,
        diagnostics: &'diag DiagnosticBag,
        error_cap: usize,
    ) -> Module<'source> {
        let mut parser = Self {
            lexer: Lexer::new(source_file, diagnostics),
            diagnostics,
            next_node_id: 0,
            error_count: 0,
            error_cap: error_cap.max(1),
        };

        let mut module = Module {
            source_file,
            items: Vec::new(),
        };

        loop {
            parser.skip_newlines();

            if parser.lexer.is_eof() || parser.at_error_cap() {
                break;
            }

            match parser.parse_item() {
                Some(item) => module.items.push(item),
                None => parser.recover_to_statement_boundary(),
            }
        }

        module
    }

    fn create_node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        id
    }

    fn at_error_cap(&self) -> bool {
        self.error_count >= self.error_cap
    }

    fn report_error(&mut self, offending_span: Span, message: &str) {
        self.error_count += 1;
        self.diagnostics.record(Diagnostic::error(
            Stage::Parse,
            DiagnosticKind::Syntax,
            message,
            offending_span,
        ));
    }

    fn eof_span(&self) -> Span {
        let end = self.lexer.source().contents.len();
        Span::new(end.saturating_sub(1), end)
    }

    /// Skips forward to the next statement boundary so independent errors in
    /// the rest of the input can still be reported.
    fn recover_to_statement_boundary(&mut self) {
        while let Some(token) = self.lexer.peek() {
            match token.kind {
                TokenKind::Newline | TokenKind::Semicolon => {
                    self.lexer.next();
                    return;
                }
                TokenKind::CloseBrace
                | TokenKind::Keyword(Keyword::Fn)
                | TokenKind::Keyword(Keyword::Let)
                | TokenKind::Keyword(Keyword::If)
                | TokenKind::Keyword(Keyword::While)
                | TokenKind::Keyword(Keyword::For) => return,
                _ => {
                    self.lexer.next();
                }
            }
        }
    }

    fn skip_newlines(&mut self) {
        while self
            .lexer
            .peek()
            .is_some_and(|t| t.kind == TokenKind::Newline)
        {
            self.lexer.next();
        }
    }

    fn expect_peek(&mut self, expecting: &str) -> Option<Token> {
        let Some(token) = self.lexer.peek() else {
            self.report_error(
                self.eof_span(),
                &format!("expected {expecting} but reached end of file"),
            );
            return None;
        };

        Some(token)
    }

    fn expect_next(&mut self, expecting: &str) -> Option<Token> {
        let Some(token) = self.lexer.next() else {
            self.report_error(
                self.eof_span(),
                &format!("expected {expecting} but reached end of file"),
            );
            return None;
        };

        Some(token)
    }

    fn expect_next_to_be(&mut self, kind: TokenKind) -> Option<Token> {
        let token = self.expect_next(&format!("{kind:?}"))?;

        if token.kind != kind {
            self.report_error(
                token.span,
                &format!(
                    "expected {:?} but found `{}`",
                    kind,
                    self.lexer.source().value_of_span(token.span)
                ),
            );
            return None;
        }

        Some(token)
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> Option<Token> {
        self.expect_next_to_be(TokenKind::Keyword(keyword))
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.lexer.peek().is_some_and(|t| t.kind == kind) {
            self.lexer.next();
            return true;
        }

        false
    }

    /* Items */

    fn parse_item(&mut self) -> Option<Item> {
        let peeked = self.expect_peek("function definition or statement")?;

        // fn name(...) ...
        if peeked.kind == TokenKind::Keyword(Keyword::Fn) {
            let function = Box::new(self.parse_fn_definition()?);

            return Some(Item {
                id: self.create_node_id(),
                span: function.span,
                kind: ItemKind::Function(function),
            });
        }

        // name <- function(...) ...
        if peeked.kind == TokenKind::Identifier
            && self
                .lexer
                .peek_nth(1)
                .is_some_and(|t| t.kind == TokenKind::LeftArrow || t.kind == TokenKind::Equals)
            && self
                .lexer
                .peek_nth(2)
                .is_some_and(|t| t.kind == TokenKind::Keyword(Keyword::Function))
        {
            let function = Box::new(self.parse_r_function_definition()?);

            return Some(Item {
                id: self.create_node_id(),
                span: function.span,
                kind: ItemKind::Function(function),
            });
        }

        let statement = Box::new(self.parse_statement()?);

        Some(Item {
            id: self.create_node_id(),
            span: statement.span,
            kind: ItemKind::Statement(statement),
        })
    }

    /// fn name(param: ty = default, ...) -> ty { ... }
    /// fn name(param, ...) = expr
    fn parse_fn_definition(&mut self) -> Option<FunctionDefinition> {
        let fn_keyword = self.expect_keyword(Keyword::Fn)?;

        let name = self.parse_identifier()?;
        let parameters = self.parse_parameter_list()?;

        let return_type = if self.eat(TokenKind::Arrow) {
            Some(self.parse_type_annotation()?)
        } else {
            None
        };

        let peeked = self.expect_peek("function body")?;
        let (body, body_end) = if peeked.kind == TokenKind::Equals {
            self.expect_next_to_be(TokenKind::Equals)?;
            let expression = self.parse_expression()?;
            let end = expression.span;
            (FunctionBody::Expression(Box::new(expression)), end)
        } else {
            let block = self.parse_block()?;
            let end = block.span;
            (FunctionBody::Block(block), end)
        };

        Some(FunctionDefinition {
            id: self.create_node_id(),
            span: fn_keyword.span.to(body_end),
            name,
            parameters,
            return_type,
            body,
        })
    }

    /// name <- function(param = default, ...) { ... }
    fn parse_r_function_definition(&mut self) -> Option<FunctionDefinition> {
        let name = self.parse_identifier()?;

        // <- or =
        self.expect_next("assignment operator")?;
        self.expect_keyword(Keyword::Function)?;

        let parameters = self.parse_parameter_list()?;

        let peeked = self.expect_peek("function body")?;
        let (body, body_end) = if peeked.kind == TokenKind::OpenBrace {
            let block = self.parse_block()?;
            let end = block.span;
            (FunctionBody::Block(block), end)
        } else {
            let expression = self.parse_expression()?;
            let end = expression.span;
            (FunctionBody::Expression(Box::new(expression)), end)
        };

        Some(FunctionDefinition {
            id: self.create_node_id(),
            span: name.span.to(body_end),
            name,
            parameters,
            return_type: None,
            body,
        })
    }

    fn parse_identifier(&mut self) -> Option<Identifier> {
        let token = self.expect_next_to_be(TokenKind::Identifier)?;

        Some(Identifier {
            id: self.create_node_id(),
            span: token.span,
            symbol: InternedSymbol::new(self.lexer.source().value_of_span(token.span)),
        })
    }

    fn parse_type_annotation(&mut self) -> Option<TypeAnnotation> {
        let token = self.expect_next_to_be(TokenKind::Identifier)?;

        Some(TypeAnnotation {
            id: self.create_node_id(),
            span: token.span,
            symbol: InternedSymbol::new(self.lexer.source().value_of_span(token.span)),
        })
    }

    // (a: int, b = 0L, c)
    fn parse_parameter_list(&mut self) -> Option<Vec<Parameter>> {
        let mut parameters = Vec::new();

        self.expect_next_to_be(TokenKind::OpenParen)?;

        if self.expect_peek("parameter or closing paren")?.kind != TokenKind::CloseParen {
            parameters.push(self.parse_parameter()?);

            while self.eat(TokenKind::Comma) {
                parameters.push(self.parse_parameter()?);
            }
        }

        self.expect_next_to_be(TokenKind::CloseParen)?;

        Some(parameters)
    }

    fn parse_parameter(&mut self) -> Option<Parameter> {
        let name = self.parse_identifier()?;

        let ty = if self.eat(TokenKind::Colon) {
            Some(self.parse_type_annotation()?)
        } else {
            None
        };

        let default = if self.eat(TokenKind::Equals) {
            Some(self.parse_expression()?)
        } else {
            None
        };

        let end = default
            .as_ref()
            .map(|d| d.span)
            .or(ty.as_ref().map(|t| t.span))
            .unwrap_or(name.span);

        Some(Parameter {
            id: self.create_node_id(),
            span: name.span.to(end),
            name,
            ty,
            default,
        })
    }

    /* Statements */

    // "{" ( statement )* "}"
    fn parse_block(&mut self) -> Option<Block> {
        let open_brace = self.expect_next_to_be(TokenKind::OpenBrace)?;

        let mut statements = Vec::new();

        loop {
            self.skip_newlines();

            let peeked = self.expect_peek("statement or closing brace")?;

            if peeked.kind == TokenKind::CloseBrace {
                break;
            }

            if self.at_error_cap() {
                return None;
            }

            match self.parse_statement() {
                Some(statement) => statements.push(statement),
                None => {
                    self.recover_to_statement_boundary();

                    // Recovery may have stopped right at our closing brace
                    if self
                        .lexer
                        .peek()
                        .is_some_and(|t| t.kind == TokenKind::CloseBrace)
                    {
                        break;
                    }
                }
            }
        }

        let close_brace = self.expect_next_to_be(TokenKind::CloseBrace)?;

        Some(Block {
            id: self.create_node_id(),
            span: open_brace.span.to(close_brace.span),
            statements,
        })
    }

    /// Parses one statement and consumes its trailing terminator if present.
    fn parse_statement(&mut self) -> Option<Statement> {
        let statement = self.parse_statement_inner()?;

        // A closing brace or EOF also ends a statement but is not consumed
        if let Some(token) = self.lexer.peek() {
            if token.kind.is_statement_terminator() {
                self.lexer.next();
            } else if token.kind != TokenKind::CloseBrace {
                self.report_error(
                    token.span,
                    &format!(
                        "expected end of statement but found `{}`",
                        self.lexer.source().value_of_span(token.span)
                    ),
                );
                return None;
            }
        }

        Some(statement)
    }

    /// Parses one statement without consuming a trailing terminator. Used
    /// directly for single-line `if`/`while`/`for` bodies.
    fn parse_statement_inner(&mut self) -> Option<Statement> {
        let peeked = self.expect_peek("statement")?;

        match peeked.kind {
            TokenKind::Keyword(Keyword::Let) => self.parse_let_statement(),
            TokenKind::Keyword(Keyword::If) => self.parse_if_statement(),
            TokenKind::Keyword(Keyword::While) => self.parse_while_statement(),
            TokenKind::Keyword(Keyword::For) => self.parse_for_statement(),
            TokenKind::Keyword(Keyword::Break) => {
                let token = self.expect_keyword(Keyword::Break)?;

                Some(Statement {
                    id: self.create_node_id(),
                    span: token.span,
                    kind: StatementKind::Break,
                })
            }
            TokenKind::Keyword(Keyword::Continue) => {
                let token = self.expect_keyword(Keyword::Continue)?;

                Some(Statement {
                    id: self.create_node_id(),
                    span: token.span,
                    kind: StatementKind::Continue,
                })
            }
            TokenKind::Keyword(Keyword::Return) => self.parse_return_statement(),
            // z: int = 10L
            TokenKind::Identifier
                if self
                    .lexer
                    .peek_nth(1)
                    .is_some_and(|t| t.kind == TokenKind::Colon) =>
            {
                self.parse_typed_declaration()
            }
            _ => self.parse_expression_or_assignment_statement(),
        }
    }

    // let x = v / let x: int = v
    fn parse_let_statement(&mut self) -> Option<Statement> {
        let let_keyword = self.expect_keyword(Keyword::Let)?;

        let name = self.parse_identifier()?;

        let ty = if self.eat(TokenKind::Colon) {
            Some(self.parse_type_annotation()?)
        } else {
            None
        };

        let assign = self.expect_next("assignment operator")?;
        if !matches!(assign.kind, TokenKind::Equals | TokenKind::LeftArrow) {
            self.report_error(assign.span, "expected `=` after let binding name");
            return None;
        }

        let value = self.parse_expression()?;

        Some(Statement {
            id: self.create_node_id(),
            span: let_keyword.span.to(value.span),
            kind: StatementKind::Let { name, ty, value },
        })
    }

    // z: int = 10L
    fn parse_typed_declaration(&mut self) -> Option<Statement> {
        let name = self.parse_identifier()?;
        self.expect_next_to_be(TokenKind::Colon)?;
        let ty = self.parse_type_annotation()?;

        let assign = self.expect_next("assignment operator")?;
        if !matches!(assign.kind, TokenKind::Equals | TokenKind::LeftArrow) {
            self.report_error(assign.span, "expected `=` after typed declaration");
            return None;
        }

        let value = self.parse_expression()?;

        Some(Statement {
            id: self.create_node_id(),
            span: name.span.to(value.span),
            kind: StatementKind::Let {
                name,
                ty: Some(ty),
                value,
            },
        })
    }

    /// The branch of an `if`/`while`/`for`: either a braced block or a single
    /// inline statement (`if (ff < 1L) ff <- 1L`).
    fn parse_branch_body(&mut self) -> Option<Block> {
        if self
            .expect_peek("block or statement")?
            .kind
            == TokenKind::OpenBrace
        {
            return self.parse_block();
        }

        let statement = self.parse_statement_inner()?;

        Some(Block {
            id: self.create_node_id(),
            span: statement.span,
            statements: vec![statement],
        })
    }

    /// Consumes an upcoming `else`, looking through newlines, and returns
    /// true if one was found.
    fn eat_else(&mut self) -> bool {
        let mut n = 0;

        while let Some(token) = self.lexer.peek_nth(n) {
            match token.kind {
                TokenKind::Newline => n += 1,
                TokenKind::Keyword(Keyword::Else) => {
                    for _ in 0..=n {
                        self.lexer.next();
                    }
                    return true;
                }
                _ => return false,
            }
        }

        false
    }

    // if (cond) { ... } else { ... }, parens and braces both optional
    fn parse_if_statement(&mut self) -> Option<Statement> {
        let if_keyword = self.expect_keyword(Keyword::If)?;

        let condition = self.parse_expression()?;
        let then_branch = self.parse_branch_body()?;

        let else_branch = if self.eat_else() {
            Some(self.parse_branch_body()?)
        } else {
            None
        };

        let end = else_branch
            .as_ref()
            .map(|b| b.span)
            .unwrap_or(then_branch.span);

        Some(Statement {
            id: self.create_node_id(),
            span: if_keyword.span.to(end),
            kind: StatementKind::If {
                condition,
                then_branch,
                else_branch,
            },
        })
    }

    // while (cond) { ... }, parens and braces both optional
    fn parse_while_statement(&mut self) -> Option<Statement> {
        let while_keyword = self.expect_keyword(Keyword::While)?;

        let condition = self.parse_expression()?;
        let body = self.parse_branch_body()?;

        Some(Statement {
            id: self.create_node_id(),
            span: while_keyword.span.to(body.span),
            kind: StatementKind::While { condition, body },
        })
    }

    // for i in 1L..n { ... } / for (k in 1L..5L) body
    fn parse_for_statement(&mut self) -> Option<Statement> {
        let for_keyword = self.expect_keyword(Keyword::For)?;

        let parenthesized = self.eat(TokenKind::OpenParen);

        let binding = self.parse_identifier()?;
        self.expect_keyword(Keyword::In)?;
        let iterable = self.parse_expression()?;

        if parenthesized {
            self.expect_next_to_be(TokenKind::CloseParen)?;
        }

        let body = self.parse_branch_body()?;

        Some(Statement {
            id: self.create_node_id(),
            span: for_keyword.span.to(body.span),
            kind: StatementKind::For {
                binding,
                iterable,
                body,
            },
        })
    }

    fn parse_return_statement(&mut self) -> Option<Statement> {
        let return_keyword = self.expect_keyword(Keyword::Return)?;

        let has_value = self.lexer.peek().is_some_and(|t| {
            !t.kind.is_statement_terminator() && t.kind != TokenKind::CloseBrace
        });

        let value = if has_value {
            Some(self.parse_expression()?)
        } else {
            None
        };

        let end = value.as_ref().map(|v| v.span).unwrap_or(return_keyword.span);

        Some(Statement {
            id: self.create_node_id(),
            span: return_keyword.span.to(end),
            kind: StatementKind::Return(value),
        })
    }

    fn parse_expression_or_assignment_statement(&mut self) -> Option<Statement> {
        let expression = self.parse_expression()?;

        let Some(peeked) = self.lexer.peek() else {
            return Some(Statement {
                id: self.create_node_id(),
                span: expression.span,
                kind: StatementKind::Expression(expression),
            });
        };

        if !peeked.kind.is_assignment_operator() {
            return Some(Statement {
                id: self.create_node_id(),
                span: expression.span,
                kind: StatementKind::Expression(expression),
            });
        }

        let operator_token = self.expect_next("assignment operator")?;
        let operator = self.compound_operator_for(operator_token);
        let value = self.parse_expression()?;

        Some(Statement {
            id: self.create_node_id(),
            span: expression.span.to(value.span),
            kind: StatementKind::Assign {
                target: expression,
                operator,
                value,
            },
        })
    }

    /// Maps a compound-assignment token to the binary operator it desugars
    /// into. `<-` and `=` map to `None`.
    fn compound_operator_for(&mut self, token: Token) -> Option<BinaryOperator> {
        let kind = match token.kind {
            TokenKind::PlusEquals => BinaryOperatorKind::Add,
            TokenKind::MinusEquals => BinaryOperatorKind::Subtract,
            TokenKind::StarEquals => BinaryOperatorKind::Multiply,
            TokenKind::SlashEquals => BinaryOperatorKind::Divide,
            TokenKind::PercentEquals => BinaryOperatorKind::Modulo,
            _ => return None,
        };

        Some(BinaryOperator {
            id: self.create_node_id(),
            span: token.span,
            kind,
        })
    }

    /* Expressions */

    /// expression  -> range
    /// range       -> logical_or ( ".." logical_or )?
    /// logical_or  -> logical_and ( "||" logical_and )*
    /// logical_and -> comparison ( "&&" comparison )*
    /// comparison  -> term ( ( "==" | "!=" | "<" | "<=" | ">" | ">=" ) term )*
    /// term        -> factor ( ( "+" | "-" ) factor )*
    /// factor      -> unary ( ( "*" | "/" | "%" ) unary )*
    /// unary       -> ( "!" | "-" ) unary | postfix
    /// postfix     -> primary ( "(" args ")" | "[" expression "]" )*
    /// primary     -> IDENTIFIER | literal | "(" expression ")"
    ///                | "[" elements "]" | "{" fields "}" | "{" block "}"
    ///                | "if" expression expression "else" expression
    fn parse_expression(&mut self) -> Option<Expression> {
        let lhs = self.parse_logical_or_expression()?;

        if !self.eat(TokenKind::DotDot) {
            return Some(lhs);
        }

        let rhs = self.parse_logical_or_expression()?;

        Some(Expression {
            id: self.create_node_id(),
            span: lhs.span.to(rhs.span),
            kind: ExpressionKind::Range {
                start: Box::new(lhs),
                end: Box::new(rhs),
            },
        })
    }

    fn parse_logical_or_expression(&mut self) -> Option<Expression> {
        let mut expression = self.parse_logical_and_expression()?;

        while self
            .lexer
            .peek()
            .is_some_and(|t| t.kind == TokenKind::LogicalOr)
        {
            let operator_token = self.expect_next_to_be(TokenKind::LogicalOr)?;
            let rhs = self.parse_logical_and_expression()?;

            expression = self.new_binary(
                expression,
                BinaryOperatorKind::LogicalOr,
                operator_token.span,
                rhs,
            );
        }

        Some(expression)
    }

    fn parse_logical_and_expression(&mut self) -> Option<Expression> {
        let mut expression = self.parse_comparison_expression()?;

        while self
            .lexer
            .peek()
            .is_some_and(|t| t.kind == TokenKind::LogicalAnd)
        {
            let operator_token = self.expect_next_to_be(TokenKind::LogicalAnd)?;
            let rhs = self.parse_comparison_expression()?;

            expression = self.new_binary(
                expression,
                BinaryOperatorKind::LogicalAnd,
                operator_token.span,
                rhs,
            );
        }

        Some(expression)
    }

    fn parse_comparison_expression(&mut self) -> Option<Expression> {
        let mut expression = self.parse_term_expression()?;

        while self
            .lexer
            .peek()
            .is_some_and(|t| t.kind.is_comparison_operator())
        {
            let operator_token = self.expect_next("comparison operator")?;
            let kind = match operator_token.kind {
                TokenKind::DoubleEquals => BinaryOperatorKind::Equals,
                TokenKind::NotEquals => BinaryOperatorKind::NotEquals,
                TokenKind::LessThan => BinaryOperatorKind::LessThan,
                TokenKind::LessThanOrEqualTo => BinaryOperatorKind::LessThanOrEqualTo,
                TokenKind::GreaterThan => BinaryOperatorKind::GreaterThan,
                TokenKind::GreaterThanOrEqualTo => BinaryOperatorKind::GreaterThanOrEqualTo,
                _ => unreachable!(),
            };

            let rhs = self.parse_term_expression()?;
            expression = self.new_binary(expression, kind, operator_token.span, rhs);
        }

        Some(expression)
    }

    fn parse_term_expression(&mut self) -> Option<Expression> {
        let mut expression = self.parse_factor_expression()?;

        while self
            .lexer
            .peek()
            .is_some_and(|t| t.kind.is_term_operator())
        {
            let operator_token = self.expect_next("term operator")?;
            let kind = match operator_token.kind {
                TokenKind::Plus => BinaryOperatorKind::Add,
                TokenKind::Minus => BinaryOperatorKind::Subtract,
                _ => unreachable!(),
            };

            let rhs = self.parse_factor_expression()?;
            expression = self.new_binary(expression, kind, operator_token.span, rhs);
        }

        Some(expression)
    }

    fn parse_factor_expression(&mut self) -> Option<Expression> {
        let mut expression = self.parse_unary_expression()?;

        while self
            .lexer
            .peek()
            .is_some_and(|t| t.kind.is_factor_operator())
        {
            let operator_token = self.expect_next("factor operator")?;
            let kind = match operator_token.kind {
                TokenKind::Star => BinaryOperatorKind::Multiply,
                TokenKind::Slash => BinaryOperatorKind::Divide,
                TokenKind::Percent => BinaryOperatorKind::Modulo,
                _ => unreachable!(),
            };

            let rhs = self.parse_unary_expression()?;
            expression = self.new_binary(expression, kind, operator_token.span, rhs);
        }

        Some(expression)
    }

    fn new_binary(
        &mut self,
        lhs: Expression,
        kind: BinaryOperatorKind,
        operator_span: Span,
        rhs: Expression,
    ) -> Expression {
        Expression {
            id: self.create_node_id(),
            span: lhs.span.to(rhs.span),
            kind: ExpressionKind::Binary {
                operator: BinaryOperator {
                    id: self.create_node_id(),
                    span: operator_span,
                    kind,
                },
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        }
    }

    fn parse_unary_expression(&mut self) -> Option<Expression> {
        if self
            .expect_peek("expression")?
            .kind
            .is_unary_operator()
        {
            let operator_token = self.expect_next("unary operator")?;
            let kind = match operator_token.kind {
                TokenKind::Bang => UnaryOperatorKind::LogicalNot,
                TokenKind::Minus => UnaryOperatorKind::Negate,
                _ => unreachable!(),
            };

            let operand = self.parse_unary_expression()?;

            return Some(Expression {
                id: self.create_node_id(),
                span: operator_token.span.to(operand.span),
                kind: ExpressionKind::Unary {
                    operator: UnaryOperator {
                        id: self.create_node_id(),
                        span: operator_token.span,
                        kind,
                    },
                    operand: Box::new(operand),
                },
            });
        }

        self.parse_postfix_expression()
    }

    fn parse_postfix_expression(&mut self) -> Option<Expression> {
        let mut expression = self.parse_primary_expression()?;

        loop {
            let Some(peeked) = self.lexer.peek() else {
                break;
            };

            match peeked.kind {
                TokenKind::OpenParen => {
                    let arguments = self.parse_call_arguments()?;
                    let end = arguments.1;

                    expression = Expression {
                        id: self.create_node_id(),
                        span: expression.span.to(end),
                        kind: ExpressionKind::Call {
                            target: Box::new(expression),
                            arguments: arguments.0,
                        },
                    };
                }
                TokenKind::OpenBracket => {
                    self.expect_next_to_be(TokenKind::OpenBracket)?;
                    let index = self.parse_expression()?;
                    let close = self.expect_next_to_be(TokenKind::CloseBracket)?;

                    expression = Expression {
                        id: self.create_node_id(),
                        span: expression.span.to(close.span),
                        kind: ExpressionKind::Index {
                            base: Box::new(expression),
                            index: Box::new(index),
                        },
                    };
                }
                _ => break,
            }
        }

        Some(expression)
    }

    fn parse_call_arguments(&mut self) -> Option<(Vec<Expression>, Span)> {
        let mut arguments = Vec::new();

        self.expect_next_to_be(TokenKind::OpenParen)?;

        if self.expect_peek("call argument or closing paren")?.kind != TokenKind::CloseParen {
            arguments.push(self.parse_expression()?);

            while self.eat(TokenKind::Comma) {
                arguments.push(self.parse_expression()?);
            }
        }

        let close_paren = self.expect_next_to_be(TokenKind::CloseParen)?;

        Some((arguments, close_paren.span))
    }

    fn parse_primary_expression(&mut self) -> Option<Expression> {
        let peeked = self.expect_peek("expression")?;

        match peeked.kind {
            TokenKind::Identifier => {
                let identifier = self.parse_identifier()?;

                Some(Expression {
                    id: self.create_node_id(),
                    span: identifier.span,
                    kind: ExpressionKind::Identifier(identifier),
                })
            }
            TokenKind::OpenParen => {
                let open_paren = self.expect_next_to_be(TokenKind::OpenParen)?;
                let inner = self.parse_expression()?;
                let close_paren = self.expect_next_to_be(TokenKind::CloseParen)?;

                Some(Expression {
                    id: self.create_node_id(),
                    span: open_paren.span.to(close_paren.span),
                    kind: ExpressionKind::Grouping(Box::new(inner)),
                })
            }
            TokenKind::OpenBracket => self.parse_array_expression(),
            TokenKind::OpenBrace => {
                // `{x: ...}` is a record literal; any other brace is a block
                if self
                    .lexer
                    .peek_nth(1)
                    .is_some_and(|t| t.kind == TokenKind::Identifier)
                    && self
                        .lexer
                        .peek_nth(2)
                        .is_some_and(|t| t.kind == TokenKind::Colon)
                {
                    self.parse_record_expression()
                } else {
                    let block = self.parse_block()?;

                    Some(Expression {
                        id: self.create_node_id(),
                        span: block.span,
                        kind: ExpressionKind::Block(Box::new(block)),
                    })
                }
            }
            TokenKind::Keyword(Keyword::If) => self.parse_if_expression(),
            TokenKind::BooleanLiteral
            | TokenKind::IntegerLiteral
            | TokenKind::FloatLiteral
            | TokenKind::StringLiteral => {
                let literal = self.parse_literal()?;

                Some(Expression {
                    id: self.create_node_id(),
                    span: literal.span,
                    kind: ExpressionKind::Literal(literal),
                })
            }
            _ => {
                self.report_error(
                    peeked.span,
                    &format!(
                        "expected expression but found `{}`",
                        self.lexer.source().value_of_span(peeked.span)
                    ),
                );
                None
            }
        }
    }

    // [1L, 2L, 3L]
    fn parse_array_expression(&mut self) -> Option<Expression> {
        let open_bracket = self.expect_next_to_be(TokenKind::OpenBracket)?;

        let mut elements = Vec::new();

        if self.expect_peek("array element or closing bracket")?.kind != TokenKind::CloseBracket {
            elements.push(self.parse_expression()?);

            while self.eat(TokenKind::Comma) {
                elements.push(self.parse_expression()?);
            }
        }

        let close_bracket = self.expect_next_to_be(TokenKind::CloseBracket)?;

        Some(Expression {
            id: self.create_node_id(),
            span: open_bracket.span.to(close_bracket.span),
            kind: ExpressionKind::Array(elements),
        })
    }

    // {x: 10L, y: 2L}
    fn parse_record_expression(&mut self) -> Option<Expression> {
        let open_brace = self.expect_next_to_be(TokenKind::OpenBrace)?;

        let mut fields = Vec::new();

        loop {
            self.skip_newlines();

            if self.expect_peek("record field or closing brace")?.kind == TokenKind::CloseBrace {
                break;
            }

            let name = self.parse_identifier()?;
            self.expect_next_to_be(TokenKind::Colon)?;
            let value = self.parse_expression()?;
            fields.push((name, value));

            self.skip_newlines();

            if !self.eat(TokenKind::Comma) {
                break;
            }
        }

        self.skip_newlines();
        let close_brace = self.expect_next_to_be(TokenKind::CloseBrace)?;

        Some(Expression {
            id: self.create_node_id(),
            span: open_brace.span.to(close_brace.span),
            kind: ExpressionKind::Record(fields),
        })
    }

    // if (c) a else b (expression position: the else arm is mandatory)
    fn parse_if_expression(&mut self) -> Option<Expression> {
        let if_keyword = self.expect_keyword(Keyword::If)?;

        let condition = self.parse_expression()?;
        let then_branch = self.parse_expression()?;

        if !self.eat_else() {
            let span = self
                .lexer
                .peek()
                .map(|t| t.span)
                .unwrap_or(then_branch.span);
            self.report_error(span, "an `if` used as a value requires an `else` arm");
            return None;
        }

        let else_branch = self.parse_expression()?;

        Some(Expression {
            id: self.create_node_id(),
            span: if_keyword.span.to(else_branch.span),
            kind: ExpressionKind::If {
                condition: Box::new(condition),
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
            },
        })
    }

    fn parse_literal(&mut self) -> Option<Literal> {
        let token = self.expect_next("literal")?;

        let kind = match token.kind {
            TokenKind::BooleanLiteral => LiteralKind::Boolean,
            TokenKind::IntegerLiteral => LiteralKind::Integer,
            TokenKind::FloatLiteral => LiteralKind::Float,
            TokenKind::StringLiteral => LiteralKind::String,
            _ => {
                self.report_error(
                    token.span,
                    &format!(
                        "expected literal but found `{}`",
                        self.lexer.source().value_of_span(token.span)
                    ),
                );
                return None;
            }
        };

        Some(Literal {
            id: self.create_node_id(),
            span: token.span,
            kind,
            symbol: InternedSymbol::new(self.lexer.source().value_of_span(token.span)),
        })
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    fn parse(input: &str) -> (Vec<String>, usize) {
        let source = SourceFile::new_in_memory(input);
        let diagnostics = DiagnosticBag::new();
        let module = Parser::parse_module(&source, &diagnostics, DEFAULT_ERROR_CAP);

        let shapes = module
            .items
            .iter()
            .map(|item| match &item.kind {
                ItemKind::Function(f) => format!("fn {}", f.name.symbol.value()),
                ItemKind::Statement(s) => match &s.kind {
                    StatementKind::Let { name, .. } => format!("let {}", name.symbol.value()),
                    StatementKind::Assign { .. } => "assign".to_owned(),
                    StatementKind::If { .. } => "if".to_owned(),
                    StatementKind::While { .. } => "while".to_owned(),
                    StatementKind::For { .. } => "for".to_owned(),
                    StatementKind::Expression(_) => "expr".to_owned(),
                    other => format!("{other:?}"),
                },
            })
            .collect();

        (shapes, diagnostics.drain().len())
    }

    #[test]
    fn parses_both_function_syntaxes() {
        let (shapes, errors) = parse(indoc! {r#"
            fn add(a: f64, b: i64) -> f64 = a + b

            main <- function() {
              x <- add(1.5, 2L)
              print(x)
              x
            }

            print(main())
        "#});

        assert_eq!(errors, 0);
        assert_eq!(shapes, vec!["fn add", "fn main", "expr"]);
    }

    #[test]
    fn parses_single_line_control_forms() {
        let (shapes, errors) = parse(indoc! {r#"
            s <- 0L
            i <- 0L
            while (i < 5L) i <- i + 1L
            for (k in 1L..5L) s <- s + k
            if (i == 5L) s <- s + 100L else s <- 0L
        "#});

        assert_eq!(errors, 0);
        assert_eq!(shapes, vec!["assign", "assign", "while", "for", "if"]);
    }

    #[test]
    fn statement_after_single_line_if_is_not_chained() {
        let source = SourceFile::new_in_memory(indoc! {r#"
            f <- function(ff, size, y) {
              if (ff < 1L) ff <- 1L
              (ff - 1L) * size * size + y
            }
        "#});
        let diagnostics = DiagnosticBag::new();
        let module = Parser::parse_module(&source, &diagnostics, DEFAULT_ERROR_CAP);

        assert!(diagnostics.drain().is_empty());

        let ItemKind::Function(f) = &module.items[0].kind else {
            panic!("expected function item");
        };
        let FunctionBody::Block(block) = &f.body else {
            panic!("expected block body");
        };

        assert_eq!(block.statements.len(), 2);
        assert!(matches!(block.statements[0].kind, StatementKind::If { .. }));
        assert!(matches!(
            block.statements[1].kind,
            StatementKind::Expression(_)
        ));
    }

    #[test]
    fn parses_no_paren_control_forms() {
        let (shapes, errors) = parse(indoc! {r#"
            i <- 0L
            while i < 4L {
              i <- i + 1L
            }
            if i == 4L {
              print(i)
            } else {
              print(0L)
            }
        "#});

        assert_eq!(errors, 0);
        assert_eq!(shapes, vec!["assign", "while", "if"]);
    }

    #[test]
    fn parses_compound_assignment_targets() {
        let (shapes, errors) = parse(indoc! {r#"
            arr[1L] += 2L
            s += 1L
        "#});

        assert_eq!(errors, 0);
        assert_eq!(shapes, vec!["assign", "assign"]);
    }

    #[test]
    fn parses_defaults_and_typed_declarations() {
        let source = SourceFile::new_in_memory(indoc! {r#"
            f <- function(a = 0.0, b = 0L, c = TRUE, d = "x") {
              z: int = 10L
              a + b
            }
        "#});
        let diagnostics = DiagnosticBag::new();
        let module = Parser::parse_module(&source, &diagnostics, DEFAULT_ERROR_CAP);

        assert!(diagnostics.drain().is_empty());

        let ItemKind::Function(f) = &module.items[0].kind else {
            panic!("expected function item");
        };

        assert_eq!(f.parameters.len(), 4);
        assert!(f.parameters.iter().all(|p| p.default.is_some()));

        let FunctionBody::Block(block) = &f.body else {
            panic!("expected block body");
        };
        assert!(matches!(
            &block.statements[0].kind,
            StatementKind::Let { ty: Some(_), .. }
        ));
    }

    #[test]
    fn reports_independent_errors_and_recovers() {
        let source = SourceFile::new_in_memory(indoc! {r#"
            x <- )
            y <- 1L
            z <- ]
        "#});
        let diagnostics = DiagnosticBag::new();
        let module = Parser::parse_module(&source, &diagnostics, DEFAULT_ERROR_CAP);

        let drained = diagnostics.drain();
        assert_eq!(drained.len(), 2);
        // the well-formed statement in between still parses
        assert!(module.items.iter().any(|i| matches!(
            &i.kind,
            ItemKind::Statement(s) if matches!(s.kind, StatementKind::Assign { .. })
        )));
    }

    #[test]
    fn error_cap_stops_the_parse() {
        let source = SourceFile::new_in_memory("x <- )\ny <- )\nz <- )\nw <- )\n");
        let diagnostics = DiagnosticBag::new();
        let _ = Parser::parse_module(&source, &diagnostics, 2);

        assert_eq!(diagnostics.drain().len(), 2);
    }
}
