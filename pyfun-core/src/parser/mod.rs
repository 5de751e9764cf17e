//! Parser module for the pyfun language.
//!
//! Converts the token stream produced by the lexer into a [`Module`].
//! Statements live here; expression parsing is in `expressions.rs`.

mod expressions;
#[cfg(test)]
mod tests;

use std::rc::Rc;

use crate::ast::*;
use crate::error::{PyfunError, PyfunResult};
use crate::lexer::{Lexer, Token};

/// Deepest nesting of expressions, operator chains and blocks the parser accepts
const MAX_NESTING: usize = 100;

/// Per-function parsing state
#[derive(Default)]
struct Scope {
    in_function: bool,
    is_generator: bool,
    loop_depth: usize,
}

/// Parser for pyfun modules
pub struct Parser {
    pub(crate) tokens: Vec<(Token, usize)>,
    pub(crate) position: usize,
    scopes: Vec<Scope>,
    nesting: usize,
}

/// Parse a complete source text into a module.
pub fn parse(input: &str) -> PyfunResult<Module> {
    Parser::new(input)?.parse()
}

impl Parser {
    /// Create a new parser from an input string
    pub fn new(input: &str) -> PyfunResult<Self> {
        let tokens = Lexer::new(input).tokenize()?;

        Ok(Self {
            tokens,
            position: 0,
            scopes: vec![Scope::default()],
            nesting: 0,
        })
    }

    /// Get the current token
    pub(crate) fn current_token(&self) -> &Token {
        self.tokens
            .get(self.position)
            .map(|(token, _)| token)
            .unwrap_or(&Token::Eof)
    }

    /// Peek at a token at a given offset from the current position
    pub(crate) fn peek_token(&self, offset: usize) -> &Token {
        self.tokens
            .get(self.position + offset)
            .map(|(token, _)| token)
            .unwrap_or(&Token::Eof)
    }

    pub(crate) fn current_line(&self) -> usize {
        self.tokens
            .get(self.position)
            .or_else(|| self.tokens.last())
            .map(|(_, line)| *line)
            .unwrap_or(1)
    }

    /// Advance to the next token
    pub(crate) fn advance(&mut self) {
        if self.position < self.tokens.len() {
            self.position += 1;
        }
    }

    pub(crate) fn error(&self, message: impl Into<String>) -> PyfunError {
        PyfunError::syntax(message, self.current_line())
    }

    pub(crate) fn unexpected(&self) -> PyfunError {
        self.error(format!("invalid syntax: unexpected {:?}", self.current_token()))
    }

    /// Expect a specific token and advance, or return an error
    pub(crate) fn expect(&mut self, expected: Token) -> PyfunResult<()> {
        if self.current_token() == &expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!(
                "expected {:?}, got {:?}",
                expected,
                self.current_token()
            )))
        }
    }

    pub(crate) fn expect_identifier(&mut self) -> PyfunResult<String> {
        match self.current_token() {
            Token::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            other => Err(self.error(format!("expected identifier, got {:?}", other))),
        }
    }

    /// Descend one nesting level. Parsing stops at the first error, so a
    /// failed descent is never paired with `leave`.
    pub(crate) fn enter(&mut self) -> PyfunResult<()> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(self.error("too many nested parentheses, operators or blocks"));
        }
        Ok(())
    }

    pub(crate) fn leave(&mut self, levels: usize) {
        self.nesting = self.nesting.saturating_sub(levels);
    }

    fn scope(&mut self) -> &mut Scope {
        if self.scopes.is_empty() {
            self.scopes.push(Scope::default());
        }
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    /// Parse a complete module
    pub fn parse(&mut self) -> PyfunResult<Module> {
        let mut body = Vec::new();

        loop {
            match self.current_token() {
                Token::Eof => break,
                Token::Newline => self.advance(),
                Token::Indent => return Err(self.error("unexpected indent")),
                _ => body.extend(self.parse_statement()?),
            }
        }

        Ok(Module { body })
    }

    fn parse_statement(&mut self) -> PyfunResult<Vec<Stmt>> {
        let line = self.current_line();
        let kind = match self.current_token() {
            Token::Def => StmtKind::FunctionDef(self.parse_function_def()?),
            Token::If => self.parse_if()?,
            Token::For => self.parse_for()?,
            Token::While => self.parse_while()?,
            Token::Try => self.parse_try()?,
            _ => return self.parse_simple_line(),
        };
        Ok(vec![Stmt { kind, line }])
    }

    /// Parse `small_stmt (';' small_stmt)* [';'] NEWLINE`
    fn parse_simple_line(&mut self) -> PyfunResult<Vec<Stmt>> {
        let mut stmts = vec![self.parse_small_statement()?];

        while matches!(self.current_token(), Token::Semicolon) {
            self.advance();
            if matches!(self.current_token(), Token::Newline | Token::Eof) {
                break;
            }
            stmts.push(self.parse_small_statement()?);
        }

        match self.current_token() {
            Token::Newline => {
                self.advance();
                Ok(stmts)
            }
            Token::Eof => Ok(stmts),
            _ => Err(self.unexpected()),
        }
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.current_token(),
            Token::Newline | Token::Semicolon | Token::Eof
        )
    }

    fn parse_small_statement(&mut self) -> PyfunResult<Stmt> {
        let line = self.current_line();

        let kind = match self.current_token() {
            Token::Pass => {
                self.advance();
                StmtKind::Pass
            }
            Token::Break | Token::Continue => {
                let is_break = matches!(self.current_token(), Token::Break);
                if self.scope().loop_depth == 0 {
                    let word = if is_break { "break" } else { "continue" };
                    return Err(self.error(format!("'{}' outside loop", word)));
                }
                self.advance();
                if is_break {
                    StmtKind::Break
                } else {
                    StmtKind::Continue
                }
            }
            Token::Return => {
                if !self.scope().in_function {
                    return Err(self.error("'return' outside function"));
                }
                self.advance();
                if self.at_statement_end() {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.parse_expression_list()?))
                }
            }
            Token::Yield => {
                if !self.scope().in_function {
                    return Err(self.error("'yield' outside function"));
                }
                self.scope().is_generator = true;
                self.advance();
                if self.at_statement_end() {
                    StmtKind::Yield(None)
                } else {
                    StmtKind::Yield(Some(self.parse_expression_list()?))
                }
            }
            Token::Raise => {
                self.advance();
                if self.at_statement_end() {
                    StmtKind::Raise(None)
                } else {
                    StmtKind::Raise(Some(self.parse_expression()?))
                }
            }
            Token::Del => {
                self.advance();
                let mut targets = vec![self.parse_postfix_expression()?];
                while matches!(self.current_token(), Token::Comma) {
                    self.advance();
                    targets.push(self.parse_postfix_expression()?);
                }
                for target in &targets {
                    if !matches!(target, Expr::Name(_) | Expr::Subscript { .. }) {
                        return Err(self.error("cannot delete expression"));
                    }
                }
                StmtKind::Del(targets)
            }
            Token::Import | Token::From => {
                return Err(self.error("import statements are not supported in view functions"));
            }
            Token::Global => {
                return Err(self.error("'global' is not supported in view functions"));
            }
            _ => self.parse_expression_statement()?,
        };

        Ok(Stmt { kind, line })
    }

    fn parse_expression_statement(&mut self) -> PyfunResult<StmtKind> {
        let first = self.parse_expression_list()?;

        if matches!(self.current_token(), Token::Assign) {
            let mut targets = vec![first];
            let value = loop {
                self.advance(); // consume '='
                let next = self.parse_expression_list()?;
                if matches!(self.current_token(), Token::Assign) {
                    targets.push(next);
                } else {
                    break next;
                }
            };
            for target in &targets {
                self.validate_target(target)?;
            }
            return Ok(StmtKind::Assign { targets, value });
        }

        let aug_op = match self.current_token() {
            Token::PlusAssign => Some(BinaryOperator::Add),
            Token::MinusAssign => Some(BinaryOperator::Subtract),
            Token::StarAssign => Some(BinaryOperator::Multiply),
            Token::SlashAssign => Some(BinaryOperator::Divide),
            Token::DoubleSlashAssign => Some(BinaryOperator::FloorDivide),
            Token::PercentAssign => Some(BinaryOperator::Modulo),
            _ => None,
        };

        if let Some(op) = aug_op {
            if !matches!(first, Expr::Name(_) | Expr::Subscript { .. }) {
                return Err(self.error("illegal expression for augmented assignment"));
            }
            self.advance();
            let value = self.parse_expression_list()?;
            return Ok(StmtKind::AugAssign {
                target: first,
                op,
                value,
            });
        }

        Ok(StmtKind::Expr(first))
    }

    pub(crate) fn validate_target(&self, target: &Expr) -> PyfunResult<()> {
        match target {
            Expr::Name(_) | Expr::Subscript { .. } => Ok(()),
            Expr::Tuple(items) | Expr::List(items) => {
                items.iter().try_for_each(|item| self.validate_target(item))
            }
            Expr::Attribute { .. } => Err(self.error("cannot assign to attribute")),
            _ => Err(self.error("cannot assign to expression")),
        }
    }

    /// Parse `':' simple_line` or `':' NEWLINE INDENT stmt+ DEDENT`
    fn parse_suite(&mut self) -> PyfunResult<Vec<Stmt>> {
        self.expect(Token::Colon)?;

        if !matches!(self.current_token(), Token::Newline) {
            return self.parse_simple_line();
        }
        self.advance();

        if !matches!(self.current_token(), Token::Indent) {
            return Err(self.error("expected an indented block"));
        }
        self.advance();
        self.enter()?;

        let mut body = Vec::new();
        loop {
            match self.current_token() {
                Token::Dedent => {
                    self.advance();
                    break;
                }
                Token::Eof => break,
                Token::Newline => self.advance(),
                _ => body.extend(self.parse_statement()?),
            }
        }
        self.leave(1);
        Ok(body)
    }

    fn parse_loop_body(&mut self) -> PyfunResult<Vec<Stmt>> {
        self.scope().loop_depth += 1;
        let body = self.parse_suite();
        self.scope().loop_depth -= 1;
        body
    }

    pub(crate) fn parse_parameters(&mut self, closing: Token) -> PyfunResult<Vec<Param>> {
        let mut params: Vec<Param> = Vec::new();

        while self.current_token() != &closing {
            if matches!(self.current_token(), Token::Star | Token::DoubleStar) {
                return Err(self.error("variadic parameters are not supported"));
            }
            let name = self.expect_identifier()?;
            if params.iter().any(|p| p.name == name) {
                return Err(self.error(format!(
                    "duplicate argument '{}' in function definition",
                    name
                )));
            }
            let default = if matches!(self.current_token(), Token::Assign) {
                self.advance();
                Some(self.parse_expression()?)
            } else {
                if params.iter().any(|p| p.default.is_some()) {
                    return Err(self.error("non-default argument follows default argument"));
                }
                None
            };
            params.push(Param { name, default });

            if matches!(self.current_token(), Token::Comma) {
                self.advance();
            } else if self.current_token() != &closing {
                return Err(self.unexpected());
            }
        }

        Ok(params)
    }

    fn parse_function_def(&mut self) -> PyfunResult<Rc<FunctionDef>> {
        self.advance(); // consume 'def'
        let name = self.expect_identifier()?;
        self.expect(Token::LeftParen)?;
        let params = self.parse_parameters(Token::RightParen)?;
        self.expect(Token::RightParen)?;

        self.scopes.push(Scope {
            in_function: true,
            ..Scope::default()
        });
        let body = self.parse_suite();
        let scope = self.scopes.pop().unwrap_or_default();

        Ok(Rc::new(FunctionDef {
            name,
            params,
            body: body?,
            is_generator: scope.is_generator,
        }))
    }

    fn parse_if(&mut self) -> PyfunResult<StmtKind> {
        self.advance(); // consume 'if'
        let condition = self.parse_expression()?;
        let body = self.parse_suite()?;
        let mut branches = vec![(condition, body)];

        while matches!(self.current_token(), Token::Elif) {
            self.advance();
            let condition = self.parse_expression()?;
            let body = self.parse_suite()?;
            branches.push((condition, body));
        }

        let orelse = if matches!(self.current_token(), Token::Else) {
            self.advance();
            self.parse_suite()?
        } else {
            Vec::new()
        };

        Ok(StmtKind::If { branches, orelse })
    }

    fn parse_for(&mut self) -> PyfunResult<StmtKind> {
        self.advance(); // consume 'for'
        let target = self.parse_target_list()?;
        self.expect(Token::In)?;
        let iter = self.parse_expression_list()?;
        let body = self.parse_loop_body()?;

        Ok(StmtKind::For { target, iter, body })
    }

    fn parse_while(&mut self) -> PyfunResult<StmtKind> {
        self.advance(); // consume 'while'
        let condition = self.parse_expression()?;
        let body = self.parse_loop_body()?;

        Ok(StmtKind::While { condition, body })
    }

    fn parse_try(&mut self) -> PyfunResult<StmtKind> {
        self.advance(); // consume 'try'
        let body = self.parse_suite()?;

        let mut handlers = Vec::new();
        while matches!(self.current_token(), Token::Except) {
            self.advance();
            let mut classes = Vec::new();
            let mut binding = None;

            if !matches!(self.current_token(), Token::Colon) {
                if matches!(self.current_token(), Token::LeftParen) {
                    self.advance();
                    while !matches!(self.current_token(), Token::RightParen) {
                        classes.push(self.expect_identifier()?);
                        if matches!(self.current_token(), Token::Comma) {
                            self.advance();
                        }
                    }
                    self.advance();
                } else {
                    classes.push(self.expect_identifier()?);
                }
                if matches!(self.current_token(), Token::As) {
                    self.advance();
                    binding = Some(self.expect_identifier()?);
                }
            }

            let body = self.parse_suite()?;
            handlers.push(ExceptHandler {
                classes,
                binding,
                body,
            });
        }

        let finally = if matches!(self.current_token(), Token::Finally) {
            self.advance();
            self.parse_suite()?
        } else {
            Vec::new()
        };

        if handlers.is_empty() && finally.is_empty() {
            return Err(self.error("expected 'except' or 'finally' block"));
        }

        Ok(StmtKind::Try {
            body,
            handlers,
            finally,
        })
    }
}
