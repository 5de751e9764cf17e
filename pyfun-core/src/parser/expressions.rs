//! Expression parsing for pyfun.
//!
//! Precedence, loosest first: lambda, conditional, `or`, `and`, `not`,
//! comparisons, `+ -`, `* / // %`, unary `- +`, `**`, postfix
//! (call, subscript, slice, attribute), atoms.

use std::rc::Rc;

use crate::ast::*;
use crate::error::PyfunResult;
use crate::lexer::Token;
use crate::parser::Parser;

impl Parser {
    /// Whether the current token can begin an expression
    fn starts_expression(&self) -> bool {
        matches!(
            self.current_token(),
            Token::Identifier(_)
                | Token::Integer(_)
                | Token::Float(_)
                | Token::String(_)
                | Token::NoneLiteral
                | Token::True
                | Token::False
                | Token::LeftParen
                | Token::LeftBracket
                | Token::LeftBrace
                | Token::Minus
                | Token::Plus
                | Token::Not
                | Token::Lambda
        )
    }

    /// Parse `expr (',' expr)* [',']`, producing a tuple when commas are present.
    pub(crate) fn parse_expression_list(&mut self) -> PyfunResult<Expr> {
        let first = self.parse_expression()?;
        if !matches!(self.current_token(), Token::Comma) {
            return Ok(first);
        }

        let mut items = vec![first];
        while matches!(self.current_token(), Token::Comma) {
            self.advance();
            if !self.starts_expression() {
                break;
            }
            items.push(self.parse_expression()?);
        }
        Ok(Expr::Tuple(items))
    }

    /// Parse a loop or comprehension target: `a`, `k, v`, `(k, v)`, `d['x']`
    pub(crate) fn parse_target_list(&mut self) -> PyfunResult<Expr> {
        let first = self.parse_postfix_expression()?;
        let target = if matches!(self.current_token(), Token::Comma) {
            let mut items = vec![first];
            while matches!(self.current_token(), Token::Comma) {
                self.advance();
                if matches!(self.current_token(), Token::In) {
                    break;
                }
                items.push(self.parse_postfix_expression()?);
            }
            Expr::Tuple(items)
        } else {
            first
        };
        self.validate_target(&target)?;
        Ok(target)
    }

    /// Parse a full expression including conditionals and lambdas
    pub(crate) fn parse_expression(&mut self) -> PyfunResult<Expr> {
        self.enter()?;
        let expr = self.parse_test()?;
        self.leave(1);
        Ok(expr)
    }

    fn parse_test(&mut self) -> PyfunResult<Expr> {
        if matches!(self.current_token(), Token::Lambda) {
            return self.parse_lambda();
        }

        let body = self.parse_or_expression()?;
        if !matches!(self.current_token(), Token::If) {
            return Ok(body);
        }

        self.advance(); // consume 'if'
        let condition = self.parse_or_expression()?;
        self.expect(Token::Else)?;
        let orelse = self.parse_expression()?;

        Ok(Expr::IfExp {
            condition: Box::new(condition),
            body: Box::new(body),
            orelse: Box::new(orelse),
        })
    }

    fn parse_lambda(&mut self) -> PyfunResult<Expr> {
        let line = self.current_line();
        self.advance(); // consume 'lambda'
        let params = self.parse_parameters(Token::Colon)?;
        self.expect(Token::Colon)?;
        let body = self.parse_expression()?;

        Ok(Expr::Lambda(Rc::new(FunctionDef {
            name: "<lambda>".to_string(),
            params,
            body: vec![Stmt {
                kind: StmtKind::Return(Some(body)),
                line,
            }],
            is_generator: false,
        })))
    }

    fn parse_or_expression(&mut self) -> PyfunResult<Expr> {
        let mut left = self.parse_and_expression()?;

        let mut links = 0;
        while matches!(self.current_token(), Token::Or) {
            self.enter()?;
            links += 1;
            self.advance();
            let right = self.parse_and_expression()?;
            left = Expr::Logical {
                and: false,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.leave(links);

        Ok(left)
    }

    fn parse_and_expression(&mut self) -> PyfunResult<Expr> {
        let mut left = self.parse_not_expression()?;

        let mut links = 0;
        while matches!(self.current_token(), Token::And) {
            self.enter()?;
            links += 1;
            self.advance();
            let right = self.parse_not_expression()?;
            left = Expr::Logical {
                and: true,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.leave(links);

        Ok(left)
    }

    fn parse_not_expression(&mut self) -> PyfunResult<Expr> {
        if matches!(self.current_token(), Token::Not) {
            self.advance();
            self.enter()?;
            let operand = self.parse_not_expression()?;
            self.leave(1);
            return Ok(Expr::Unary {
                op: UnaryOperator::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    /// Parse a comparison operator if present.
    fn parse_comparison_operator(&mut self) -> Option<CompareOperator> {
        let op = match self.current_token() {
            Token::Equal => CompareOperator::Equal,
            Token::NotEqual => CompareOperator::NotEqual,
            Token::LessThan => CompareOperator::LessThan,
            Token::LessThanEq => CompareOperator::LessThanOrEqual,
            Token::GreaterThan => CompareOperator::GreaterThan,
            Token::GreaterThanEq => CompareOperator::GreaterThanOrEqual,
            Token::In => CompareOperator::In,
            Token::Not if matches!(self.peek_token(1), Token::In) => {
                self.advance(); // consume 'not'
                CompareOperator::NotIn
            }
            Token::Is if matches!(self.peek_token(1), Token::Not) => {
                self.advance(); // consume 'is'
                CompareOperator::IsNot
            }
            Token::Is => CompareOperator::Is,
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    fn parse_comparison(&mut self) -> PyfunResult<Expr> {
        let left = self.parse_arithmetic()?;

        let mut comparisons = Vec::new();
        while let Some(op) = self.parse_comparison_operator() {
            comparisons.push((op, self.parse_arithmetic()?));
        }

        if comparisons.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare {
                left: Box::new(left),
                comparisons,
            })
        }
    }

    fn parse_arithmetic(&mut self) -> PyfunResult<Expr> {
        let mut left = self.parse_term()?;

        let mut links = 0;
        loop {
            let op = match self.current_token() {
                Token::Plus => BinaryOperator::Add,
                Token::Minus => BinaryOperator::Subtract,
                _ => break,
            };
            self.enter()?;
            links += 1;
            self.advance();
            let right = self.parse_term()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.leave(links);

        Ok(left)
    }

    fn parse_term(&mut self) -> PyfunResult<Expr> {
        let mut left = self.parse_factor()?;

        let mut links = 0;
        loop {
            let op = match self.current_token() {
                Token::Star => BinaryOperator::Multiply,
                Token::Slash => BinaryOperator::Divide,
                Token::DoubleSlash => BinaryOperator::FloorDivide,
                Token::Percent => BinaryOperator::Modulo,
                _ => break,
            };
            self.enter()?;
            links += 1;
            self.advance();
            let right = self.parse_factor()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.leave(links);

        Ok(left)
    }

    fn parse_factor(&mut self) -> PyfunResult<Expr> {
        let op = match self.current_token() {
            Token::Minus => UnaryOperator::Negate,
            Token::Plus => UnaryOperator::Plus,
            _ => return self.parse_power(),
        };
        self.advance();
        self.enter()?;
        let operand = self.parse_factor()?;
        self.leave(1);
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_power(&mut self) -> PyfunResult<Expr> {
        let base = self.parse_postfix_expression()?;

        if matches!(self.current_token(), Token::DoubleStar) {
            self.advance();
            // Right-associative, and binds tighter than a unary minus on its left
            self.enter()?;
            let exponent = self.parse_factor()?;
            self.leave(1);
            return Ok(Expr::Binary {
                op: BinaryOperator::Power,
                left: Box::new(base),
                right: Box::new(exponent),
            });
        }

        Ok(base)
    }

    /// Parse postfix expression: calls, subscripts, slices, attributes
    pub(crate) fn parse_postfix_expression(&mut self) -> PyfunResult<Expr> {
        let mut expr = self.parse_atom()?;

        let mut links = 0;
        loop {
            if matches!(
                self.current_token(),
                Token::LeftParen | Token::LeftBracket | Token::Dot
            ) {
                self.enter()?;
                links += 1;
            }
            match self.current_token() {
                Token::LeftParen => {
                    expr = self.parse_call(expr)?;
                }
                Token::LeftBracket => {
                    expr = self.parse_subscript(expr)?;
                }
                Token::Dot => {
                    self.advance();
                    let attr = self.expect_identifier()?;
                    expr = Expr::Attribute {
                        value: Box::new(expr),
                        attr,
                    };
                }
                _ => break,
            }
        }
        self.leave(links);

        Ok(expr)
    }

    fn parse_call(&mut self, func: Expr) -> PyfunResult<Expr> {
        self.advance(); // consume '('

        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();

        while !matches!(self.current_token(), Token::RightParen) {
            if matches!(self.current_token(), Token::Star | Token::DoubleStar) {
                return Err(self.error("argument unpacking is not supported"));
            }

            if let (Token::Identifier(name), Token::Assign) =
                (self.current_token(), self.peek_token(1))
            {
                let name = name.clone();
                self.advance();
                self.advance();
                if kwargs.iter().any(|(existing, _)| *existing == name) {
                    return Err(self.error(format!("keyword argument repeated: {}", name)));
                }
                kwargs.push((name, self.parse_expression()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                let arg = self.parse_expression()?;
                if matches!(self.current_token(), Token::For) {
                    // Generator expression as the sole argument: f(x for x in xs)
                    if !args.is_empty() {
                        return Err(self.error("generator expression must be parenthesized"));
                    }
                    args.push(self.parse_list_comprehension(arg)?);
                    if !matches!(self.current_token(), Token::RightParen) {
                        return Err(self.error("generator expression must be parenthesized"));
                    }
                    break;
                }
                args.push(arg);
            }

            if matches!(self.current_token(), Token::Comma) {
                self.advance();
            } else if !matches!(self.current_token(), Token::RightParen) {
                return Err(self.unexpected());
            }
        }

        self.expect(Token::RightParen)?;
        Ok(Expr::Call {
            func: Box::new(func),
            args,
            kwargs,
        })
    }

    fn parse_subscript(&mut self, value: Expr) -> PyfunResult<Expr> {
        self.advance(); // consume '['

        let lower = if matches!(self.current_token(), Token::Colon) {
            None
        } else {
            let index = self.parse_expression_list()?;
            if matches!(self.current_token(), Token::RightBracket) {
                self.advance();
                return Ok(Expr::Subscript {
                    value: Box::new(value),
                    index: Box::new(index),
                });
            }
            Some(Box::new(index))
        };

        self.expect(Token::Colon)?;
        let upper = if matches!(self.current_token(), Token::Colon | Token::RightBracket) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        let step = if matches!(self.current_token(), Token::Colon) {
            self.advance();
            if matches!(self.current_token(), Token::RightBracket) {
                None
            } else {
                Some(Box::new(self.parse_expression()?))
            }
        } else {
            None
        };
        self.expect(Token::RightBracket)?;

        Ok(Expr::Slice {
            value: Box::new(value),
            lower,
            upper,
            step,
        })
    }

    fn parse_comprehension_clauses(&mut self) -> PyfunResult<Vec<Comprehension>> {
        let mut generators = Vec::new();

        while matches!(self.current_token(), Token::For) {
            self.advance();
            let target = self.parse_target_list()?;
            self.expect(Token::In)?;
            let iter = self.parse_or_expression()?;

            let mut conditions = Vec::new();
            while matches!(self.current_token(), Token::If) {
                self.advance();
                conditions.push(self.parse_or_expression()?);
            }

            generators.push(Comprehension {
                target,
                iter,
                conditions,
            });
        }

        Ok(generators)
    }

    fn parse_list_comprehension(&mut self, element: Expr) -> PyfunResult<Expr> {
        let generators = self.parse_comprehension_clauses()?;
        Ok(Expr::ListComp {
            element: Box::new(element),
            generators,
        })
    }

    /// Parse the remaining items of a bracketed sequence after its first element.
    fn parse_sequence_tail(&mut self, first: Expr, closing: Token) -> PyfunResult<Vec<Expr>> {
        let mut items = vec![first];
        while matches!(self.current_token(), Token::Comma) {
            self.advance();
            if self.current_token() == &closing {
                break;
            }
            items.push(self.parse_expression()?);
        }
        self.expect(closing)?;
        Ok(items)
    }

    fn parse_atom(&mut self) -> PyfunResult<Expr> {
        let expr = match self.current_token().clone() {
            Token::Identifier(name) => {
                self.advance();
                Expr::Name(name)
            }
            Token::Integer(n) => {
                self.advance();
                Expr::Literal(Literal::Int(n))
            }
            Token::Float(f) => {
                self.advance();
                Expr::Literal(Literal::Float(f))
            }
            Token::String(s) => {
                self.advance();
                // Adjacent string literals concatenate
                let mut text = s;
                while let Token::String(next) = self.current_token() {
                    text.push_str(next);
                    self.advance();
                }
                Expr::Literal(Literal::Str(Rc::from(text)))
            }
            Token::NoneLiteral => {
                self.advance();
                Expr::Literal(Literal::None)
            }
            Token::True => {
                self.advance();
                Expr::Literal(Literal::Bool(true))
            }
            Token::False => {
                self.advance();
                Expr::Literal(Literal::Bool(false))
            }

            Token::LeftParen => {
                self.advance();
                if matches!(self.current_token(), Token::RightParen) {
                    self.advance();
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.parse_expression()?;
                if matches!(self.current_token(), Token::For) {
                    let comprehension = self.parse_list_comprehension(first)?;
                    self.expect(Token::RightParen)?;
                    return Ok(comprehension);
                }
                if matches!(self.current_token(), Token::Comma) {
                    Expr::Tuple(self.parse_sequence_tail(first, Token::RightParen)?)
                } else {
                    self.expect(Token::RightParen)?;
                    first
                }
            }

            Token::LeftBracket => {
                self.advance();
                if matches!(self.current_token(), Token::RightBracket) {
                    self.advance();
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.parse_expression()?;
                if matches!(self.current_token(), Token::For) {
                    let comprehension = self.parse_list_comprehension(first)?;
                    self.expect(Token::RightBracket)?;
                    return Ok(comprehension);
                }
                Expr::List(self.parse_sequence_tail(first, Token::RightBracket)?)
            }

            Token::LeftBrace => {
                self.advance();
                self.parse_dict_display()?
            }

            Token::Yield => {
                return Err(self.error("'yield' is only supported as a statement"));
            }

            _ => return Err(self.unexpected()),
        };

        Ok(expr)
    }

    /// Parse `{...}` after the opening brace
    fn parse_dict_display(&mut self) -> PyfunResult<Expr> {
        if matches!(self.current_token(), Token::RightBrace) {
            self.advance();
            return Ok(Expr::Dict(Vec::new()));
        }

        let key = self.parse_expression()?;
        if !matches!(self.current_token(), Token::Colon) {
            return Err(self.error("set literals are not supported"));
        }
        self.advance();
        let value = self.parse_expression()?;

        if matches!(self.current_token(), Token::For) {
            let generators = self.parse_comprehension_clauses()?;
            self.expect(Token::RightBrace)?;
            return Ok(Expr::DictComp {
                key: Box::new(key),
                value: Box::new(value),
                generators,
            });
        }

        let mut entries = vec![(key, value)];
        while matches!(self.current_token(), Token::Comma) {
            self.advance();
            if matches!(self.current_token(), Token::RightBrace) {
                break;
            }
            let key = self.parse_expression()?;
            self.expect(Token::Colon)?;
            let value = self.parse_expression()?;
            entries.push((key, value));
        }
        self.expect(Token::RightBrace)?;

        Ok(Expr::Dict(entries))
    }
}
