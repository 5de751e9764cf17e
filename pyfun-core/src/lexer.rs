//! Tokenizer for pyfun source text.
//!
//! Produces a flat token stream with explicit `Newline`, `Indent` and
//! `Dedent` tokens so the parser never has to look at whitespace. Newlines
//! inside brackets are ignored, as are blank and comment-only lines.

use crate::error::{PyfunError, PyfunResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Keywords
    Def,
    Return,
    Yield,
    If,
    Elif,
    Else,
    For,
    In,
    While,
    Break,
    Continue,
    Pass,
    Not,
    And,
    Or,
    Is,
    NoneLiteral,
    True,
    False,
    Lambda,
    Try,
    Except,
    Finally,
    Raise,
    Del,
    As,
    Import,
    From,
    Global,

    // Identifiers and literals
    Identifier(String),
    Integer(i64),
    Float(f64),
    String(String),

    // Operators
    Plus,          // +
    Minus,         // -
    Star,          // *
    DoubleStar,    // **
    Slash,         // /
    DoubleSlash,   // //
    Percent,       // %
    Equal,         // ==
    NotEqual,      // !=
    LessThan,      // <
    LessThanEq,    // <=
    GreaterThan,   // >
    GreaterThanEq, // >=
    Assign,        // =

    // Augmented assignment
    PlusAssign,        // +=
    MinusAssign,       // -=
    StarAssign,        // *=
    SlashAssign,       // /=
    DoubleSlashAssign, // //=
    PercentAssign,     // %=

    // Delimiters
    Dot,          // .
    Comma,        // ,
    Colon,        // :
    Semicolon,    // ;
    LeftParen,    // (
    RightParen,   // )
    LeftBracket,  // [
    RightBracket, // ]
    LeftBrace,    // {
    RightBrace,   // }

    // Layout
    Newline,
    Indent,
    Dedent,
    Eof,
}

pub struct Lexer {
    input: Vec<char>,
    position: usize,
    current_char: Option<char>,
    line: usize,
    indent_stack: Vec<usize>,
    bracket_depth: usize,
    at_line_start: bool,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        // A UTF-8 byte order mark may precede the source
        let chars: Vec<char> = input.trim_start_matches('\u{feff}').chars().collect();
        let current_char = chars.first().copied();

        Self {
            input: chars,
            position: 0,
            current_char,
            line: 1,
            indent_stack: vec![0],
            bracket_depth: 0,
            at_line_start: true,
        }
    }

    fn advance(&mut self) {
        self.position += 1;
        self.current_char = self.input.get(self.position).copied();
    }

    /// Peek at a character `offset` positions ahead without consuming it
    fn peek_char(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    fn error(&self, message: impl Into<String>) -> PyfunError {
        PyfunError::syntax(message, self.line)
    }

    /// Tokenize the whole input. Each token is paired with its source line.
    pub fn tokenize(&mut self) -> PyfunResult<Vec<(Token, usize)>> {
        let mut tokens: Vec<(Token, usize)> = Vec::new();

        loop {
            if self.at_line_start && self.bracket_depth == 0 {
                let indent = self.read_indentation();
                match self.current_char {
                    None => break,
                    Some('\n') => {
                        self.advance();
                        self.line += 1;
                        continue;
                    }
                    Some('#') => {
                        self.skip_comment();
                        continue;
                    }
                    _ => {}
                }
                self.at_line_start = false;
                self.emit_indentation(indent, &mut tokens)?;
            }

            self.skip_inline_whitespace()?;

            match self.current_char {
                None => break,
                Some('\n') => {
                    self.advance();
                    if self.bracket_depth == 0 {
                        tokens.push((Token::Newline, self.line));
                        self.at_line_start = true;
                    }
                    self.line += 1;
                }
                Some(_) => {
                    let line = self.line;
                    let token = self.next_token()?;
                    tokens.push((token, line));
                }
            }
        }

        if self.bracket_depth > 0 {
            return Err(self.error("unexpected EOF while parsing (unclosed bracket)"));
        }

        if !matches!(tokens.last(), None | Some((Token::Newline, _))) {
            tokens.push((Token::Newline, self.line));
        }
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            tokens.push((Token::Dedent, self.line));
        }
        tokens.push((Token::Eof, self.line));

        Ok(tokens)
    }

    /// Measure leading whitespace; tabs advance to the next multiple of 8.
    fn read_indentation(&mut self) -> usize {
        let mut width = 0;
        while let Some(ch) = self.current_char {
            match ch {
                ' ' => width += 1,
                '\t' => width = (width / 8 + 1) * 8,
                '\r' | '\x0c' => {}
                _ => break,
            }
            self.advance();
        }
        width
    }

    fn emit_indentation(
        &mut self,
        indent: usize,
        tokens: &mut Vec<(Token, usize)>,
    ) -> PyfunResult<()> {
        let top = *self.indent_stack.last().unwrap_or(&0);
        if indent > top {
            self.indent_stack.push(indent);
            tokens.push((Token::Indent, self.line));
        } else if indent < top {
            while self.indent_stack.last().is_some_and(|&level| level > indent) {
                self.indent_stack.pop();
                tokens.push((Token::Dedent, self.line));
            }
            if self.indent_stack.last() != Some(&indent) {
                return Err(self.error("unindent does not match any outer indentation level"));
            }
        }
        Ok(())
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.current_char {
            if ch == '\n' {
                break;
            }
            self.advance();
        }
    }

    /// Skip spaces, comments and backslash line continuations.
    fn skip_inline_whitespace(&mut self) -> PyfunResult<()> {
        while let Some(ch) = self.current_char {
            match ch {
                ' ' | '\t' | '\r' | '\x0c' => self.advance(),
                '#' => self.skip_comment(),
                '\\' => {
                    let next = self.peek_char(1);
                    if next == Some('\n') {
                        self.advance();
                        self.advance();
                        self.line += 1;
                    } else if next == Some('\r') && self.peek_char(2) == Some('\n') {
                        self.advance();
                        self.advance();
                        self.advance();
                        self.line += 1;
                    } else {
                        return Err(self.error("unexpected character after line continuation"));
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn read_number(&mut self) -> PyfunResult<Token> {
        if self.current_char == Some('0') {
            let radix = match self.peek_char(1) {
                Some('x') | Some('X') => Some(16),
                Some('o') | Some('O') => Some(8),
                Some('b') | Some('B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.advance();
                self.advance();
                let mut digits = String::new();
                while let Some(ch) = self.current_char {
                    if ch.is_digit(radix) {
                        digits.push(ch);
                    } else if ch != '_' {
                        break;
                    }
                    self.advance();
                }
                return i64::from_str_radix(&digits, radix)
                    .map(Token::Integer)
                    .map_err(|_| self.error(format!("invalid integer literal: {}", digits)));
            }
        }

        let mut num_str = String::new();
        let mut is_float = false;

        while let Some(ch) = self.current_char {
            if ch.is_ascii_digit() {
                num_str.push(ch);
                self.advance();
            } else if ch == '_' {
                self.advance();
            } else if ch == '.' && !is_float {
                is_float = true;
                num_str.push(ch);
                self.advance();
            } else if (ch == 'e' || ch == 'E')
                && (self.peek_char(1).is_some_and(|c| c.is_ascii_digit())
                    || (matches!(self.peek_char(1), Some('+') | Some('-'))
                        && self.peek_char(2).is_some_and(|c| c.is_ascii_digit())))
            {
                is_float = true;
                num_str.push('e');
                self.advance();
                if let Some(sign) = self.current_char.filter(|c| *c == '+' || *c == '-') {
                    num_str.push(sign);
                    self.advance();
                }
                while let Some(digit) = self.current_char.filter(|c| c.is_ascii_digit()) {
                    num_str.push(digit);
                    self.advance();
                }
                break;
            } else {
                break;
            }
        }

        if is_float {
            num_str
                .parse::<f64>()
                .map(Token::Float)
                .map_err(|_| self.error(format!("invalid float literal: {}", num_str)))
        } else {
            num_str
                .parse::<i64>()
                .map(Token::Integer)
                .map_err(|_| self.error(format!("integer literal too large: {}", num_str)))
        }
    }

    fn read_string(&mut self, raw: bool) -> PyfunResult<Token> {
        let quote = match self.current_char {
            Some(q) => q,
            None => return Err(self.error("expected string literal")),
        };
        let triple = self.peek_char(1) == Some(quote) && self.peek_char(2) == Some(quote);
        self.advance();
        if triple {
            self.advance();
            self.advance();
        }

        let mut string = String::new();

        loop {
            let ch = match self.current_char {
                Some(ch) => ch,
                None => return Err(self.error("EOF while scanning string literal")),
            };

            if ch == quote {
                if !triple {
                    self.advance();
                    return Ok(Token::String(string));
                }
                if self.peek_char(1) == Some(quote) && self.peek_char(2) == Some(quote) {
                    self.advance();
                    self.advance();
                    self.advance();
                    return Ok(Token::String(string));
                }
                string.push(ch);
                self.advance();
            } else if ch == '\n' {
                if !triple {
                    return Err(self.error("EOL while scanning string literal"));
                }
                string.push(ch);
                self.line += 1;
                self.advance();
            } else if ch == '\\' {
                self.advance();
                let escaped = match self.current_char {
                    Some(escaped) => escaped,
                    None => return Err(self.error("EOF while scanning string literal")),
                };
                if raw {
                    string.push('\\');
                    string.push(escaped);
                    if escaped == '\n' {
                        self.line += 1;
                    }
                    self.advance();
                    continue;
                }
                match escaped {
                    'n' => string.push('\n'),
                    't' => string.push('\t'),
                    'r' => string.push('\r'),
                    '0' => string.push('\0'),
                    'a' => string.push('\x07'),
                    'b' => string.push('\x08'),
                    'f' => string.push('\x0c'),
                    'v' => string.push('\x0b'),
                    '\\' => string.push('\\'),
                    '\'' => string.push('\''),
                    '"' => string.push('"'),
                    '\n' => self.line += 1,
                    'x' => {
                        self.advance();
                        string.push(self.read_hex_escape(2)?);
                        continue;
                    }
                    'u' => {
                        self.advance();
                        string.push(self.read_hex_escape(4)?);
                        continue;
                    }
                    'U' => {
                        self.advance();
                        string.push(self.read_hex_escape(8)?);
                        continue;
                    }
                    other => {
                        string.push('\\');
                        string.push(other);
                    }
                }
                self.advance();
            } else {
                string.push(ch);
                self.advance();
            }
        }
    }

    fn read_hex_escape(&mut self, digits: usize) -> PyfunResult<char> {
        let mut hex = String::with_capacity(digits);
        for _ in 0..digits {
            match self.current_char {
                Some(ch) if ch.is_ascii_hexdigit() => {
                    hex.push(ch);
                    self.advance();
                }
                _ => return Err(self.error("truncated \\x, \\u or \\U escape")),
            }
        }
        u32::from_str_radix(&hex, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.error(format!("invalid escape code point: {}", hex)))
    }

    fn read_identifier(&mut self) -> String {
        let mut ident = String::new();

        while let Some(ch) = self.current_char {
            if ch.is_alphanumeric() || ch == '_' {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        ident
    }

    fn keyword(ident: String) -> Token {
        match ident.as_str() {
            "def" => Token::Def,
            "return" => Token::Return,
            "yield" => Token::Yield,
            "if" => Token::If,
            "elif" => Token::Elif,
            "else" => Token::Else,
            "for" => Token::For,
            "in" => Token::In,
            "while" => Token::While,
            "break" => Token::Break,
            "continue" => Token::Continue,
            "pass" => Token::Pass,
            "not" => Token::Not,
            "and" => Token::And,
            "or" => Token::Or,
            "is" => Token::Is,
            "None" => Token::NoneLiteral,
            "True" => Token::True,
            "False" => Token::False,
            "lambda" => Token::Lambda,
            "try" => Token::Try,
            "except" => Token::Except,
            "finally" => Token::Finally,
            "raise" => Token::Raise,
            "del" => Token::Del,
            "as" => Token::As,
            "import" => Token::Import,
            "from" => Token::From,
            "global" => Token::Global,
            _ => Token::Identifier(ident),
        }
    }

    fn bracket_open(&mut self, token: Token) -> Token {
        self.bracket_depth += 1;
        self.advance();
        token
    }

    fn bracket_close(&mut self, token: Token) -> PyfunResult<Token> {
        if self.bracket_depth == 0 {
            return Err(self.error(format!("unmatched '{}'", self.current_char.unwrap_or(')'))));
        }
        self.bracket_depth -= 1;
        self.advance();
        Ok(token)
    }

    /// Consume `base`, or `base` followed by `=` as its augmented form.
    fn with_assign(&mut self, plain: Token, augmented: Token) -> Token {
        self.advance();
        if self.current_char == Some('=') {
            self.advance();
            augmented
        } else {
            plain
        }
    }

    fn next_token(&mut self) -> PyfunResult<Token> {
        let ch = match self.current_char {
            Some(ch) => ch,
            None => return Ok(Token::Eof),
        };

        let token = match ch {
            c if c.is_ascii_digit() => return self.read_number(),
            '.' if self.peek_char(1).is_some_and(|c| c.is_ascii_digit()) => {
                return self.read_number()
            }

            '"' | '\'' => return self.read_string(false),

            c if c.is_alphabetic() || c == '_' => {
                let ident = self.read_identifier();
                if matches!(self.current_char, Some('"') | Some('\''))
                    && matches!(
                        ident.to_lowercase().as_str(),
                        "r" | "u" | "b" | "ur" | "br" | "rb"
                    )
                {
                    let raw = ident.to_lowercase().contains('r');
                    return self.read_string(raw);
                }
                return Ok(Self::keyword(ident));
            }

            '=' => {
                self.advance();
                if self.current_char == Some('=') {
                    self.advance();
                    Token::Equal
                } else {
                    Token::Assign
                }
            }

            '!' => {
                self.advance();
                if self.current_char == Some('=') {
                    self.advance();
                    Token::NotEqual
                } else {
                    return Err(self.error("invalid syntax: '!'"));
                }
            }

            '<' => {
                self.advance();
                if self.current_char == Some('=') {
                    self.advance();
                    Token::LessThanEq
                } else {
                    Token::LessThan
                }
            }

            '>' => {
                self.advance();
                if self.current_char == Some('=') {
                    self.advance();
                    Token::GreaterThanEq
                } else {
                    Token::GreaterThan
                }
            }

            '+' => self.with_assign(Token::Plus, Token::PlusAssign),
            '-' => self.with_assign(Token::Minus, Token::MinusAssign),
            '%' => self.with_assign(Token::Percent, Token::PercentAssign),

            '*' => {
                if self.peek_char(1) == Some('*') {
                    self.advance();
                    self.advance();
                    Token::DoubleStar
                } else {
                    self.with_assign(Token::Star, Token::StarAssign)
                }
            }

            '/' => {
                if self.peek_char(1) == Some('/') {
                    self.advance();
                    self.with_assign(Token::DoubleSlash, Token::DoubleSlashAssign)
                } else {
                    self.with_assign(Token::Slash, Token::SlashAssign)
                }
            }

            '.' => {
                self.advance();
                Token::Dot
            }
            ',' => {
                self.advance();
                Token::Comma
            }
            ':' => {
                self.advance();
                Token::Colon
            }
            ';' => {
                self.advance();
                Token::Semicolon
            }

            '(' => self.bracket_open(Token::LeftParen),
            '[' => self.bracket_open(Token::LeftBracket),
            '{' => self.bracket_open(Token::LeftBrace),
            ')' => return self.bracket_close(Token::RightParen),
            ']' => return self.bracket_close(Token::RightBracket),
            '}' => return self.bracket_close(Token::RightBrace),

            other => {
                return Err(self.error(format!("unexpected character: {}", other)));
            }
        };

        Ok(token)
    }
}
