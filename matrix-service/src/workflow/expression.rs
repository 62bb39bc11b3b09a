// Step Condition Expressions
// Compiles `if:` expressions over matrix and runner values into a Condition

use crate::plan::platform::RUNNER_OS_ATTRIBUTE;
use crate::plan::step::Condition;

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    True,
    False,
    String(String),
    /// Dotted path such as `matrix.os`
    Identifier(String),
    Eq,
    Ne,
    And,
    Or,
    Not,
    LParen,
    RParen,
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::String(s) => write!(f, "'{}'", s),
            Token::Identifier(s) => write!(f, "{}", s),
            Token::Eq => write!(f, "=="),
            Token::Ne => write!(f, "!="),
            Token::And => write!(f, "&&"),
            Token::Or => write!(f, "||"),
            Token::Not => write!(f, "!"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Eof => write!(f, "end of expression"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (at position {position} in '{expression}')")]
pub struct ExpressionError {
    pub expression: String,
    pub message: String,
    pub position: usize,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.char_indices().peekable(),
        }
    }

    /// Tokens paired with their byte offsets
    fn tokenize(mut self) -> Result<Vec<(usize, Token)>, (usize, String)> {
        let mut tokens = Vec::new();
        loop {
            while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}

            let Some((pos, ch)) = self.chars.next() else {
                tokens.push((usize::MAX, Token::Eof));
                return Ok(tokens);
            };

            let token = match ch {
                '(' => Token::LParen,
                ')' => Token::RParen,
                '=' => self.pair('=', Token::Eq).ok_or((pos, "expected '=='".to_string()))?,
                '&' => self.pair('&', Token::And).ok_or((pos, "expected '&&'".to_string()))?,
                '|' => self.pair('|', Token::Or).ok_or((pos, "expected '||'".to_string()))?,
                '!' => self.pair('=', Token::Ne).unwrap_or(Token::Not),
                '\'' => Token::String(self.read_string().ok_or((pos, "unterminated string".to_string()))?),
                c if c.is_ascii_alphanumeric() || c == '_' => self.read_identifier(c),
                c => return Err((pos, format!("unexpected character '{}'", c))),
            };
            tokens.push((pos, token));
        }
    }

    fn pair(&mut self, second: char, token: Token) -> Option<Token> {
        self.chars.next_if(|&(_, c)| c == second).map(|_| token)
    }

    /// Single-quoted string; `''` is an escaped quote
    fn read_string(&mut self) -> Option<String> {
        let mut value = String::new();
        loop {
            let (_, ch) = self.chars.next()?;
            if ch == '\'' {
                if self.chars.next_if(|&(_, c)| c == '\'').is_some() {
                    value.push('\'');
                } else {
                    return Some(value);
                }
            } else {
                value.push(ch);
            }
        }
    }

    /// Identifiers, dotted references and bare numbers
    fn read_identifier(&mut self, first: char) -> Token {
        let mut ident = String::from(first);
        while let Some((_, ch)) = self
            .chars
            .next_if(|&(_, c)| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            ident.push(ch);
        }

        match ident.as_str() {
            "true" => Token::True,
            "false" => Token::False,
            _ if ident.starts_with(|c: char| c.is_ascii_digit()) => Token::String(ident),
            _ => Token::Identifier(ident),
        }
    }
}

/// Operand of a comparison
enum Operand {
    Attribute(String),
    Literal(String),
}

/// Intermediate result: either a boolean condition or a bare operand
enum Node {
    Condition(Condition),
    Operand(Operand),
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn parse(mut self) -> Result<Condition, ExpressionError> {
        let node = self.parse_or()?;
        if self.peek() != &Token::Eof {
            return Err(self.error(format!("unexpected '{}'", self.peek())));
        }
        self.into_condition(node)
    }

    fn parse_or(&mut self) -> Result<Node, ExpressionError> {
        let first = self.parse_and()?;
        if self.peek() != &Token::Or {
            return Ok(first);
        }
        let mut items = vec![self.into_condition(first)?];
        while self.eat(&Token::Or) {
            let next = self.parse_and()?;
            items.push(self.into_condition(next)?);
        }
        Ok(Node::Condition(Condition::Any(items)))
    }

    fn parse_and(&mut self) -> Result<Node, ExpressionError> {
        let first = self.parse_unary()?;
        if self.peek() != &Token::And {
            return Ok(first);
        }
        let mut items = vec![self.into_condition(first)?];
        while self.eat(&Token::And) {
            let next = self.parse_unary()?;
            items.push(self.into_condition(next)?);
        }
        Ok(Node::Condition(Condition::All(items)))
    }

    fn parse_unary(&mut self) -> Result<Node, ExpressionError> {
        if self.eat(&Token::Not) {
            let inner = self.parse_unary()?;
            let condition = self.into_condition(inner)?;
            return Ok(Node::Condition(condition.negate()));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Node, ExpressionError> {
        let left = self.parse_primary()?;
        let negated = match self.peek() {
            Token::Eq => false,
            Token::Ne => true,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.parse_primary()?;

        let (Node::Operand(left), Node::Operand(right)) = (left, right) else {
            return Err(self.error("comparisons take a value on each side".to_string()));
        };

        let condition = match (left, right) {
            (Operand::Attribute(attribute), Operand::Literal(value))
            | (Operand::Literal(value), Operand::Attribute(attribute)) => {
                if negated {
                    Condition::not_equals(attribute, value)
                } else {
                    Condition::equals(attribute, value)
                }
            }
            (Operand::Literal(a), Operand::Literal(b)) => constant((a == b) != negated),
            (Operand::Attribute(_), Operand::Attribute(_)) => {
                return Err(self.error("cannot compare two references".to_string()))
            }
        };
        Ok(Node::Condition(condition))
    }

    fn parse_primary(&mut self) -> Result<Node, ExpressionError> {
        let token = self.peek().clone();
        self.pos += 1;
        match token {
            Token::True => Ok(Node::Condition(Condition::Always)),
            Token::False => Ok(Node::Condition(constant(false))),
            Token::String(value) => Ok(Node::Operand(Operand::Literal(value))),
            Token::LParen => {
                let node = self.parse_or()?;
                if !self.eat(&Token::RParen) {
                    return Err(self.error("expected ')'".to_string()));
                }
                Ok(node)
            }
            Token::Identifier(name) if self.peek() == &Token::LParen => {
                self.pos += 1;
                if !self.eat(&Token::RParen) {
                    return Err(self.error(format!("'{}()' takes no arguments", name)));
                }
                match name.as_str() {
                    // Steps only ever run while no earlier step has failed
                    "success" | "always" => Ok(Node::Condition(Condition::Always)),
                    _ => {
                        self.pos -= 3;
                        Err(self.error(format!("unsupported function '{}()'", name)))
                    }
                }
            }
            Token::Identifier(name) => {
                let attribute = if let Some(key) = name.strip_prefix("matrix.") {
                    key.to_string()
                } else if name == RUNNER_OS_ATTRIBUTE {
                    name
                } else {
                    self.pos -= 1;
                    return Err(self.error(format!("unsupported reference '{}'", name)));
                };
                Ok(Node::Operand(Operand::Attribute(attribute)))
            }
            other => {
                self.pos -= 1;
                Err(self.error(format!("unexpected '{}'", other)))
            }
        }
    }

    fn into_condition(&self, node: Node) -> Result<Condition, ExpressionError> {
        match node {
            Node::Condition(condition) => Ok(condition),
            Node::Operand(_) => Err(self.error("expected a comparison or boolean".to_string())),
        }
    }

    fn peek(&self) -> &Token {
        self.tokens
            .get(self.pos)
            .map(|(_, t)| t)
            .unwrap_or(&Token::Eof)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, message: String) -> ExpressionError {
        let position = self
            .tokens
            .get(self.pos)
            .map(|(p, _)| *p)
            .filter(|p| *p != usize::MAX)
            .unwrap_or(self.source.len());
        ExpressionError {
            expression: self.source.to_string(),
            message,
            position,
        }
    }
}

fn constant(value: bool) -> Condition {
    if value {
        Condition::Always
    } else {
        Condition::Always.negate()
    }
}

/// Compile an `if:` expression, with or without the `${{ }}` wrapper.
///
/// Supports `==`, `!=`, `&&`, `||`, `!`, parentheses, quoted strings,
/// `true`/`false`, `success()`/`always()` and references to `matrix.<key>`
/// and `runner.os`.
pub fn compile(expression: &str) -> Result<Condition, ExpressionError> {
    let trimmed = expression.trim();
    let source = trimmed
        .strip_prefix("${{")
        .and_then(|s| s.strip_suffix("}}"))
        .map(str::trim)
        .unwrap_or(trimmed);

    let tokens = Lexer::new(source)
        .tokenize()
        .map_err(|(position, message)| ExpressionError {
            expression: source.to_string(),
            message,
            position,
        })?;

    Parser {
        source,
        tokens,
        pos: 0,
    }
    .parse()
}

/// Resolve a `${{ matrix.<key> }}` placeholder against matrix values.
///
/// Returns `Ok(None)` when `value` is not a placeholder.
pub fn matrix_reference(value: &str) -> Result<Option<&str>, ExpressionError> {
    let trimmed = value.trim();
    let Some(inner) = trimmed
        .strip_prefix("${{")
        .and_then(|s| s.strip_suffix("}}"))
    else {
        return Ok(None);
    };
    let inner = inner.trim();
    match inner.strip_prefix("matrix.") {
        Some(key) if !key.is_empty() => Ok(Some(key)),
        _ => Err(ExpressionError {
            expression: inner.to_string(),
            message: "only matrix references are supported here".to_string(),
            position: 0,
        }),
    }
}
