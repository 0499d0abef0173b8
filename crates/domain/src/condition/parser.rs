use thiserror::Error;

use super::ast::{CompareOp, Expr};
use super::lexer::{LexError, Lexer, Token, TokenKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("expected {expected}, found {found} at position {position}")]
    UnexpectedToken {
        expected: &'static str,
        found: String,
        position: usize,
    },

    #[error("expected {expected}, found end of input")]
    UnexpectedEnd { expected: &'static str },

    #[error("nesting deeper than {} at position {position}", MAX_DEPTH)]
    TooDeep { position: usize },

    #[error("more than {} operators and comparisons at position {position}", MAX_NODES)]
    TooLarge { position: usize },
}

/// Limits on `(` and `!` nesting and on tree size. Evaluation and teardown
/// recurse over the tree, so both bound stack use.
pub const MAX_DEPTH: usize = 64;
pub const MAX_NODES: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Recursive-descent parser, lowest precedence first:
///
/// ```text
/// or  := and ('||' and)*
/// and := not ('&&' not)*
/// not := '!' not | cmp
/// cmp := identifier op integer | '(' or ')'
/// ```
pub struct Parser {
    tokens: Vec<Token>,
    cursor: usize,
    depth: usize,
    nodes: usize,
}

impl Parser {
    pub fn parse(source: &str) -> Result<Expr, ConditionError> {
        let tokens = Lexer::new(source).collect::<Result<Vec<_>, _>>()?;
        let mut parser = Parser {
            tokens,
            cursor: 0,
            depth: 0,
            nodes: 0,
        };

        let expr = parser.or()?;
        if let Some(token) = parser.peek() {
            return Err(ParseError::UnexpectedToken {
                expected: "end of input",
                found: token.kind.to_string(),
                position: token.position,
            }
            .into());
        }
        Ok(expr)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.cursor).cloned();
        if token.is_some() {
            self.cursor += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek().is_some_and(|token| &token.kind == kind) {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    fn expect_next(&mut self, expected: &'static str) -> Result<Token, ParseError> {
        self.advance().ok_or(ParseError::UnexpectedEnd { expected })
    }

    /// Position of the last consumed token.
    fn position(&self) -> usize {
        self.cursor
            .checked_sub(1)
            .and_then(|index| self.tokens.get(index))
            .map_or(0, |token| token.position)
    }

    fn node(&mut self, expr: Expr) -> Result<Expr, ParseError> {
        self.nodes += 1;
        if self.nodes > MAX_NODES {
            return Err(ParseError::TooLarge {
                position: self.position(),
            });
        }
        Ok(expr)
    }

    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.depth >= MAX_DEPTH {
            return Err(ParseError::TooDeep {
                position: self.position(),
            });
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.and()?;
        while self.eat(&TokenKind::Or) {
            let right = self.and()?;
            left = self.node(Expr::Or(Box::new(left), Box::new(right)))?;
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.not()?;
        while self.eat(&TokenKind::And) {
            let right = self.not()?;
            left = self.node(Expr::And(Box::new(left), Box::new(right)))?;
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&TokenKind::Not) {
            let inner = self.nested(Self::not)?;
            return self.node(Expr::Not(Box::new(inner)));
        }
        self.cmp()
    }

    fn cmp(&mut self) -> Result<Expr, ParseError> {
        let token = self.expect_next("identifier or '('")?;
        let ident = match token.kind {
            TokenKind::LParen => {
                let inner = self.nested(Self::or)?;
                let close = self.expect_next("')'")?;
                if close.kind != TokenKind::RParen {
                    return Err(unexpected("')'", close));
                }
                return Ok(inner);
            }
            TokenKind::Ident(name) => name,
            _ => return Err(unexpected("identifier or '('", token)),
        };

        let token = self.expect_next("comparison operator")?;
        let op = match token.kind {
            TokenKind::Eq => CompareOp::Eq,
            TokenKind::Ne => CompareOp::Ne,
            TokenKind::Lt => CompareOp::Lt,
            TokenKind::Le => CompareOp::Le,
            TokenKind::Gt => CompareOp::Gt,
            TokenKind::Ge => CompareOp::Ge,
            _ => return Err(unexpected("comparison operator", token)),
        };

        let token = self.expect_next("integer")?;
        let TokenKind::Int(value) = token.kind else {
            return Err(unexpected("integer", token));
        };

        self.node(Expr::Compare { ident, op, value })
    }
}

fn unexpected(expected: &'static str, token: Token) -> ParseError {
    ParseError::UnexpectedToken {
        expected,
        found: token.kind.to_string(),
        position: token.position,
    }
}
