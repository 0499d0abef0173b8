use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Ident(String),
    Int(i64),
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    LParen,
    RParen,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Ident(name) => write!(f, "identifier '{name}'"),
            TokenKind::Int(value) => write!(f, "integer {value}"),
            TokenKind::Eq => f.write_str("'=='"),
            TokenKind::Ne => f.write_str("'!='"),
            TokenKind::Lt => f.write_str("'<'"),
            TokenKind::Le => f.write_str("'<='"),
            TokenKind::Gt => f.write_str("'>'"),
            TokenKind::Ge => f.write_str("'>='"),
            TokenKind::And => f.write_str("'&&'"),
            TokenKind::Or => f.write_str("'||'"),
            TokenKind::Not => f.write_str("'!'"),
            TokenKind::LParen => f.write_str("'('"),
            TokenKind::RParen => f.write_str("')'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the first character.
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at position {position}")]
pub struct LexError {
    pub position: usize,
    pub message: String,
}

/// Lazy token stream over a condition source.
///
/// Cloning yields an independent cursor at the same offset, so a fresh
/// `Lexer::new` or a clone restarts scanning without re-allocating. The
/// stream ends after the first error.
#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
    failed: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            failed: false,
        }
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    fn next_if_char(&mut self, expected: char) -> bool {
        self.chars.next_if(|&(_, c)| c == expected).is_some()
    }

    fn identifier(&mut self, start: usize) -> TokenKind {
        let mut end = start + 1;
        while let Some((offset, c)) = self.chars.next_if(|&(_, c)| c.is_ascii_alphanumeric() || c == '_') {
            end = offset + c.len_utf8();
        }
        TokenKind::Ident(self.source[start..end].to_string())
    }

    fn integer(&mut self, start: usize) -> Result<TokenKind, LexError> {
        let mut end = start + 1;
        while let Some((offset, c)) = self.chars.next_if(|&(_, c)| c.is_ascii_digit()) {
            end = offset + c.len_utf8();
        }
        let literal = &self.source[start..end];
        literal
            .parse::<i64>()
            .map(TokenKind::Int)
            .map_err(|_| LexError {
                position: start,
                message: format!("integer literal '{literal}' out of range"),
            })
    }

    fn scan(&mut self, position: usize, c: char) -> Result<TokenKind, LexError> {
        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '=' if self.next_if_char('=') => TokenKind::Eq,
            '!' if self.next_if_char('=') => TokenKind::Ne,
            '!' => TokenKind::Not,
            '<' if self.next_if_char('=') => TokenKind::Le,
            '<' => TokenKind::Lt,
            '>' if self.next_if_char('=') => TokenKind::Ge,
            '>' => TokenKind::Gt,
            '&' if self.next_if_char('&') => TokenKind::And,
            '|' if self.next_if_char('|') => TokenKind::Or,
            c if c.is_ascii_alphabetic() || c == '_' => self.identifier(position),
            c if c.is_ascii_digit() => self.integer(position)?,
            '=' | '&' | '|' => {
                return Err(LexError {
                    position,
                    message: format!("incomplete operator '{c}'"),
                })
            }
            other => {
                return Err(LexError {
                    position,
                    message: format!("unexpected character '{other}'"),
                })
            }
        };
        Ok(kind)
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        while self.chars.next_if(|&(_, c)| c.is_whitespace()).is_some() {}

        let (position, c) = self.chars.next()?;
        match self.scan(position, c) {
            Ok(kind) => Some(Ok(Token { kind, position })),
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .map(|token| token.unwrap().kind)
            .collect()
    }

    #[test]
    fn test_operators_and_whitespace() {
        assert_eq!(
            kinds(" a==1 && !( b_2 != 30 ) || c<=4 "),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Eq,
                TokenKind::Int(1),
                TokenKind::And,
                TokenKind::Not,
                TokenKind::LParen,
                TokenKind::Ident("b_2".into()),
                TokenKind::Ne,
                TokenKind::Int(30),
                TokenKind::RParen,
                TokenKind::Or,
                TokenKind::Ident("c".into()),
                TokenKind::Le,
                TokenKind::Int(4),
            ]
        );
        assert_eq!(
            kinds("x<1 y>2 z>=3"),
            vec![
                TokenKind::Ident("x".into()),
                TokenKind::Lt,
                TokenKind::Int(1),
                TokenKind::Ident("y".into()),
                TokenKind::Gt,
                TokenKind::Int(2),
                TokenKind::Ident("z".into()),
                TokenKind::Ge,
                TokenKind::Int(3),
            ]
        );
    }

    #[test]
    fn test_positions_are_byte_offsets() {
        let positions: Vec<usize> = Lexer::new("cpu >= 4")
            .map(|token| token.unwrap().position)
            .collect();
        assert_eq!(positions, vec![0, 4, 7]);
    }

    #[test]
    fn test_unknown_character_reports_position() {
        let mut lexer = Lexer::new("cpu @ 4");
        assert!(lexer.next().unwrap().is_ok());
        let err = lexer.next().unwrap().unwrap_err();
        assert_eq!(err.position, 4);
        assert!(err.message.contains('@'));
        // fused after an error
        assert!(lexer.next().is_none());
    }

    #[test]
    fn test_single_equals_and_ampersand_are_errors() {
        let err = Lexer::new("a = 1").nth(1).unwrap().unwrap_err();
        assert_eq!(err.position, 2);
        let err = Lexer::new("a == 1 & b == 2").nth(3).unwrap().unwrap_err();
        assert_eq!(err.position, 7);
    }

    #[test]
    fn test_integer_overflow() {
        let err = Lexer::new("mem > 99999999999999999999").nth(2).unwrap().unwrap_err();
        assert_eq!(err.position, 6);
        assert!(err.message.contains("out of range"));
    }

    #[test]
    fn test_clone_restarts_independently() {
        let lexer = Lexer::new("a == 1");
        let mut first = lexer.clone();
        first.next();
        assert_eq!(lexer.count(), 3);
        assert_eq!(first.count(), 2);
    }
}
