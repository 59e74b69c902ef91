// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! A coarse JavaScript tokenizer
//!
//! Only as precise as needed to find call sites: it understands comments,
//! string, template and regular expression literals so that code inside
//! them is never mistaken for a call, and reports everything else as
//! identifiers or punctuation.

/// A byte range in the source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// Start byte offset (inclusive)
    pub start: usize,
    /// End byte offset (exclusive)
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// A token produced by the scanner
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Identifier or keyword
    Identifier(String),
    /// String literal with escapes decoded
    String(String),
    /// A template literal chunk
    Template,
    Number,
    RegExp,
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    Dot,
    /// `?.`
    QuestionDot,
    Comma,
    /// Any other punctuator
    Operator(char),
    /// Unterminated literal or comment
    Invalid(&'static str),
}

impl TokenKind {
    /// Whether a `/` after this token is division rather than a regex
    fn ends_expression(&self) -> bool {
        match self {
            TokenKind::Identifier(name) => !is_keyword_before_expression(name),
            TokenKind::String(_)
            | TokenKind::Template
            | TokenKind::Number
            | TokenKind::RegExp
            | TokenKind::RightParen
            | TokenKind::RightBracket => true,
            _ => false,
        }
    }
}

fn is_keyword_before_expression(name: &str) -> bool {
    matches!(
        name,
        "return"
            | "typeof"
            | "instanceof"
            | "in"
            | "of"
            | "new"
            | "delete"
            | "void"
            | "throw"
            | "case"
            | "do"
            | "else"
            | "yield"
            | "await"
    )
}

/// Tokenizer over a source string
pub struct Scanner<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    current_pos: usize,
    /// Open braces; `true` marks a template substitution `${`
    braces: Vec<bool>,
    previous_ends_expression: bool,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            current_pos: 0,
            braces: Vec::new(),
            previous_ends_expression: false,
        }
    }

    /// Next token, or `None` at end of input
    pub fn next_token(&mut self) -> Option<Token> {
        if let Err(message) = self.skip_whitespace_and_comments() {
            let start = self.current_pos;
            self.current_pos = self.source.len();
            while self.chars.next().is_some() {}
            return Some(Token {
                kind: TokenKind::Invalid(message),
                span: Span::new(start, self.source.len()),
            });
        }
        let start = self.current_pos;
        let (_, ch) = self.advance()?;

        let kind = match ch {
            '(' => TokenKind::LeftParen,
            ')' => TokenKind::RightParen,
            '[' => TokenKind::LeftBracket,
            ']' => TokenKind::RightBracket,
            '{' => {
                self.braces.push(false);
                TokenKind::LeftBrace
            }
            '}' => match self.braces.pop() {
                Some(true) => self.scan_template(),
                _ => TokenKind::RightBrace,
            },
            ',' => TokenKind::Comma,
            '.' if self.peek().is_some_and(|c| c.is_ascii_digit()) => self.scan_number(),
            '.' => TokenKind::Dot,
            '?' if self.peek() == Some('.') && !self.peek_next().is_some_and(|c| c.is_ascii_digit()) => {
                self.advance();
                TokenKind::QuestionDot
            }
            '"' | '\'' => self.scan_string(ch),
            '`' => self.scan_template(),
            '/' if !self.previous_ends_expression => self.scan_regex(),
            '0'..='9' => self.scan_number(),
            _ if is_id_start(ch) => self.scan_identifier(start),
            _ => TokenKind::Operator(ch),
        };

        self.previous_ends_expression = kind.ends_expression();
        Some(Token {
            kind,
            span: Span::new(start, self.current_pos),
        })
    }

    fn advance(&mut self) -> Option<(usize, char)> {
        let result = self.chars.next();
        if let Some((pos, ch)) = result {
            self.current_pos = pos + ch.len_utf8();
        }
        result
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, ch)| *ch)
    }

    fn peek_next(&self) -> Option<char> {
        let mut iter = self.chars.clone();
        iter.next();
        iter.next().map(|(_, ch)| ch)
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), &'static str> {
        if self.current_pos == 0 && self.source.starts_with("#!") {
            self.skip_line();
        }
        loop {
            match self.peek() {
                Some(ch) if ch.is_whitespace() => {
                    self.advance();
                }
                Some('/') => match self.peek_next() {
                    Some('/') => self.skip_line(),
                    Some('*') => {
                        self.advance();
                        self.advance();
                        loop {
                            match self.advance() {
                                None => return Err("unterminated comment"),
                                Some((_, '*')) if self.peek() == Some('/') => {
                                    self.advance();
                                    break;
                                }
                                Some(_) => {}
                            }
                        }
                    }
                    _ => return Ok(()),
                },
                _ => return Ok(()),
            }
        }
    }

    fn skip_line(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == '\n' || ch == '\r' {
                break;
            }
            self.advance();
        }
    }

    fn scan_string(&mut self, quote: char) -> TokenKind {
        let mut value = String::new();
        loop {
            match self.advance() {
                None | Some((_, '\n')) => return TokenKind::Invalid("unterminated string"),
                Some((_, ch)) if ch == quote => break,
                Some((_, '\\')) => match self.advance() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 'r')) => value.push('\r'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, '0')) => value.push('\0'),
                    Some((_, '\n')) => {}
                    Some((_, escaped)) => value.push(escaped),
                    None => return TokenKind::Invalid("unterminated string"),
                },
                Some((_, ch)) => value.push(ch),
            }
        }
        TokenKind::String(value)
    }

    fn scan_template(&mut self) -> TokenKind {
        loop {
            match self.advance() {
                None => return TokenKind::Invalid("unterminated template"),
                Some((_, '`')) => return TokenKind::Template,
                Some((_, '\\')) => {
                    self.advance();
                }
                Some((_, '$')) if self.peek() == Some('{') => {
                    self.advance();
                    self.braces.push(true);
                    return TokenKind::Template;
                }
                Some(_) => {}
            }
        }
    }

    fn scan_regex(&mut self) -> TokenKind {
        let mut in_class = false;
        loop {
            match self.advance() {
                None | Some((_, '\n')) => return TokenKind::Invalid("unterminated regular expression"),
                Some((_, '\\')) => {
                    self.advance();
                }
                Some((_, '[')) => in_class = true,
                Some((_, ']')) => in_class = false,
                Some((_, '/')) if !in_class => break,
                Some(_) => {}
            }
        }
        while self.peek().is_some_and(is_id_continue) {
            self.advance();
        }
        TokenKind::RegExp
    }

    fn scan_number(&mut self) -> TokenKind {
        while let Some(ch) = self.peek() {
            let exponent_sign = (ch == '+' || ch == '-')
                && self.source[..self.current_pos].ends_with(['e', 'E'])
                && !self.source[..self.current_pos].starts_with("0x");
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == '.' || exponent_sign {
                self.advance();
            } else {
                break;
            }
        }
        TokenKind::Number
    }

    fn scan_identifier(&mut self, start: usize) -> TokenKind {
        while self.peek().is_some_and(is_id_continue) {
            self.advance();
        }
        TokenKind::Identifier(self.source[start..self.current_pos].to_string())
    }
}

/// Checks if a character can start an identifier.
fn is_id_start(ch: char) -> bool {
    ch == '_' || ch == '$' || unicode_xid::UnicodeXID::is_xid_start(ch)
}

/// Checks if a character can continue an identifier.
fn is_id_continue(ch: char) -> bool {
    ch == '_' || ch == '$' || unicode_xid::UnicodeXID::is_xid_continue(ch)
}

impl Iterator for Scanner<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Scanner::new(source).map(|token| token.kind).collect()
    }

    #[test]
    fn test_call_tokens() {
        assert_eq!(
            kinds("require('./a.js')"),
            vec![
                TokenKind::Identifier("require".into()),
                TokenKind::LeftParen,
                TokenKind::String("./a.js".into()),
                TokenKind::RightParen,
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            kinds("a // require('x')\n/* require('y') */ b"),
            vec![TokenKind::Identifier("a".into()), TokenKind::Identifier("b".into())]
        );
    }

    #[test]
    fn test_template_substitutions() {
        assert_eq!(
            kinds("`a ${ f({}) } b`"),
            vec![
                TokenKind::Template,
                TokenKind::Identifier("f".into()),
                TokenKind::LeftParen,
                TokenKind::LeftBrace,
                TokenKind::RightBrace,
                TokenKind::RightParen,
                TokenKind::Template,
            ]
        );
    }

    #[test]
    fn test_division_vs_regex() {
        assert_eq!(
            kinds("x / 2 / y"),
            vec![
                TokenKind::Identifier("x".into()),
                TokenKind::Operator('/'),
                TokenKind::Number,
                TokenKind::Operator('/'),
                TokenKind::Identifier("y".into()),
            ]
        );
        assert_eq!(
            kinds("return /require('x')/g"),
            vec![TokenKind::Identifier("return".into()), TokenKind::RegExp]
        );
        assert_eq!(kinds("(/[/]/)").len(), 3);
    }

    #[test]
    fn test_hashbang_line_is_skipped() {
        assert_eq!(
            kinds("#!/usr/bin/env node\nrun"),
            vec![TokenKind::Identifier("run".into())]
        );
        assert_eq!(kinds("a\n#!b").len(), 4);
    }

    #[test]
    fn test_unterminated_literals() {
        assert!(matches!(kinds("'abc").last(), Some(TokenKind::Invalid(_))));
        assert!(matches!(kinds("`abc").last(), Some(TokenKind::Invalid(_))));
        assert!(matches!(kinds("/* abc").last(), Some(TokenKind::Invalid(_))));
    }

    #[test]
    fn test_numbers_and_optional_chaining() {
        assert_eq!(
            kinds("a?.b 1e+5 .5"),
            vec![
                TokenKind::Identifier("a".into()),
                TokenKind::QuestionDot,
                TokenKind::Identifier("b".into()),
                TokenKind::Number,
                TokenKind::Number,
            ]
        );
    }
}
