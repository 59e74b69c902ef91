// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! `require("literal")` call-site rewriting
//!
//! Remote code is written against its own origin: `require("./util.js")`
//! means a file next to it on the server. Before such code runs locally every
//! literal call whose argument is not a native module is redirected to the
//! loader with the argument replaced by the absolute URL it denotes.

mod scanner;

pub use scanner::{Scanner, Span, Token, TokenKind};

use crate::error::{ModuleError, Result};

/// Output of [`rewrite_requires`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewritten {
    pub code: String,
    /// Rewritten targets in first-seen order, without duplicates
    pub requires: Vec<String>,
}

/// A `require("...")` call site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequireCall {
    /// The literal argument, escapes decoded
    pub specifier: String,
    pub callee: Span,
    pub argument: Span,
}

/// Find every `require("literal")` call in `code`
///
/// Member calls (`x.require("a")`, `x?.require("a")`) and declarations of
/// a function named `require` are not calls of the global and are skipped.
pub fn find_require_calls(id: &str, code: &str) -> Result<Vec<RequireCall>> {
    let tokens = tokenize(id, code)?;
    let mut calls = Vec::new();
    for (index, window) in tokens.windows(4).enumerate() {
        let [callee, open, argument, close] = window else {
            continue;
        };
        let (TokenKind::Identifier(name), TokenKind::LeftParen, TokenKind::String(specifier), TokenKind::RightParen) =
            (&callee.kind, &open.kind, &argument.kind, &close.kind)
        else {
            continue;
        };
        if name != "require" {
            continue;
        }
        let member_or_declaration = index
            .checked_sub(1)
            .map(|previous| &tokens[previous].kind)
            .is_some_and(|kind| match kind {
                TokenKind::Dot | TokenKind::QuestionDot => true,
                TokenKind::Identifier(keyword) => keyword == "function",
                _ => false,
            });
        if member_or_declaration {
            continue;
        }
        calls.push(RequireCall {
            specifier: specifier.clone(),
            callee: callee.span,
            argument: argument.span,
        });
    }
    Ok(calls)
}

/// Check that `code` can run as a CommonJS function body
///
/// Hashbangs and top-level `return` are accepted. Top-level `import` and
/// `export` declarations and top-level `await` are module syntax and are
/// rejected; `import(...)` and `import.meta` are expressions and pass.
pub fn check_script(id: &str, code: &str) -> Result<()> {
    let tokens = tokenize(id, code)?;
    let mut depth = 0usize;
    // an arrow body without braces sits at depth 0 but is not top level
    let mut in_arrow = false;

    for (index, token) in tokens.iter().enumerate() {
        let previous = index.checked_sub(1).map(|previous| &tokens[previous]);
        let next = tokens.get(index + 1).map(|next| &next.kind);
        match &token.kind {
            TokenKind::LeftBrace => depth += 1,
            TokenKind::RightBrace => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    in_arrow = false;
                }
            }
            TokenKind::Operator(';') if depth == 0 => in_arrow = false,
            TokenKind::Operator('>') => {
                let arrow = previous.is_some_and(|previous| {
                    previous.kind == TokenKind::Operator('=') && previous.span.end == token.span.start
                });
                if arrow && depth == 0 {
                    in_arrow = true;
                }
            }
            TokenKind::Identifier(name) if depth == 0 => {
                let member = previous.is_some_and(|previous| {
                    matches!(previous.kind, TokenKind::Dot | TokenKind::QuestionDot)
                });
                if member {
                    continue;
                }
                let module_syntax = match name.as_str() {
                    "export" => true,
                    "import" => !matches!(next, Some(TokenKind::LeftParen | TokenKind::Dot)),
                    "await" => !in_arrow,
                    _ => false,
                };
                if module_syntax {
                    return Err(ModuleError::syntax(
                        id,
                        format!("`{name}` at offset {} is only valid in a module", token.span.start),
                    ));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn tokenize(id: &str, code: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    for token in Scanner::new(code) {
        if let TokenKind::Invalid(message) = token.kind {
            return Err(ModuleError::syntax(
                id,
                format!("{message} at offset {}", token.span.start),
            ));
        }
        tokens.push(token);
    }
    Ok(tokens)
}

/// Rewrite `require("literal")` calls of `code`
///
/// `resolve` maps a literal to its replacement target, or `None` to leave the
/// call untouched. Rewritten calls invoke `callee` with the target as a JSON
/// string literal.
pub fn rewrite_requires<F>(id: &str, code: &str, callee: &str, mut resolve: F) -> Result<Rewritten>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut edits: Vec<(Span, String)> = Vec::new();
    let mut requires: Vec<String> = Vec::new();

    for call in find_require_calls(id, code)? {
        let Some(target) = resolve(&call.specifier) else {
            continue;
        };
        let literal = serde_json::to_string(&target)?;
        edits.push((call.callee, callee.to_string()));
        edits.push((call.argument, literal));
        if !requires.contains(&target) {
            requires.push(target);
        }
    }

    let mut rewritten = String::with_capacity(code.len());
    let mut last = 0;
    for (span, replacement) in edits {
        rewritten.push_str(&code[last..span.start]);
        rewritten.push_str(&replacement);
        last = span.end;
    }
    rewritten.push_str(&code[last..]);

    Ok(Rewritten {
        code: rewritten,
        requires,
    })
}
