// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Include/exclude rules deciding which vault files are preloaded
//!
//! Each rule is `+` (include) or `-` (exclude) followed by either a
//! `/regex/flags` literal or a glob pattern. Rules are evaluated in order
//! and the last matching rule wins; a path no rule matches is excluded.

use crate::error::{ModuleError, Result};
use regex::{Regex, RegexBuilder};

#[derive(Debug, Clone)]
enum Matcher {
    Regex(Regex),
    Glob(glob::Pattern),
}

impl Matcher {
    fn is_match(&self, path: &str) -> bool {
        match self {
            Matcher::Regex(regex) => regex.is_match(path),
            Matcher::Glob(pattern) => pattern.matches(path),
        }
    }
}

#[derive(Debug, Clone)]
struct PathRule {
    include: bool,
    matcher: Matcher,
}

/// Ordered include/exclude path rules
#[derive(Debug, Clone, Default)]
pub struct PathRules {
    rules: Vec<PathRule>,
}

impl PathRules {
    /// Parse a rule list
    pub fn parse<S: AsRef<str>>(rules: &[S]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| parse_rule(rule.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Whether `path` is selected by the rules
    pub fn test(&self, path: &str) -> bool {
        self.rules
            .iter()
            .rev()
            .find(|rule| rule.matcher.is_match(path))
            .is_some_and(|rule| rule.include)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn parse_rule(rule: &str) -> Result<PathRule> {
    let (include, body) = match rule.chars().next() {
        Some('+') => (true, &rule[1..]),
        Some('-') => (false, &rule[1..]),
        _ => (true, rule),
    };
    let matcher = match parse_regex_literal(body) {
        Some((source, flags)) => Matcher::Regex(build_regex(source, flags)?),
        None => Matcher::Glob(
            glob::Pattern::new(body)
                .map_err(|e| ModuleError::Config(format!("invalid glob rule '{rule}': {e}")))?,
        ),
    };
    Ok(PathRule { include, matcher })
}

fn parse_regex_literal(body: &str) -> Option<(&str, &str)> {
    let rest = body.strip_prefix('/')?;
    let end = rest.rfind('/')?;
    Some((&rest[..end], &rest[end + 1..]))
}

fn build_regex(source: &str, flags: &str) -> Result<Regex> {
    let mut builder = RegexBuilder::new(source);
    for flag in flags.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            // Patterns are always Unicode-aware; global and sticky have no meaning here
            'u' | 'g' | 'y' => {}
            other => {
                return Err(ModuleError::Config(format!(
                    "unsupported regex flag '{other}' in /{source}/{flags}"
                )));
            }
        }
    }
    builder
        .build()
        .map_err(|e| ModuleError::Config(format!("invalid regex rule /{source}/{flags}: {e}")))
}
