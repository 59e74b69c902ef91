// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Markdown link and wikilink parsers
//!
//! Both parsers accept a specifier only when the whole string is a single
//! link; anything trailing the closing delimiter rejects it.

/// A parsed `[display](path "title")` link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownLink {
    /// Link text with escapes removed
    pub display: String,
    /// Percent-decoded destination
    pub path: String,
    /// Raw title without its quotes, empty when absent
    pub title: String,
    /// Number of bytes consumed, including a leading `!`
    pub read: usize,
}

/// A parsed `[[path|display]]` wikilink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wikilink {
    pub path: String,
    /// Defaults to the path unless a `|` separator is present
    pub display: String,
}

const ESCAPER: char = '\\';

/// Scan one bracketed component starting at the opening delimiter
///
/// Returns the component text with escapes and the outermost delimiters
/// removed, and the number of bytes consumed.
fn parse_component(input: &str, open: char, close: char) -> Option<(String, usize)> {
    let mut text = String::new();
    let mut read = 0;
    let mut level = 0i32;
    let mut escaping = false;
    for ch in input.chars() {
        read += ch.len_utf8();
        if escaping {
            text.push(ch);
            escaping = false;
            continue;
        }
        if ch == ESCAPER {
            escaping = true;
        } else if ch == open {
            if level > 0 {
                text.push(ch);
            }
            level += 1;
        } else if ch == close {
            level -= 1;
            if level > 0 {
                text.push(ch);
            }
        } else {
            text.push(ch);
        }
        if level <= 0 {
            break;
        }
    }
    let first = input.chars().next().map_or(1, char::len_utf8);
    if level > 0 || read <= first {
        return None;
    }
    Some((text, read))
}

/// Whether `text` is `"..."` where every inner quote is escaped
fn parse_title(text: &str) -> Option<&str> {
    let inner = text.strip_prefix('"')?.strip_suffix('"')?;
    let mut previous = None;
    for ch in inner.chars() {
        if ch == '"' && previous != Some('\\') {
            return None;
        }
        previous = Some(ch);
    }
    Some(inner)
}

/// Parse a Markdown link, optionally prefixed with `!`
pub fn parse_markdown_link(link: &str) -> Option<MarkdownLink> {
    let (bang, body) = match link.strip_prefix('!') {
        Some(body) => (1, body),
        None => (0, link),
    };
    let (display, read) = parse_component(body, '[', ']')?;
    let rest = &body[read..];
    let (target, target_read) = parse_component(rest, '(', ')')?;
    if target_read != rest.len() {
        return None;
    }

    let (raw_path, title) = match target.find(' ') {
        Some(index) => {
            let title = parse_title(target[index..].trim_start_matches(' '))?;
            (&target[..index], title)
        }
        None => (target.as_str(), ""),
    };
    let path = urlencoding::decode(raw_path).ok()?.into_owned();

    Some(MarkdownLink {
        display,
        path,
        title: title.to_string(),
        read: bang + read + target_read,
    })
}

/// Parse a wikilink, optionally prefixed with `!`
///
/// The path runs to the first `|`. The display text after it may not
/// span lines or contain `]]`.
pub fn parse_wikilink(link: &str) -> Option<Wikilink> {
    let body = link.strip_prefix('!').unwrap_or(link);
    let inner = body.strip_prefix("[[")?.strip_suffix("]]")?;
    let (path, display) = match inner.split_once('|') {
        Some((path, display)) => {
            if display.contains("]]") || display.contains(['\n', '\r']) {
                return None;
            }
            (path, display.to_string())
        }
        None => (inner, inner.to_string()),
    };
    if path.is_empty() {
        return None;
    }
    Some(Wikilink {
        path: path.to_string(),
        display,
    })
}

/// Link path without a `#heading` or `#^block` subpath
pub fn link_path(path: &str) -> &str {
    path.split('#').next().unwrap_or(path)
}
