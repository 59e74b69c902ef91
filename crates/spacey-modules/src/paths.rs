// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Vault path helpers
//!
//! Vault paths are `/`-separated and relative to the vault root; they never
//! start or end with a separator.

/// Normalize separators: backslashes become `/`, runs of `/` collapse and
/// leading or trailing separators are dropped
pub fn normalize_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len());
    for segment in path.split(['/', '\\']).filter(|segment| !segment.is_empty()) {
        if !normalized.is_empty() {
            normalized.push('/');
        }
        normalized.push_str(segment);
    }
    normalized
}

/// Normalize a path and fold its `.` and `..` segments
///
/// `..` at the root is discarded, so the result never escapes the vault.
pub fn parse_path(path: &str) -> String {
    let normalized = normalize_path(path);
    let mut segments: Vec<&str> = Vec::new();
    for segment in normalized.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }
    segments.join("/")
}

/// Directory containing `path`: every segment but the last
pub fn working_directory(path: &str) -> String {
    let parsed = parse_path(path);
    match parsed.rfind('/') {
        Some(index) => parsed[..index].to_string(),
        None => String::new(),
    }
}

/// Final segment of a path
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Extension of the final segment, without the dot
pub fn extension(path: &str) -> &str {
    let name = file_name(path);
    match name.rfind('.') {
        Some(index) if index > 0 => &name[index + 1..],
        _ => "",
    }
}

/// Final segment without its extension
pub fn basename(path: &str) -> &str {
    let name = file_name(path);
    match name.rfind('.') {
        Some(index) if index > 0 => &name[..index],
        _ => name,
    }
}
