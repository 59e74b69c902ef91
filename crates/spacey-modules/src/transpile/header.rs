// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Per-file transpilation header
//!
//! A module may declare its language and compiler options in a JSON
//! comment on its first line:
//!
//! ```text
//! // {"language": "TypeScript", "compilerOptions": {"strict": true}}
//! ```
//!
//! Markdown files declare the same object under the `module` key of their
//! front matter.

use serde_json::{Map, Value as Json};
use tracing::debug;

/// Language and compiler options declared by a module
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentHeader {
    pub language: Option<String>,
    pub compiler_options: Option<Map<String, Json>>,
}

impl ContentHeader {
    /// Build a header from loosely typed JSON, ignoring fields of the wrong type
    pub fn fix(value: &Json) -> Self {
        let Some(object) = value.as_object() else {
            return Self::default();
        };
        Self {
            language: object.get("language").and_then(Json::as_str).map(String::from),
            compiler_options: object.get("compilerOptions").and_then(Json::as_object).cloned(),
        }
    }

    /// Parse the header comment on the first non-blank line of `content`
    pub fn parse(content: &str) -> Self {
        let first = content.trim_start().lines().next().unwrap_or("");
        let Some(json) = first.strip_prefix("//") else {
            return Self::default();
        };
        match serde_json::from_str::<Json>(json) {
            Ok(value) => Self::fix(&value),
            Err(e) => {
                debug!("ignoring malformed content header: {e}");
                Self::default()
            }
        }
    }

    /// Header declared in a Markdown file's front matter
    pub fn from_front_matter(content: &str) -> Self {
        let Some(yaml) = front_matter(content) else {
            return Self::default();
        };
        match serde_yaml::from_str::<Json>(yaml) {
            Ok(value) => value.get("module").map(Self::fix).unwrap_or_default(),
            Err(e) => {
                debug!("ignoring malformed front matter: {e}");
                Self::default()
            }
        }
    }

    /// Whether the header asks for TypeScript compilation
    pub fn is_typescript(&self) -> bool {
        self.language.as_deref() == Some("TypeScript")
    }
}

/// YAML between a leading `---` line and the next `---` line
fn front_matter(content: &str) -> Option<&str> {
    let rest = content
        .strip_prefix("---\r\n")
        .or_else(|| content.strip_prefix("---\n"))?;
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == "---" {
            return Some(&rest[..offset]);
        }
        offset += line.len();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header_line() {
        let header = ContentHeader::parse(
            "\n  // {\"language\": \"TypeScript\", \"compilerOptions\": {\"strict\": true}}\nlet x = 1",
        );
        assert!(header.is_typescript());
        assert_eq!(
            header.compiler_options.unwrap().get("strict"),
            Some(&Json::Bool(true))
        );
    }

    #[test]
    fn test_parse_without_header() {
        assert_eq!(ContentHeader::parse("let x = 1\n// {\"language\": \"TypeScript\"}"), ContentHeader::default());
        assert_eq!(ContentHeader::parse("// not json"), ContentHeader::default());
    }

    #[test]
    fn test_fix_ignores_wrong_types() {
        let header = ContentHeader::fix(&serde_json::json!({"language": 3, "compilerOptions": "x"}));
        assert_eq!(header, ContentHeader::default());
    }

    #[test]
    fn test_front_matter_header() {
        let content = "---\ntags: [x]\nmodule:\n  language: TypeScript\n---\n# Title\n";
        assert!(ContentHeader::from_front_matter(content).is_typescript());
        assert_eq!(ContentHeader::from_front_matter("# no front matter"), ContentHeader::default());
        assert_eq!(ContentHeader::from_front_matter("---\nmodule: [\n---\n"), ContentHeader::default());
    }
}
