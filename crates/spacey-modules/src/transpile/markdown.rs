// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Markdown transpilation
//!
//! Every line of a `.md` file is commented out except the bodies of fenced
//! code blocks whose language is in the configured list. Line numbers are
//! preserved, so positions in the output map back to the note.

use super::{ContentHeader, Source, Transpile, TypeScriptTranspile};
use crate::error::Result;
use crate::events::EventEmitter;
use crate::file_cache::IdentityToken;
use crate::paths;
use crate::settings::SharedSettings;
use async_trait::async_trait;
use std::sync::Arc;

/// Extracts code blocks from Markdown notes
pub struct MarkdownTranspile {
    settings: SharedSettings,
    typescript: Arc<TypeScriptTranspile>,
    on_invalidate: EventEmitter<()>,
}

impl MarkdownTranspile {
    pub fn new(settings: SharedSettings, typescript: Arc<TypeScriptTranspile>) -> Self {
        Self {
            settings,
            typescript,
            on_invalidate: EventEmitter::new(),
        }
    }

    /// Signal that the configured code block languages changed
    pub fn languages_changed(&self) {
        self.on_invalidate.emit(&());
    }

    fn header(source: &Source) -> ContentHeader {
        let mut header = ContentHeader::from_front_matter(&source.content);
        let basename = source.path.as_deref().map(paths::basename).unwrap_or("");
        if header.language.is_none() && (basename.ends_with(".ts") || basename.ends_with(".mts")) {
            header.language = Some("TypeScript".to_string());
        }
        header
    }

    /// Comment out prose and keep selected code block bodies
    pub fn transpile_markdown(&self, content: &str) -> String {
        let settings = self.settings.read();
        let mut out: Vec<String> = Vec::new();
        let mut delimiter: Option<&str> = None;
        let mut code = false;
        for line in split_lines(content) {
            if let Some(open) = delimiter {
                if line.starts_with(open) {
                    out.push(format!("// {line}"));
                    delimiter = None;
                    code = false;
                } else if code {
                    out.push(line.to_string());
                } else {
                    out.push(format!("// {line}"));
                }
                continue;
            }
            out.push(format!("// {line}"));
            if let Some((fence, language)) = parse_fence(line) {
                delimiter = Some(fence);
                code = settings.loads_code_block_language(language);
            }
        }
        out.join("\n")
    }
}

/// Split on `\r\n`, `\n` or `\r`
fn split_lines(content: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut start = 0;
    let bytes = content.as_bytes();
    let mut index = 0;
    while index < bytes.len() {
        match bytes[index] {
            b'\n' => {
                lines.push(&content[start..index]);
                start = index + 1;
            }
            b'\r' => {
                lines.push(&content[start..index]);
                if bytes.get(index + 1) == Some(&b'\n') {
                    index += 1;
                }
                start = index + 1;
            }
            _ => {}
        }
        index += 1;
    }
    lines.push(&content[start..]);
    lines
}

/// Opening fence: a run of at least three backticks or tildes, then the language
fn parse_fence(line: &str) -> Option<(&str, &str)> {
    let run = line.find(|c| c != '`' && c != '~').unwrap_or(line.len());
    (run >= 3).then(|| (&line[..run], &line[run..]))
}

#[async_trait]
impl Transpile for MarkdownTranspile {
    fn on_invalidate(&self) -> &EventEmitter<()> {
        &self.on_invalidate
    }

    fn transpile(&self, source: &Source) -> Result<Option<String>> {
        if source.extension() != "md" {
            return Ok(None);
        }
        let code = self.transpile_markdown(&source.content);
        let header = Self::header(source);
        let compiled = self
            .typescript
            .transpile_with_header(&source.with_content(code.as_str()), Some(&header))?;
        Ok(Some(compiled.unwrap_or(code)))
    }

    async fn atranspile(&self, source: &Source) -> Result<Option<String>> {
        if source.extension() != "md" {
            return Ok(None);
        }
        let code = self.transpile_markdown(&source.content);
        let header = Self::header(source);
        let compiled = self
            .typescript
            .atranspile_with_header(&source.with_content(code.as_str()), Some(&header))
            .await?;
        Ok(Some(compiled.unwrap_or(code)))
    }

    fn invalidate(&self, identity: IdentityToken) {
        self.typescript.invalidate(identity);
    }
}
