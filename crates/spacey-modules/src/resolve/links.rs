// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Link target lookup

use crate::file_cache::FileCache;
use crate::paths::{self, parse_path};
use std::sync::Arc;

/// Maps a link path written in a note to the file it points at
pub trait LinkIndex: Send + Sync {
    /// Best file for `link_path` as seen from the directory `source_dir`
    fn first_link_path_dest(&self, link_path: &str, source_dir: &str) -> Option<String>;
}

/// Link lookup over the files of a [`FileCache`]
///
/// Candidates are tried in order: relative to the source directory, then
/// vault-absolute, each with and without an implied `.md`. Failing that,
/// the shortest path whose trailing segments match the link wins.
pub struct VaultLinkIndex {
    cache: Arc<FileCache>,
}

impl VaultLinkIndex {
    pub fn new(cache: Arc<FileCache>) -> Self {
        Self { cache }
    }
}

impl LinkIndex for VaultLinkIndex {
    fn first_link_path_dest(&self, link_path: &str, source_dir: &str) -> Option<String> {
        if link_path.is_empty() {
            return None;
        }
        let relative = parse_path(&format!("{source_dir}/{link_path}"));
        let absolute = parse_path(link_path);
        for candidate in [relative, absolute] {
            if candidate.is_empty() {
                continue;
            }
            if self.cache.get(&candidate).is_some() {
                return Some(candidate);
            }
            let with_extension = format!("{candidate}.md");
            if self.cache.get(&with_extension).is_some() {
                return Some(with_extension);
            }
        }

        let wanted = paths::normalize_path(link_path);
        let wanted_md = format!("{wanted}.md");
        self.cache
            .paths()
            .into_iter()
            .filter(|path| {
                [&wanted, &wanted_md]
                    .iter()
                    .any(|suffix| path == *suffix || path.ends_with(&format!("/{suffix}")))
            })
            .min_by_key(|path| (path.len(), path.clone()))
    }
}
