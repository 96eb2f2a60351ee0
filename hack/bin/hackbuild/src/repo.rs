// Copyright 2025 The Hackbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;

/// Name of the directory anchoring the repository root.
pub const REPO_ANCHOR: &str = ".repo";

#[derive(Debug, Error)]
pub enum RepoRootError {
    #[error("repository root not found: no {REPO_ANCHOR} directory above {0}")]
    NotFound(PathBuf),
    #[error("the repository anchor ({0}) is not a directory")]
    AnchorNotDirectory(PathBuf),
}

/// Finds the nearest ancestor of `start` (inclusive) that contains a `.repo`
/// directory.
pub fn find_repo_root(start: &Path) -> Result<PathBuf> {
    for dir in start.ancestors() {
        let anchor = dir.join(REPO_ANCHOR);
        match anchor.metadata() {
            Ok(metadata) if metadata.is_dir() => return Ok(dir.to_owned()),
            Ok(_) => return Err(RepoRootError::AnchorNotDirectory(anchor).into()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to stat {}", anchor.display()))
            }
        }
    }
    Err(RepoRootError::NotFound(start.to_owned()).into())
}
