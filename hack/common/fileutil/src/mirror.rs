// Copyright 2025 The Hackbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs::{create_dir_all, read_link, remove_file, symlink_metadata};
use std::io::ErrorKind;
use std::os::unix::fs::symlink;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;
use walkdir::WalkDir;

/// Creates a symlink at `dest` pointing back at `src`.
///
/// The link value is the relative path from `dest`'s parent directory to
/// `src`, so a whole mirrored hierarchy can be moved or bind-mounted without
/// breaking its links. Missing parent directories of `dest` are created.
///
/// The operation is idempotent: an existing symlink with the correct value is
/// left untouched, while an entry with a wrong value is removed and recreated.
pub fn mirror_file(src: &Path, dest: &Path) -> Result<()> {
    let parent = dest
        .parent()
        .with_context(|| format!("{} has no parent directory", dest.display()))?;
    create_dir_all(parent).with_context(|| format!("mkdir -p {}", parent.display()))?;

    let value = pathdiff::diff_paths(src, parent).with_context(|| {
        format!(
            "cannot relativize {} against {}",
            src.display(),
            parent.display()
        )
    })?;

    match symlink_metadata(dest) {
        Ok(metadata) => {
            if metadata.is_symlink() && read_link(dest)? == value {
                debug!("Symlink already correct: {}", dest.display());
                return Ok(());
            }
            remove_file(dest).with_context(|| format!("rm {}", dest.display()))?;
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to stat {}", dest.display()));
        }
    }

    debug!("Symlinking {} -> {}", dest.display(), value.display());
    symlink(&value, dest)
        .with_context(|| format!("ln -s {} {}", value.display(), dest.display()))
}

/// Mirrors the hierarchy under `from_dir` into `to_dir`.
///
/// Directories are recreated; every other entry becomes a relative-valued
/// symlink to the original. Repeated runs over an unchanged source tree make
/// no filesystem mutations.
pub fn mirror_tree(from_dir: &Path, to_dir: &Path) -> Result<()> {
    for entry in WalkDir::new(from_dir) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(from_dir)?;
        let dest = to_dir.join(rel);
        if entry.file_type().is_dir() {
            create_dir_all(&dest).with_context(|| format!("mkdir -p {}", dest.display()))?;
        } else {
            mirror_file(entry.path(), &dest)?;
        }
    }
    Ok(())
}
