// Copyright 2025 The Hackbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs::{copy, create_dir_all, read_link};
use std::os::unix::fs::symlink;
use std::path::Path;

use anyhow::{Context, Result};
use walkdir::WalkDir;

/// Recursively copies `from_dir` into `to_dir`.
///
/// Symlinks are recreated with their original values instead of being
/// followed, so relocatable trees (e.g. virtualenvs full of relative links)
/// survive the copy. Regular-file permissions are preserved by
/// [`std::fs::copy`].
pub fn copy_tree(from_dir: &Path, to_dir: &Path) -> Result<()> {
    for entry in WalkDir::new(from_dir).follow_links(false) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(from_dir)?;
        let dest = to_dir.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            create_dir_all(&dest).with_context(|| format!("mkdir -p {}", dest.display()))?;
        } else if file_type.is_symlink() {
            let value = read_link(entry.path())
                .with_context(|| format!("readlink {}", entry.path().display()))?;
            symlink(&value, &dest)
                .with_context(|| format!("ln -s {} {}", value.display(), dest.display()))?;
        } else {
            copy(entry.path(), &dest).with_context(|| {
                format!("cp {} {}", entry.path().display(), dest.display())
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs::{create_dir_all, write};
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    #[test]
    fn copy_tree_preserves_symlinks_and_modes() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let from = dir.path().join("from");
        create_dir_all(from.join("bin"))?;
        write(from.join("bin/tool"), "#!/bin/sh\n")?;
        std::fs::set_permissions(
            from.join("bin/tool"),
            std::fs::Permissions::from_mode(0o755),
        )?;
        symlink("tool", from.join("bin/alias"))?;

        let to = dir.path().join("to");
        copy_tree(&from, &to)?;

        assert_eq!(std::fs::read_to_string(to.join("bin/tool"))?, "#!/bin/sh\n");
        assert_eq!(
            std::fs::metadata(to.join("bin/tool"))?.permissions().mode() & 0o777,
            0o755
        );
        assert_eq!(read_link(to.join("bin/alias"))?, Path::new("tool"));
        Ok(())
    }
}
