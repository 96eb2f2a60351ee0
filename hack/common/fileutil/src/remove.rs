// Copyright 2025 The Hackbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};

/// Removes a directory tree, treating a missing tree as success.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use std::fs::{create_dir_all, write};

    use super::*;

    #[test]
    fn removes_populated_tree() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let victim = dir.path().join("victim");
        create_dir_all(victim.join("nested"))?;
        write(victim.join("nested/file"), "x")?;

        remove_dir_all_if_exists(&victim)?;
        assert!(!victim.exists());
        Ok(())
    }

    #[test]
    fn missing_tree_is_not_an_error() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        remove_dir_all_if_exists(&dir.path().join("never-created"))
    }
}
