// Copyright 2025 The Hackbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::Result;
use tracing::info;

use hackbuild::build;
use hackbuild::repo::find_repo_root;

pub fn run() -> Result<()> {
    let repo_root = find_repo_root(&std::env::current_dir()?)?;
    info!("Repository root: {}", repo_root.display());
    build::clean(&repo_root)
}
