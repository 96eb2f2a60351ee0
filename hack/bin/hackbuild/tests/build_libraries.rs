// Copyright 2025 The Hackbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! End-to-end build of a small library-only repository: descriptors are
//! evaluated, the dependency tree is resolved, and the scheduler stages a
//! symlinked source tree with package markers.

use std::fs::{create_dir_all, write};
use std::path::Path;

use anyhow::Result;

use hackbuild::build::Build;
use hackbuild::builder::builders_for_trees;
use hackbuild::plugins::{PluginArgs, PluginRegistry};
use hackbuild::resolver::{DepTree, TargetResolver};
use hackbuild::session::BuildSession;
use hackbuild::target::{Normalizer, TargetID};

fn write_file(path: &Path, content: &str) -> Result<()> {
    create_dir_all(path.parent().unwrap())?;
    write(path, content)?;
    Ok(())
}

#[test]
fn builds_staged_source_tree_for_libraries() -> Result<()> {
    let repo = tempfile::TempDir::new()?;
    create_dir_all(repo.path().join(".repo"))?;

    write_file(&repo.path().join("base/util.py"), "def helper(): pass\n")?;
    write_file(
        &repo.path().join("base/HACK_BUILD"),
        r#"
[[python_lib]]
name = "baselib"
srcs = ["util.py"]
packages = ["base"]
"#,
    )?;

    write_file(&repo.path().join("srv/app/app.py"), "def main(): pass\n")?;
    write_file(&repo.path().join("srv/app/templates/index.html"), "<html/>\n")?;
    write_file(
        &repo.path().join("srv/app/HACK_BUILD"),
        r#"
[[python_lib]]
name = "applib"
srcs = ["app.py"]
files = ["templates/index.html"]
packages = ["srv.app"]
deps = ["/base:baselib"]
"#,
    )?;

    let session = BuildSession::new(
        Normalizer::new(repo.path())?,
        PluginRegistry::standard(),
        PluginArgs::default(),
    );
    let resolver = TargetResolver::new(&session);

    let root = resolver.resolve(&TargetID::parse("/srv/app:applib")?)?;
    let deps = resolver.dep_tree(&root)?;
    let mut trees = DepTree::default();
    trees.0.insert(root, deps);

    let builders = builders_for_trees(&trees, &session);
    Build::new(session.repo_root(), trees, builders).build()?;

    // Both libraries are staged leaves-first under src/ as relative symlinks.
    let staged_base = repo.path().join("src/base/util.py");
    let staged_app = repo.path().join("src/srv/app/app.py");
    assert!(staged_base.is_symlink());
    assert!(staged_app.is_symlink());
    assert_eq!(
        staged_app.canonicalize()?,
        repo.path().join("srv/app/app.py").canonicalize()?
    );
    assert!(repo.path().join("src/srv/app/templates/index.html").is_symlink());

    // Package markers exist along the path and in declared packages.
    assert!(repo.path().join("src/base/__init__.py").exists());
    assert!(repo.path().join("src/srv/__init__.py").exists());
    assert!(repo.path().join("src/srv/app/__init__.py").exists());

    // The staging roots are all present.
    assert!(repo.path().join("build").is_dir());
    assert!(repo.path().join("pkg").is_dir());

    // A second build over the same tree is idempotent.
    let session = BuildSession::new(
        Normalizer::new(repo.path())?,
        PluginRegistry::standard(),
        PluginArgs::default(),
    );
    let resolver = TargetResolver::new(&session);
    let root = resolver.resolve(&TargetID::parse("/srv/app:applib")?)?;
    let deps = resolver.dep_tree(&root)?;
    let mut trees = DepTree::default();
    trees.0.insert(root, deps);
    let builders = builders_for_trees(&trees, &session);
    Build::new(session.repo_root(), trees, builders).build()?;

    // And clean removes everything the build created.
    hackbuild::build::clean(session.repo_root())?;
    assert!(!repo.path().join("src").exists());
    assert!(!repo.path().join("build").exists());
    assert!(!repo.path().join("pkg").exists());
    Ok(())
}
