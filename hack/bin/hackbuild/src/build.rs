// Copyright 2025 The Hackbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The build scheduler: drives every target through the four build phases.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::create_dir_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};
use tracing::info;

use crate::builder::{Builder, BuilderMap};
use crate::resolver::DepTree;
use crate::target::{BuildTarget, Role, BUILD_TREE_DIR, PACKAGE_TREE_DIR, SOURCE_TREE_DIR};

/// The ordered build phases. Each phase is a global barrier: every target
/// finishes a phase before any target enters the next one.
#[derive(Clone, Copy, Debug, Display, EnumIter, Eq, PartialEq)]
pub enum Phase {
    #[strum(serialize = "create source tree")]
    CreateSourceTree,
    #[strum(serialize = "create build environment")]
    CreateBuildEnvironment,
    #[strum(serialize = "build binary")]
    BuildBinary,
    #[strum(serialize = "build package")]
    BuildPackage,
}

/// One build invocation over a set of root dependency trees.
pub struct Build {
    repo_root: PathBuf,
    trees: DepTree,
    builders: BuilderMap,
}

impl Build {
    pub fn new(repo_root: &Path, trees: DepTree, builders: BuilderMap) -> Self {
        Self {
            repo_root: repo_root.to_owned(),
            trees,
            builders,
        }
    }

    pub fn build(&self) -> Result<()> {
        info!("Starting build");
        self.create_dirs()?;
        let sequences = self.linearize();
        for phase in Phase::iter() {
            self.run_phase(phase, &sequences)?;
        }
        info!("Finishing build");
        Ok(())
    }

    fn create_dirs(&self) -> Result<()> {
        for dir in [SOURCE_TREE_DIR, BUILD_TREE_DIR, PACKAGE_TREE_DIR] {
            let path = self.repo_root.join(dir);
            info!("Creating staging directory: {}", path.display());
            create_dir_all(&path).with_context(|| format!("mkdir -p {}", path.display()))?;
        }
        Ok(())
    }

    /// Linearizes each root tree into a leaves-first sequence: targets are
    /// ordered by maximum depth, deepest first, ties broken by id so builds
    /// are reproducible across runs.
    fn linearize(&self) -> Vec<Vec<Arc<BuildTarget>>> {
        self.trees
            .0
            .iter()
            .map(|(root, deps)| linearize_tree(root, deps))
            .collect()
    }

    fn run_phase(&self, phase: Phase, sequences: &[Vec<Arc<BuildTarget>>]) -> Result<()> {
        info!("Entering {phase} phase");
        let mut handled = BTreeSet::new();
        for sequence in sequences {
            for target in sequence {
                if !handled.insert(&target.id) {
                    continue;
                }
                let builder = self
                    .builders
                    .get(&target.id)
                    .with_context(|| format!("no builder registered for {}", target.id))?;
                self.run_hooks(phase, builder.as_ref())
                    .with_context(|| format!("{phase} failed for {}", target.id))?;
            }
        }
        info!("Exiting {phase} phase");
        Ok(())
    }

    fn run_hooks(&self, phase: Phase, builder: &dyn Builder) -> Result<()> {
        match phase {
            Phase::CreateSourceTree => {
                if builder.role() == Role::Binary {
                    builder.pre_create_source_tree(&self.builders)?;
                }
                builder.create_source_tree()
            }
            Phase::CreateBuildEnvironment => builder.create_build_environment(),
            Phase::BuildBinary => {
                if builder.role() == Role::Binary {
                    builder.pre_build_binary_library_install(&self.builders)?;
                }
                builder.build_binary()
            }
            Phase::BuildPackage => {
                if builder.role() == Role::Package {
                    builder.pre_build_package_binary_install(&self.builders)?;
                }
                builder.build_package()
            }
        }
    }
}

/// Removes the three staging roots. Missing roots are fine.
pub fn clean(repo_root: &Path) -> Result<()> {
    info!("Removing staging directories");
    for dir in [SOURCE_TREE_DIR, BUILD_TREE_DIR, PACKAGE_TREE_DIR] {
        let path = repo_root.join(dir);
        info!("Removing staging directory: {}", path.display());
        fileutil::remove_dir_all_if_exists(&path)?;
    }
    Ok(())
}

fn linearize_tree(root: &Arc<BuildTarget>, deps: &DepTree) -> Vec<Arc<BuildTarget>> {
    let mut depths = BTreeMap::new();
    record_depths(root, deps, 0, &mut depths);
    let mut order: Vec<(Arc<BuildTarget>, usize)> = depths.into_iter().collect();
    order.sort_by(|(a, depth_a), (b, depth_b)| depth_b.cmp(depth_a).then_with(|| a.id.cmp(&b.id)));
    order.into_iter().map(|(target, _)| target).collect()
}

fn record_depths(
    target: &Arc<BuildTarget>,
    deps: &DepTree,
    depth: usize,
    depths: &mut BTreeMap<Arc<BuildTarget>, usize>,
) {
    let recorded = depths.entry(Arc::clone(target)).or_insert(depth);
    if depth > *recorded {
        *recorded = depth;
    }
    for (dep, subtree) in &deps.0 {
        record_depths(dep, subtree, depth + 1, depths);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::plugins::python::PythonLibrary;
    use crate::target::{StagingLayout, TargetID, TargetKind};

    fn test_target(id: &str, deps: &[&str]) -> Arc<BuildTarget> {
        let id = TargetID::parse(id).unwrap();
        let layout = StagingLayout::for_target(&id, Path::new("/repo")).unwrap();
        Arc::new(BuildTarget {
            id,
            dep_ids: deps.iter().map(|d| TargetID::parse(d).unwrap()).collect(),
            layout,
            kind: TargetKind::PythonLibrary(PythonLibrary::default()),
        })
    }

    struct RecordingBuilder {
        target: Arc<BuildTarget>,
        role: Role,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl RecordingBuilder {
        fn record(&self, event: &str) {
            self.log
                .borrow_mut()
                .push(format!("{event} {}", self.target.id.name()));
        }
    }

    impl Builder for RecordingBuilder {
        fn target(&self) -> &BuildTarget {
            &self.target
        }

        fn role(&self) -> Role {
            self.role
        }

        fn create_source_tree(&self) -> Result<()> {
            self.record("source");
            Ok(())
        }

        fn create_build_environment(&self) -> Result<()> {
            self.record("env");
            Ok(())
        }

        fn build_binary(&self) -> Result<()> {
            self.record("binary");
            Ok(())
        }

        fn build_package(&self) -> Result<()> {
            self.record("package");
            Ok(())
        }

        fn pre_create_source_tree(&self, _builders: &BuilderMap) -> Result<()> {
            self.record("pre_source");
            Ok(())
        }

        fn pre_build_binary_library_install(&self, _builders: &BuilderMap) -> Result<()> {
            self.record("pre_binary");
            Ok(())
        }

        fn pre_build_package_binary_install(&self, _builders: &BuilderMap) -> Result<()> {
            self.record("pre_package");
            Ok(())
        }
    }

    fn recording_builders(
        roles: &[(&Arc<BuildTarget>, Role)],
        log: &Rc<RefCell<Vec<String>>>,
    ) -> BuilderMap {
        roles
            .iter()
            .map(|(target, role)| {
                let builder: Box<dyn Builder> = Box::new(RecordingBuilder {
                    target: Arc::clone(target),
                    role: *role,
                    log: Rc::clone(log),
                });
                (target.id.clone(), builder)
            })
            .collect()
    }

    #[test]
    fn phases_run_leaves_first_with_role_pre_hooks() -> Result<()> {
        let repo = tempfile::TempDir::new()?;
        let lib = test_target("/lib:l", &[]);
        let bin = test_target("/app:b", &["/lib:l"]);
        let pkg = test_target("/app:p", &["/app:b"]);

        let mut tree = DepTree::default();
        tree.0.insert(
            Arc::clone(&pkg),
            DepTree(BTreeMap::from([(
                Arc::clone(&bin),
                DepTree(BTreeMap::from([(Arc::clone(&lib), DepTree::default())])),
            )])),
        );

        let log = Rc::new(RefCell::new(Vec::new()));
        let builders = recording_builders(
            &[(&lib, Role::Library), (&bin, Role::Binary), (&pkg, Role::Package)],
            &log,
        );

        Build::new(repo.path(), tree, builders).build()?;

        let log: Vec<String> = log.borrow().clone();
        assert_eq!(
            log,
            vec![
                "source l",
                "pre_source b",
                "source b",
                "source p",
                "env l",
                "env b",
                "env p",
                "binary l",
                "pre_binary b",
                "binary b",
                "binary p",
                "package l",
                "package b",
                "pre_package p",
                "package p",
            ]
        );
        Ok(())
    }

    #[test]
    fn diamond_dependency_runs_once_per_phase() -> Result<()> {
        let repo = tempfile::TempDir::new()?;
        let a = test_target("/a:a", &[]);
        let b = test_target("/b:b", &["/a:a"]);
        let c = test_target("/c:c", &["/a:a"]);
        let d = test_target("/d:d", &["/b:b", "/c:c"]);

        let a_subtree = || DepTree(BTreeMap::from([(Arc::clone(&a), DepTree::default())]));
        let mut tree = DepTree::default();
        tree.0.insert(
            Arc::clone(&d),
            DepTree(BTreeMap::from([
                (Arc::clone(&b), a_subtree()),
                (Arc::clone(&c), a_subtree()),
            ])),
        );

        let log = Rc::new(RefCell::new(Vec::new()));
        let builders = recording_builders(
            &[
                (&a, Role::Library),
                (&b, Role::Library),
                (&c, Role::Library),
                (&d, Role::Library),
            ],
            &log,
        );

        Build::new(repo.path(), tree, builders).build()?;

        let log = log.borrow();
        assert_eq!(log.len(), 16, "each of 4 targets exactly once in 4 phases");
        for event in ["source", "env", "binary", "package"] {
            assert_eq!(
                log.iter().filter(|l| **l == format!("{event} a")).count(),
                1
            );
        }
        // The shared leaf runs before either of its dependents.
        assert_eq!(log[0], "source a");
        assert_eq!(log[3], "source d");
        Ok(())
    }

    #[test]
    fn shared_targets_deduplicate_across_roots() -> Result<()> {
        let repo = tempfile::TempDir::new()?;
        let lib = test_target("/lib:l", &[]);
        let left = test_target("/left:x", &["/lib:l"]);
        let right = test_target("/right:y", &["/lib:l"]);

        let lib_subtree = || DepTree(BTreeMap::from([(Arc::clone(&lib), DepTree::default())]));
        let mut tree = DepTree::default();
        tree.0.insert(Arc::clone(&left), lib_subtree());
        tree.0.insert(Arc::clone(&right), lib_subtree());

        let log = Rc::new(RefCell::new(Vec::new()));
        let builders = recording_builders(
            &[
                (&lib, Role::Library),
                (&left, Role::Library),
                (&right, Role::Library),
            ],
            &log,
        );

        Build::new(repo.path(), tree, builders).build()?;

        let log = log.borrow();
        assert_eq!(log.iter().filter(|l| **l == "source l").count(), 1);
        assert_eq!(log.len(), 12);
        Ok(())
    }

    #[test]
    fn build_creates_staging_roots() -> Result<()> {
        let repo = tempfile::TempDir::new()?;
        Build::new(repo.path(), DepTree::default(), BuilderMap::new()).build()?;
        for dir in [SOURCE_TREE_DIR, BUILD_TREE_DIR, PACKAGE_TREE_DIR] {
            assert!(repo.path().join(dir).is_dir());
        }
        // A second run with the directories already present succeeds.
        Build::new(repo.path(), DepTree::default(), BuilderMap::new()).build()
    }

    #[test]
    fn clean_removes_staging_roots_and_tolerates_absence() -> Result<()> {
        let repo = tempfile::TempDir::new()?;
        Build::new(repo.path(), DepTree::default(), BuilderMap::new()).build()?;
        clean(repo.path())?;
        assert!(!repo.path().join(SOURCE_TREE_DIR).exists());
        // Cleaning an already-clean repository is not an error.
        clean(repo.path())
    }

    #[test]
    fn hook_failure_aborts_the_build() -> Result<()> {
        struct FailingBuilder {
            target: Arc<BuildTarget>,
        }

        impl Builder for FailingBuilder {
            fn target(&self) -> &BuildTarget {
                &self.target
            }

            fn create_build_environment(&self) -> Result<()> {
                anyhow::bail!("virtualenv creation failed")
            }
        }

        let repo = tempfile::TempDir::new()?;
        let target = test_target("/lib:l", &[]);
        let mut tree = DepTree::default();
        tree.0.insert(Arc::clone(&target), DepTree::default());
        let mut builders = BuilderMap::new();
        builders.insert(
            target.id.clone(),
            Box::new(FailingBuilder {
                target: Arc::clone(&target),
            }),
        );

        let err = Build::new(repo.path(), tree, builders).build().unwrap_err();
        assert!(err.to_string().contains("create build environment"));
        Ok(())
    }
}
