// Copyright 2025 The Hackbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The capability surface implemented by per-target builders.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::plugins::debian::DebianPackageBuilder;
use crate::plugins::macosx::MacPackageBuilder;
use crate::plugins::python::{
    PythonBinaryBuilder, PythonLibraryBuilder, PythonLibraryOps, PythonThirdPartyLibraryBuilder,
};
use crate::plugins::upstart::UpstartScriptBuilder;
use crate::resolver::DepTree;
use crate::session::BuildSession;
use crate::target::{BuildTarget, Role, TargetID, TargetKind};

/// Read-only registry of every builder participating in one build, keyed by
/// target id. Handed to the pre-phase hooks so builders can interrogate
/// their dependencies' builders.
pub type BuilderMap = BTreeMap<TargetID, Box<dyn Builder>>;

/// Destination directories inside a package hierarchy, dictated by the
/// package flavor. The bin and lib paths are absolute within the installed
/// package (e.g. `/usr/bin`).
pub struct PackageDest<'a> {
    pub hierarchy_dir: &'a Path,
    pub package_name: &'a str,
    pub bin_dir: &'a str,
    pub lib_dir: &'a str,
}

/// Capability of installing an artifact into a package hierarchy. Implemented
/// by binary and start-script builders; invoked by package builders in their
/// pre-build-package hook.
pub trait PackageInstallOps {
    fn install_into_package(&self, builders: &BuilderMap, dest: &PackageDest) -> Result<()>;
}

/// A per-target builder. The scheduler drives every target through the four
/// phase hooks; the pre-phase hooks run only for the matching role, directly
/// before that phase's hook on the same target. All hooks default to no-ops.
pub trait Builder {
    fn target(&self) -> &BuildTarget;

    fn role(&self) -> Role {
        self.target().role()
    }

    fn as_python_library(&self) -> Option<&dyn PythonLibraryOps> {
        None
    }

    fn as_package_installable(&self) -> Option<&dyn PackageInstallOps> {
        None
    }

    fn create_source_tree(&self) -> Result<()> {
        Ok(())
    }

    fn create_build_environment(&self) -> Result<()> {
        Ok(())
    }

    fn build_binary(&self) -> Result<()> {
        Ok(())
    }

    fn build_package(&self) -> Result<()> {
        Ok(())
    }

    fn pre_create_source_tree(&self, _builders: &BuilderMap) -> Result<()> {
        Ok(())
    }

    fn pre_build_binary_library_install(&self, _builders: &BuilderMap) -> Result<()> {
        Ok(())
    }

    fn pre_build_package_binary_install(&self, _builders: &BuilderMap) -> Result<()> {
        Ok(())
    }
}

/// Looks up a builder that must exist for a resolved dependency.
pub fn lookup<'a>(builders: &'a BuilderMap, id: &TargetID) -> Result<&'a dyn Builder> {
    builders
        .get(id)
        .map(|b| b.as_ref())
        .with_context(|| format!("no builder registered for {id}"))
}

/// Constructs the builder bound to a target, according to its kind.
pub fn builder_for_target(target: Arc<BuildTarget>, session: &BuildSession) -> Box<dyn Builder> {
    match &target.kind {
        TargetKind::PythonLibrary(lib) => {
            Box::new(PythonLibraryBuilder::new(Arc::clone(&target), lib.clone()))
        }
        TargetKind::PythonThirdPartyLibrary(lib) => Box::new(PythonThirdPartyLibraryBuilder::new(
            Arc::clone(&target),
            lib.clone(),
        )),
        TargetKind::PythonBinary(bin) => Box::new(PythonBinaryBuilder::new(
            Arc::clone(&target),
            bin.clone(),
            session,
        )),
        TargetKind::DebianPackage(pkg) => {
            Box::new(DebianPackageBuilder::new(Arc::clone(&target), pkg.clone()))
        }
        TargetKind::MacPackage(pkg) => {
            Box::new(MacPackageBuilder::new(Arc::clone(&target), pkg.clone()))
        }
        TargetKind::UpstartScript(script) => Box::new(UpstartScriptBuilder::new(
            Arc::clone(&target),
            script.clone(),
        )),
    }
}

/// Builds the builder map for every unique target reachable from the given
/// root trees.
pub fn builders_for_trees(trees: &DepTree, session: &BuildSession) -> BuilderMap {
    let mut builders = BuilderMap::new();
    collect(trees, session, &mut builders);
    builders
}

fn collect(tree: &DepTree, session: &BuildSession, builders: &mut BuilderMap) {
    for (target, deps) in &tree.0 {
        if !builders.contains_key(&target.id) {
            builders.insert(
                target.id.clone(),
                builder_for_target(Arc::clone(target), session),
            );
        }
        collect(deps, session, builders);
    }
}
