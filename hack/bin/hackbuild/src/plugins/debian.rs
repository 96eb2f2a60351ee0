// Copyright 2025 The Hackbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Debian binary packages built with dpkg-deb.

use std::collections::BTreeSet;
use std::fs::create_dir_all;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use anyhow::{Context, Result};
use itertools::Itertools;
use serde::Deserialize;
use tracing::{debug, info};

use crate::builder::{lookup, Builder, BuilderMap, PackageDest};
use crate::plugins::{Plugin, RuleCtx, RuleFn, RuleMap};
use crate::target::{BuildTarget, StagingLayout, TargetID, TargetKind};

const DEFAULT_VERSION: &str = "0.0.0.0.1";
const DEFAULT_MAINTAINER: &str = "Package Maintainer <packages@localhost>";
/// Runtime dependencies every produced package declares.
const BASE_DPKG_DEPS: [&str; 2] = ["libc6 (>= 2.7-1)", "python2.6"];

/// In-package install locations for a Debian hierarchy.
const DEBIAN_BIN_DIR: &str = "/usr/bin";
const DEBIAN_LIB_DIR: &str = "/usr/lib";

/// Debian package state: version, declared runtime dependencies and the
/// control-file maintainer.
#[derive(Clone, Debug)]
pub struct DebianPackage {
    pub version: String,
    pub dpkg_deps: BTreeSet<String>,
    pub maintainer: String,
}

pub struct DebianPlugin;

impl Plugin for DebianPlugin {
    fn name(&self) -> &'static str {
        "debian"
    }

    fn rules(&self) -> RuleMap {
        RuleMap::from([("debian_pkg", debian_pkg as RuleFn)])
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DebianPkgParams {
    name: String,
    #[serde(default)]
    deps: Vec<String>,
    version: Option<String>,
    #[serde(default)]
    extra_dpkg_deps: Vec<String>,
    maintainer: Option<String>,
}

fn debian_pkg(ctx: &RuleCtx, args: toml::Value) -> Result<()> {
    let params: DebianPkgParams = args.try_into().context("invalid debian_pkg parameters")?;
    debug!("Descriptor target, Debian package: {}", params.name);
    let id = TargetID::new(ctx.descriptor_dir, &params.name)?;
    let dep_ids = ctx.normalized_deps(&params.deps)?;
    let layout = StagingLayout::for_target(&id, ctx.repo_root())?;

    let mut dpkg_deps: BTreeSet<String> = BASE_DPKG_DEPS.map(str::to_owned).into();
    dpkg_deps.extend(params.extra_dpkg_deps);
    let kind = TargetKind::DebianPackage(DebianPackage {
        version: params.version.unwrap_or_else(|| DEFAULT_VERSION.to_owned()),
        dpkg_deps,
        maintainer: params
            .maintainer
            .unwrap_or_else(|| DEFAULT_MAINTAINER.to_owned()),
    });
    ctx.discover(BuildTarget {
        id,
        dep_ids,
        layout,
        kind,
    });
    Ok(())
}

pub struct DebianPackageBuilder {
    target: Arc<BuildTarget>,
    pkg: DebianPackage,
    hierarchy_dir: PathBuf,
}

impl DebianPackageBuilder {
    pub fn new(target: Arc<BuildTarget>, pkg: DebianPackage) -> Self {
        Self {
            hierarchy_dir: target.layout.build_dir.join("dpkg_hierarchy"),
            target,
            pkg,
        }
    }

    fn create_control_file(&self) -> Result<()> {
        info!("Creating Debian control file for {}", self.target.id);
        info!("Getting Debian architecture");
        let output = processes::run_captured(
            Command::new("dpkg-architecture").arg("-qDEB_BUILD_ARCH"),
        )
        .context("dpkg-architecture call failed")?;
        let arch = output.stdout.trim();
        info!("Debian architecture: {arch}");

        let control = generate_control_file(
            self.target.id.name(),
            &self.pkg.version,
            arch,
            &self.pkg.maintainer,
            &self.pkg.dpkg_deps,
        );
        debug!("Debian control file text:\n{control}");

        let control_dir = self.hierarchy_dir.join("DEBIAN");
        create_dir_all(&control_dir)
            .with_context(|| format!("mkdir -p {}", control_dir.display()))?;
        let control_path = control_dir.join("control");
        std::fs::write(&control_path, control)
            .with_context(|| format!("Failed to write {}", control_path.display()))
    }

    fn create_binary_package(&self) -> Result<()> {
        info!("Creating Debian binary package for {}", self.target.id);
        processes::run_captured(
            Command::new("dpkg-deb")
                .arg("-b")
                .arg(&self.hierarchy_dir)
                .arg(&self.target.layout.package_dir),
        )
        .context("dpkg-deb call failed")?;
        Ok(())
    }
}

impl Builder for DebianPackageBuilder {
    fn target(&self) -> &BuildTarget {
        &self.target
    }

    fn pre_build_package_binary_install(&self, builders: &BuilderMap) -> Result<()> {
        info!(
            "Copying built binaries to package hierarchy for {}",
            self.target.id
        );
        let dest = PackageDest {
            hierarchy_dir: &self.hierarchy_dir,
            package_name: self.target.id.name(),
            bin_dir: DEBIAN_BIN_DIR,
            lib_dir: DEBIAN_LIB_DIR,
        };
        for dep_id in &self.target.dep_ids {
            if let Some(installable) = lookup(builders, dep_id)?.as_package_installable() {
                installable.install_into_package(builders, &dest)?;
            }
        }
        Ok(())
    }

    fn build_package(&self) -> Result<()> {
        self.create_control_file()?;
        self.create_binary_package()
    }
}

fn generate_control_file(
    name: &str,
    version: &str,
    arch: &str,
    maintainer: &str,
    dpkg_deps: &BTreeSet<String>,
) -> String {
    format!(
        "Package: {name}\n\
         Version: {version}\n\
         Architecture: {arch}\n\
         Maintainer: {maintainer}\n\
         Depends: {}\n\
         Description: {name}\n\
         \x20Built from the monorepo source tree.\n",
        dpkg_deps.iter().join(", ")
    )
}
