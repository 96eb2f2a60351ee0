// Copyright 2025 The Hackbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! macOS installer packages built with packagemaker.

use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::builder::{lookup, Builder, BuilderMap, PackageDest};
use crate::plugins::{Plugin, RuleCtx, RuleFn, RuleMap};
use crate::target::{BuildTarget, StagingLayout, TargetID, TargetKind};

/// In-package install locations for a macOS hierarchy.
const MAC_BIN_DIR: &str = "/bin";
const MAC_LIB_DIR: &str = "/Library";

/// macOS package state: version and the base name of the produced `.pkg`.
#[derive(Clone, Debug)]
pub struct MacPackage {
    pub version: String,
    pub pkg_filebase: String,
    pub pkg_filename: String,
}

pub struct MacPlugin;

impl Plugin for MacPlugin {
    fn name(&self) -> &'static str {
        "macosx"
    }

    fn rules(&self) -> RuleMap {
        RuleMap::from([("mac_pkg", mac_pkg as RuleFn)])
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MacPkgParams {
    name: String,
    #[serde(default)]
    deps: Vec<String>,
    version: String,
    pkg_filebase: String,
}

fn mac_pkg(ctx: &RuleCtx, args: toml::Value) -> Result<()> {
    let params: MacPkgParams = args.try_into().context("invalid mac_pkg parameters")?;
    debug!("Descriptor target, Mac package: {}", params.name);
    let id = TargetID::new(ctx.descriptor_dir, &params.name)?;
    if params.pkg_filebase.contains('/') {
        bail!(
            "pkg_filebase ({}) in target ({id}) cannot contain a path separator",
            params.pkg_filebase
        );
    }
    let dep_ids = ctx.normalized_deps(&params.deps)?;
    let layout = StagingLayout::for_target(&id, ctx.repo_root())?;
    let kind = TargetKind::MacPackage(MacPackage {
        pkg_filename: format!("{}-{}.pkg", params.pkg_filebase, params.version),
        version: params.version,
        pkg_filebase: params.pkg_filebase,
    });
    ctx.discover(BuildTarget {
        id,
        dep_ids,
        layout,
        kind,
    });
    Ok(())
}

pub struct MacPackageBuilder {
    target: Arc<BuildTarget>,
    pkg: MacPackage,
    hierarchy_dir: PathBuf,
}

impl MacPackageBuilder {
    pub fn new(target: Arc<BuildTarget>, pkg: MacPackage) -> Self {
        Self {
            hierarchy_dir: target.layout.build_dir.join("macosx_hierarchy"),
            target,
            pkg,
        }
    }
}

impl Builder for MacPackageBuilder {
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
            bin_dir: MAC_BIN_DIR,
            lib_dir: MAC_LIB_DIR,
        };
        for dep_id in &self.target.dep_ids {
            if let Some(installable) = lookup(builders, dep_id)?.as_package_installable() {
                installable.install_into_package(builders, &dest)?;
            }
        }
        Ok(())
    }

    fn build_package(&self) -> Result<()> {
        info!("Creating Mac binary package for {}", self.target.id);
        let package_path = self.target.layout.package_dir.join(&self.pkg.pkg_filename);
        processes::run_captured(
            Command::new("packagemaker")
                .arg("--root")
                .arg(&self.hierarchy_dir)
                .arg("--id")
                .arg(format!("zyzzx.{}", self.target.id.name()))
                .args(["--domain", "system"])
                .args(["--domain", "user"])
                .args(["--domain", "anywhere"])
                .args(["--target", "10.5"])
                .args(["--filter", r"\.DS_Store"])
                .arg("--version")
                .arg(&self.pkg.version)
                .arg("--out")
                .arg(&package_path),
        )
        .context("packagemaker call failed")?;
        info!("Package built at: {}", package_path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkg_filebase_with_path_separator_is_rejected() -> Result<()> {
        let repo = tempfile::TempDir::new()?;
        let session = crate::session::BuildSession::new(
            crate::target::Normalizer::new(repo.path())?,
            crate::plugins::PluginRegistry::standard(),
            crate::plugins::PluginArgs::default(),
        );
        let ctx = RuleCtx {
            session: &session,
            descriptor_dir: "/mac",
        };
        let args: toml::Value =
            "name = \"pkg\"\nversion = \"1.0\"\npkg_filebase = \"bad/name\"\n"
                .parse::<toml::Table>()?
                .into();
        assert!(mac_pkg(&ctx, args).is_err());
        Ok(())
    }

    #[test]
    fn pkg_filename_combines_base_and_version() -> Result<()> {
        let repo = tempfile::TempDir::new()?;
        let session = crate::session::BuildSession::new(
            crate::target::Normalizer::new(repo.path())?,
            crate::plugins::PluginRegistry::standard(),
            crate::plugins::PluginArgs::default(),
        );
        let ctx = RuleCtx {
            session: &session,
            descriptor_dir: "/mac",
        };
        let args: toml::Value = "name = \"pkg\"\nversion = \"2.1\"\npkg_filebase = \"tools\"\n"
            .parse::<toml::Table>()?
            .into();
        mac_pkg(&ctx, args)?;

        let targets = session.drain_discovered();
        let target = targets.iter().next().unwrap();
        match &target.kind {
            TargetKind::MacPackage(pkg) => assert_eq!(pkg.pkg_filename, "tools-2.1.pkg"),
            other => panic!("unexpected kind: {other:?}"),
        }
        Ok(())
    }
}
