// Copyright 2025 The Hackbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Python build units: libraries, vendored libraries, binaries and tests.
//!
//! A python binary is assembled by generating a setuptools descriptor from
//! the transitive library metadata, building an isolated virtualenv with the
//! vendored virtualenv tool, and installing the staged sources into it.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{create_dir_all, set_permissions, File, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches};
use itertools::Itertools;
use serde::Deserialize;
use tracing::{debug, info};

use crate::builder::{lookup, Builder, BuilderMap, PackageDest, PackageInstallOps};
use crate::plugins::{Plugin, PluginArgs, RuleCtx, RuleFn, RuleMap};
use crate::target::{BuildTarget, StagingLayout, TargetID, TargetKind};

pub const DEFAULT_PYTHON: &str = "python";
const VIRTUALENV_VERSION: &str = "1.6.4";
/// Marker file that makes a directory an importable python package.
const PACKAGE_MARKER: &str = "__init__.py";

/// Absolute path of the vendored virtualenv tool.
pub fn virtualenv_tool_path(repo_root: &Path) -> PathBuf {
    repo_root
        .join("third_party/py/virtualenv")
        .join(format!("virtualenv-{VIRTUALENV_VERSION}"))
        .join("virtualenv.py")
}

/// How `setup.py` installs packages into a binary's virtualenv.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, clap::ValueEnum)]
pub enum InstallMethod {
    /// Copy files into the virtualenv.
    #[default]
    Install,
    /// Link the source tree so changes are picked up without reinstalling.
    Develop,
}

impl InstallMethod {
    fn setup_command(self) -> &'static str {
        match self {
            InstallMethod::Install => "install",
            InstallMethod::Develop => "develop",
        }
    }
}

/// First-party library state: declared sources, data files, package names
/// and entry points.
#[derive(Clone, Debug, Default)]
pub struct PythonLibrary {
    pub srcs: Vec<String>,
    pub data_files: Vec<String>,
    pub packages: Vec<String>,
    pub entry_points: BTreeMap<String, Vec<String>>,
}

/// A vendored library living in a subdirectory with its own `setup.py`.
#[derive(Clone, Debug)]
pub struct PythonThirdPartyLibrary {
    pub lib_dir: String,
    pub setup_py_dir: String,
}

/// A console-script binary (or test) built into its own virtualenv.
#[derive(Clone, Debug)]
pub struct PythonBinary {
    pub console_script: String,
    pub virtualenv_dir: PathBuf,
    pub setup_py_path: PathBuf,
    pub bin_path: PathBuf,
}

pub struct PythonPlugin;

const INSTALL_METHOD_ARG: &str = "python_install_method";

impl Plugin for PythonPlugin {
    fn name(&self) -> &'static str {
        "python"
    }

    fn rules(&self) -> RuleMap {
        RuleMap::from([
            ("python_bin", python_bin as RuleFn),
            ("python_test", python_test as RuleFn),
            ("python_lib", python_lib as RuleFn),
            ("python_third_party_lib", python_third_party_lib as RuleFn),
        ])
    }

    fn register_args(&self, cmd: clap::Command) -> clap::Command {
        cmd.arg(
            Arg::new(INSTALL_METHOD_ARG)
                .long("python-install-method")
                .value_name("METHOD")
                .value_parser(clap::builder::EnumValueParser::<InstallMethod>::new())
                .default_value("install")
                .global(true)
                .help(
                    "Method for python package installation. \"install\" copies files \
                     into the virtualenv; \"develop\" links the source tree so changes \
                     are picked up without reinstalling. Working packages can only be \
                     built with \"install\"",
                ),
        )
    }

    fn receive_args(&self, matches: &ArgMatches, args: &mut PluginArgs) -> Result<()> {
        args.python_install_method = matches
            .get_one::<InstallMethod>(INSTALL_METHOD_ARG)
            .copied()
            .unwrap_or_default();
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PythonBinParams {
    name: String,
    #[serde(default)]
    deps: Vec<String>,
    console_script: String,
}

fn python_bin(ctx: &RuleCtx, args: toml::Value) -> Result<()> {
    let params: PythonBinParams = args.try_into().context("invalid python_bin parameters")?;
    debug!("Descriptor target, python bin: {}", params.name);
    discover_python_bin(ctx, params)
}

fn python_test(ctx: &RuleCtx, args: toml::Value) -> Result<()> {
    let params: PythonBinParams = args.try_into().context("invalid python_test parameters")?;
    debug!("Descriptor target, python test: {}", params.name);
    discover_python_bin(ctx, params)
}

fn discover_python_bin(ctx: &RuleCtx, params: PythonBinParams) -> Result<()> {
    let id = TargetID::new(ctx.descriptor_dir, &params.name)?;
    let dep_ids = ctx.normalized_deps(&params.deps)?;
    let layout = StagingLayout::for_target(&id, ctx.repo_root())?;
    let virtualenv_dir = layout.build_dir.join("python_virtualenv");
    let kind = TargetKind::PythonBinary(PythonBinary {
        console_script: params.console_script,
        setup_py_path: layout.source_dir.join(format!("setup-{}.py", params.name)),
        bin_path: virtualenv_dir.join("bin").join(&params.name),
        virtualenv_dir,
    });
    ctx.discover(BuildTarget {
        id,
        dep_ids,
        layout,
        kind,
    });
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PythonLibParams {
    name: String,
    #[serde(default)]
    deps: Vec<String>,
    #[serde(default)]
    srcs: Vec<String>,
    #[serde(default)]
    packages: Vec<String>,
    #[serde(default)]
    entry_points: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    files: Vec<String>,
}

fn python_lib(ctx: &RuleCtx, args: toml::Value) -> Result<()> {
    let params: PythonLibParams = args.try_into().context("invalid python_lib parameters")?;
    debug!("Descriptor target, python lib: {}", params.name);
    let id = TargetID::new(ctx.descriptor_dir, &params.name)?;
    let dep_ids = ctx.normalized_deps(&params.deps)?;
    let layout = StagingLayout::for_target(&id, ctx.repo_root())?;
    let kind = TargetKind::PythonLibrary(PythonLibrary {
        srcs: params.srcs,
        data_files: params.files,
        packages: params.packages,
        entry_points: params.entry_points,
    });
    ctx.discover(BuildTarget {
        id,
        dep_ids,
        layout,
        kind,
    });
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PythonThirdPartyLibParams {
    name: String,
    #[serde(default)]
    deps: Vec<String>,
    lib_dir: String,
    setup_py_dir: Option<String>,
}

fn python_third_party_lib(ctx: &RuleCtx, args: toml::Value) -> Result<()> {
    let params: PythonThirdPartyLibParams = args
        .try_into()
        .context("invalid python_third_party_lib parameters")?;
    debug!("Descriptor target, python 3rd party lib: {}", params.name);
    let id = TargetID::new(ctx.descriptor_dir, &params.name)?;
    let dep_ids = ctx.normalized_deps(&params.deps)?;
    let layout = StagingLayout::for_target(&id, ctx.repo_root())?;
    let kind = TargetKind::PythonThirdPartyLibrary(PythonThirdPartyLibrary {
        setup_py_dir: params.setup_py_dir.unwrap_or_else(|| params.lib_dir.clone()),
        lib_dir: params.lib_dir,
    });
    ctx.discover(BuildTarget {
        id,
        dep_ids,
        layout,
        kind,
    });
    Ok(())
}

/// Cross-target queries answered by python library builders for their
/// dependents.
pub trait PythonLibraryOps {
    fn transitive_packages(&self, builders: &BuilderMap) -> Result<BTreeSet<String>>;
    fn transitive_entry_points(&self, builders: &BuilderMap)
        -> Result<BTreeMap<String, Vec<String>>>;
    fn transitive_package_data(&self, builders: &BuilderMap)
        -> Result<BTreeMap<String, Vec<String>>>;
    /// Installs this library (and its library dependencies) into a binary's
    /// virtualenv.
    fn install_into_virtualenv(&self, builders: &BuilderMap, virtualenv_dir: &Path) -> Result<()>;
}

pub struct PythonLibraryBuilder {
    target: Arc<BuildTarget>,
    lib: PythonLibrary,
}

impl PythonLibraryBuilder {
    pub fn new(target: Arc<BuildTarget>, lib: PythonLibrary) -> Self {
        Self { target, lib }
    }

    /// Creates missing `__init__.py` markers along the path from the source
    /// root down to the target's directory and inside every declared package.
    fn create_package_markers(&self) -> Result<()> {
        info!("Creating missing {PACKAGE_MARKER} files");
        let mut dir = self.target.layout.source_root.clone();
        for part in self
            .target
            .id
            .path()
            .split('/')
            .filter(|part| !part.is_empty())
        {
            dir.push(part);
            touch_package_marker(&dir)?;
        }

        for package in &self.lib.packages {
            let mut dir = self.target.layout.source_root.clone();
            for part in package.split('.') {
                dir.push(part);
            }
            touch_package_marker(&dir)?;
        }
        Ok(())
    }
}

fn touch_package_marker(dir: &Path) -> Result<()> {
    let marker = dir.join(PACKAGE_MARKER);
    if marker.exists() {
        return Ok(());
    }
    create_dir_all(dir).with_context(|| format!("mkdir -p {}", dir.display()))?;
    debug!("Creating empty file: {}", marker.display());
    File::create(&marker).with_context(|| format!("Failed to create {}", marker.display()))?;
    Ok(())
}

impl Builder for PythonLibraryBuilder {
    fn target(&self) -> &BuildTarget {
        &self.target
    }

    fn as_python_library(&self) -> Option<&dyn PythonLibraryOps> {
        Some(self)
    }

    fn create_source_tree(&self) -> Result<()> {
        info!("Copying {} into source tree", self.target.id);
        for file in self.lib.srcs.iter().chain(self.lib.data_files.iter()) {
            let src = self.target.layout.working_copy_dir.join(file);
            let dest = self.target.layout.source_dir.join(file);
            fileutil::mirror_file(&src, &dest)?;
        }
        self.create_package_markers()
    }
}

impl PythonLibraryOps for PythonLibraryBuilder {
    fn transitive_packages(&self, builders: &BuilderMap) -> Result<BTreeSet<String>> {
        let mut packages: BTreeSet<String> = self.lib.packages.iter().cloned().collect();
        for dep_id in &self.target.dep_ids {
            if let Some(lib) = lookup(builders, dep_id)?.as_python_library() {
                packages.extend(lib.transitive_packages(builders)?);
            }
        }
        Ok(packages)
    }

    fn transitive_entry_points(
        &self,
        builders: &BuilderMap,
    ) -> Result<BTreeMap<String, Vec<String>>> {
        let mut entry_points = self.lib.entry_points.clone();
        for dep_id in &self.target.dep_ids {
            if let Some(lib) = lookup(builders, dep_id)?.as_python_library() {
                entry_points.extend(lib.transitive_entry_points(builders)?);
            }
        }
        Ok(entry_points)
    }

    fn transitive_package_data(
        &self,
        builders: &BuilderMap,
    ) -> Result<BTreeMap<String, Vec<String>>> {
        let own_package = self
            .target
            .id
            .path()
            .trim_start_matches('/')
            .replace('/', ".");
        let mut package_data = BTreeMap::from([(own_package, self.lib.data_files.clone())]);
        for dep_id in &self.target.dep_ids {
            if let Some(lib) = lookup(builders, dep_id)?.as_python_library() {
                package_data.extend(lib.transitive_package_data(builders)?);
            }
        }
        Ok(package_data)
    }

    fn install_into_virtualenv(&self, builders: &BuilderMap, virtualenv_dir: &Path) -> Result<()> {
        // First-party sources are installed by the generated setup script;
        // only the library dependencies need a visit.
        for dep_id in &self.target.dep_ids {
            if let Some(lib) = lookup(builders, dep_id)?.as_python_library() {
                lib.install_into_virtualenv(builders, virtualenv_dir)?;
            }
        }
        Ok(())
    }
}

pub struct PythonThirdPartyLibraryBuilder {
    target: Arc<BuildTarget>,
    lib: PythonThirdPartyLibrary,
}

impl PythonThirdPartyLibraryBuilder {
    pub fn new(target: Arc<BuildTarget>, lib: PythonThirdPartyLibrary) -> Self {
        Self { target, lib }
    }
}

impl Builder for PythonThirdPartyLibraryBuilder {
    fn target(&self) -> &BuildTarget {
        &self.target
    }

    fn as_python_library(&self) -> Option<&dyn PythonLibraryOps> {
        Some(self)
    }

    fn create_source_tree(&self) -> Result<()> {
        info!(
            "Copying {} into source tree from {}",
            self.target.id, self.lib.lib_dir
        );
        let from = self.target.layout.working_copy_dir.join(&self.lib.lib_dir);
        let to = self.target.layout.source_dir.join(&self.lib.lib_dir);
        fileutil::mirror_tree(&from, &to)
    }
}

impl PythonLibraryOps for PythonThirdPartyLibraryBuilder {
    fn transitive_packages(&self, _builders: &BuilderMap) -> Result<BTreeSet<String>> {
        Ok(BTreeSet::new())
    }

    fn transitive_entry_points(
        &self,
        _builders: &BuilderMap,
    ) -> Result<BTreeMap<String, Vec<String>>> {
        Ok(BTreeMap::new())
    }

    fn transitive_package_data(
        &self,
        _builders: &BuilderMap,
    ) -> Result<BTreeMap<String, Vec<String>>> {
        Ok(BTreeMap::new())
    }

    fn install_into_virtualenv(&self, builders: &BuilderMap, virtualenv_dir: &Path) -> Result<()> {
        for dep_id in &self.target.dep_ids {
            if let Some(lib) = lookup(builders, dep_id)?.as_python_library() {
                lib.install_into_virtualenv(builders, virtualenv_dir)?;
            }
        }

        info!("Installing {} into the build environment", self.target.id);
        let python = virtualenv_dir.join("bin/python");
        let setup_dir = self.target.layout.source_dir.join(&self.lib.setup_py_dir);
        processes::run_captured(
            Command::new(python)
                .arg("setup.py")
                .arg("install")
                .current_dir(&setup_dir),
        )
        .with_context(|| format!("Library install failed for {}", self.target.id))?;
        Ok(())
    }
}

pub struct PythonBinaryBuilder {
    target: Arc<BuildTarget>,
    bin: PythonBinary,
    virtualenv_tool: PathBuf,
    install_method: InstallMethod,
}

impl PythonBinaryBuilder {
    pub fn new(
        target: Arc<BuildTarget>,
        bin: PythonBinary,
        session: &crate::session::BuildSession,
    ) -> Self {
        Self {
            virtualenv_tool: virtualenv_tool_path(session.repo_root()),
            install_method: session.plugin_args().python_install_method,
            target,
            bin,
        }
    }
}

impl Builder for PythonBinaryBuilder {
    fn target(&self) -> &BuildTarget {
        &self.target
    }

    fn as_package_installable(&self) -> Option<&dyn PackageInstallOps> {
        Some(self)
    }

    fn pre_create_source_tree(&self, builders: &BuilderMap) -> Result<()> {
        info!(
            "Creating setup-{}.py for {}",
            self.target.id.name(),
            self.target.id
        );

        let mut packages = path_packages(self.target.id.path());
        let mut entry_points = BTreeMap::new();
        let mut package_data = BTreeMap::new();
        for dep_id in &self.target.dep_ids {
            if let Some(lib) = lookup(builders, dep_id)?.as_python_library() {
                packages.extend(lib.transitive_packages(builders)?);
                entry_points.extend(lib.transitive_entry_points(builders)?);
                package_data.extend(lib.transitive_package_data(builders)?);
            }
        }

        let text = generate_setup_py(
            self.target.id.name(),
            &packages,
            &self.bin.console_script,
            &entry_points,
            &package_data,
        );
        debug!("Setup script contents:\n{text}");

        let parent = self
            .bin
            .setup_py_path
            .parent()
            .with_context(|| format!("{} has no parent", self.bin.setup_py_path.display()))?;
        create_dir_all(parent).with_context(|| format!("mkdir -p {}", parent.display()))?;
        std::fs::write(&self.bin.setup_py_path, text)
            .with_context(|| format!("Failed to write {}", self.bin.setup_py_path.display()))
    }

    fn create_build_environment(&self) -> Result<()> {
        info!("Creating virtualenv for {}", self.target.id);
        debug!(
            "Absolute path for virtualenv: {}",
            self.bin.virtualenv_dir.display()
        );
        processes::run_captured(
            Command::new(DEFAULT_PYTHON)
                .arg(&self.virtualenv_tool)
                .arg("--no-site-packages")
                .arg("--never-download")
                .arg("--distribute")
                .arg(&self.bin.virtualenv_dir),
        )
        .with_context(|| format!("Virtualenv creation failed for {}", self.target.id))?;
        Ok(())
    }

    fn pre_build_binary_library_install(&self, builders: &BuilderMap) -> Result<()> {
        info!("Installing libraries for binary build of {}", self.target.id);
        for dep_id in &self.target.dep_ids {
            if let Some(lib) = lookup(builders, dep_id)?.as_python_library() {
                lib.install_into_virtualenv(builders, &self.bin.virtualenv_dir)?;
            }
        }
        Ok(())
    }

    fn build_binary(&self) -> Result<()> {
        info!("Installing {} into its virtualenv", self.target.id);
        let python = self.bin.virtualenv_dir.join("bin/python");
        processes::run_captured(
            Command::new(python)
                .arg(&self.bin.setup_py_path)
                .arg(self.install_method.setup_command())
                .current_dir(&self.target.layout.source_root),
        )
        .with_context(|| format!("Install failed for {}", self.target.id))?;
        Ok(())
    }

    fn build_package(&self) -> Result<()> {
        info!("Making built virtualenv relocatable for {}", self.target.id);
        processes::run_captured(
            Command::new(DEFAULT_PYTHON)
                .arg(&self.virtualenv_tool)
                .arg("--relocatable")
                .arg(&self.bin.virtualenv_dir),
        )
        .with_context(|| {
            format!(
                "Making virtualenv relocatable failed for {}",
                self.target.id
            )
        })?;
        Ok(())
    }
}

impl PackageInstallOps for PythonBinaryBuilder {
    fn install_into_package(&self, _builders: &BuilderMap, dest: &PackageDest) -> Result<()> {
        let name = self.target.id.name();
        info!(
            "Copying binary for {} to package {}",
            self.target.id, dest.package_name
        );
        let lib_dir = fileutil::join_absolute(dest.hierarchy_dir, Path::new(dest.lib_dir))?;
        let virtualenv_dest = lib_dir
            .join(dest.package_name)
            .join(format!("{name}-virtualenv"));
        fileutil::copy_tree(&self.bin.virtualenv_dir, &virtualenv_dest)?;

        info!(
            "Creating wrapper script for {} for package {}",
            self.target.id, dest.package_name
        );
        let wrapper_dir = fileutil::join_absolute(dest.hierarchy_dir, Path::new(dest.bin_dir))?;
        create_dir_all(&wrapper_dir)
            .with_context(|| format!("mkdir -p {}", wrapper_dir.display()))?;
        let wrapper_path = wrapper_dir.join(name);

        let exec_target = pathdiff::diff_paths(&virtualenv_dest, &wrapper_dir)
            .with_context(|| {
                format!(
                    "cannot relativize {} against {}",
                    virtualenv_dest.display(),
                    wrapper_dir.display()
                )
            })?
            .join("bin")
            .join(name);
        std::fs::write(&wrapper_path, generate_wrapper_script(&exec_target))
            .with_context(|| format!("Failed to write {}", wrapper_path.display()))?;
        set_permissions(&wrapper_path, Permissions::from_mode(0o755))
            .with_context(|| format!("chmod 0755 {}", wrapper_path.display()))?;
        Ok(())
    }
}

/// Dotted package names for the ancestor directories of a target path,
/// excluding the target's own directory.
fn path_packages(path: &str) -> BTreeSet<String> {
    let parts: Vec<&str> = path
        .trim_start_matches('/')
        .split('/')
        .filter(|part| !part.is_empty())
        .collect();
    (1..parts.len()).map(|i| parts[..i].join(".")).collect()
}

fn generate_setup_py(
    name: &str,
    packages: &BTreeSet<String>,
    console_script: &str,
    entry_points: &BTreeMap<String, Vec<String>>,
    package_data: &BTreeMap<String, Vec<String>>,
) -> String {
    let packages_literal = packages.iter().map(|p| format!("'{p}'")).join(",");
    let mut extra_entry_points = String::new();
    for (section, entries) in entry_points {
        extra_entry_points.push_str(&format!("        '{section}': [\n"));
        for entry in entries {
            extra_entry_points.push_str(&format!("            '{entry}',\n"));
        }
        extra_entry_points.push_str("        ],\n");
    }
    let package_data_literal = format!(
        "{{{}}}",
        package_data
            .iter()
            .map(|(package, files)| {
                let files = files.iter().map(|f| format!("'{f}'")).join(", ");
                format!("'{package}': [{files}]")
            })
            .join(", ")
    );

    let mut text = String::new();
    text.push_str("import setuptools\n\n");
    text.push_str("setuptools.setup(\n");
    text.push_str(&format!("    name='{name}',\n"));
    text.push_str(&format!("    packages=[{packages_literal}],\n"));
    text.push_str("    entry_points={\n");
    text.push_str("        'console_scripts': [\n");
    text.push_str(&format!("            '{name} = {console_script}',\n"));
    text.push_str("        ],\n");
    text.push_str(&extra_entry_points);
    text.push_str("    },\n");
    text.push_str(&format!("    package_data={package_data_literal},\n"));
    text.push_str(")\n");
    text
}

/// A wrapper that re-execs the entry point relative to its own location, so
/// the installed package works from any prefix.
fn generate_wrapper_script(exec_target: &Path) -> String {
    format!(
        "#!/usr/bin/env bash\n\
         \n\
         set -e\n\
         \n\
         DIR=\"$( cd -P \"$( dirname \"$0\" )\" && pwd )\"\n\
         exec ${{DIR}}/{} \"$@\"\n",
        exec_target.display()
    )
}
