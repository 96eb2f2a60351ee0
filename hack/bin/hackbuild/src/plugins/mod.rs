// Copyright 2025 The Hackbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The plugin registry and the shipped descriptor-rule plugins.

pub mod debian;
pub mod macosx;
pub mod python;
pub mod upstart;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::Result;
use clap::{ArgMatches, Command};
use thiserror::Error;

use crate::session::BuildSession;
use crate::target::{BuildTarget, Normalizer, TargetID};

/// Context handed to a rule function for one descriptor invocation.
pub struct RuleCtx<'a> {
    pub session: &'a BuildSession,
    /// Repository path of the directory whose descriptor is being evaluated.
    pub descriptor_dir: &'a str,
}

impl RuleCtx<'_> {
    pub fn normalizer(&self) -> &Normalizer {
        self.session.normalizer()
    }

    pub fn repo_root(&self) -> &Path {
        self.session.repo_root()
    }

    /// Enqueues a constructed target on the session's discovery queue.
    pub fn discover(&self, target: BuildTarget) {
        self.session.discover(target);
    }

    /// Normalizes a rule's `deps` list of target id strings against the
    /// descriptor's directory.
    pub fn normalized_deps(&self, deps: &[String]) -> Result<BTreeSet<TargetID>> {
        let mut normalized = BTreeSet::new();
        for dep in deps {
            let dep_id = TargetID::parse(dep)?;
            normalized.insert(
                self.normalizer()
                    .normalize_in_descriptor(&dep_id, self.descriptor_dir)?,
            );
        }
        Ok(normalized)
    }
}

/// A rule function: builds a target from one descriptor invocation and
/// enqueues it through the context.
pub type RuleFn = fn(&RuleCtx, toml::Value) -> Result<()>;

/// Rule name to rule function, merged across plugins.
pub type RuleMap = BTreeMap<&'static str, RuleFn>;

/// Options contributed by plugin command-line extensions, shared back to the
/// plugins after argument parsing.
#[derive(Clone, Debug, Default)]
pub struct PluginArgs {
    pub python_install_method: python::InstallMethod,
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum PluginError {
    #[error("plugins define duplicate descriptor rules: {}", names.join(", "))]
    DuplicateRule { names: Vec<String> },
}

/// A unit contributing descriptor rules and, optionally, command-line
/// arguments.
pub trait Plugin {
    fn name(&self) -> &'static str;

    /// The descriptor rules this plugin contributes.
    fn rules(&self) -> RuleMap;

    /// Grafts the plugin's extra arguments onto the command line.
    fn register_args(&self, cmd: Command) -> Command {
        cmd
    }

    /// Receives the parsed command line once, before any descriptor is
    /// evaluated.
    fn receive_args(&self, _matches: &ArgMatches, _args: &mut PluginArgs) -> Result<()> {
        Ok(())
    }
}

/// The set of active plugins for one invocation.
pub struct PluginRegistry {
    plugins: Vec<Box<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new(plugins: Vec<Box<dyn Plugin>>) -> Self {
        Self { plugins }
    }

    /// The plugin set shipped with the tool.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(python::PythonPlugin),
            Box::new(debian::DebianPlugin),
            Box::new(macosx::MacPlugin),
            Box::new(upstart::UpstartPlugin),
        ])
    }

    pub fn register_args(&self, mut cmd: Command) -> Command {
        for plugin in &self.plugins {
            cmd = plugin.register_args(cmd);
        }
        cmd
    }

    pub fn receive_args(&self, matches: &ArgMatches) -> Result<PluginArgs> {
        let mut args = PluginArgs::default();
        for plugin in &self.plugins {
            plugin.receive_args(matches, &mut args)?;
        }
        Ok(args)
    }

    /// Merges every plugin's rule table into one map, failing when two
    /// plugins expose the same rule name. All duplicates are reported.
    pub fn merged_rules(&self) -> Result<RuleMap, PluginError> {
        let mut merged = RuleMap::new();
        let mut duplicates = BTreeSet::new();
        for plugin in &self.plugins {
            for (name, rule) in plugin.rules() {
                if merged.insert(name, rule).is_some() {
                    duplicates.insert(name.to_owned());
                }
            }
        }
        if !duplicates.is_empty() {
            return Err(PluginError::DuplicateRule {
                names: duplicates.into_iter().collect(),
            });
        }
        Ok(merged)
    }
}
