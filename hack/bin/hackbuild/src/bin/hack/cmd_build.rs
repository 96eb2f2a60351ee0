// Copyright 2025 The Hackbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::Result;
use tracing::info;

use hackbuild::build::Build;
use hackbuild::builder::builders_for_trees;
use hackbuild::plugins::{PluginArgs, PluginRegistry};
use hackbuild::repo::find_repo_root;
use hackbuild::resolver::{DepTree, TargetResolver};
use hackbuild::session::BuildSession;
use hackbuild::target::{Normalizer, TargetID};

#[derive(clap::Args, Debug)]
pub struct Args {
    /// Target ids to build.
    #[arg(value_name = "TARGET", required = true)]
    targets: Vec<String>,
}

pub fn run(args: Args, registry: PluginRegistry, plugin_args: PluginArgs) -> Result<()> {
    info!("Entering build mode");

    let repo_root = find_repo_root(&std::env::current_dir()?)?;
    info!("Repository root: {}", repo_root.display());

    let normalizer = Normalizer::new(&repo_root)?;
    let session = BuildSession::new(normalizer, registry, plugin_args);
    let resolver = TargetResolver::new(&session);

    let mut trees = DepTree::default();
    for target_str in &args.targets {
        let id = session
            .normalizer()
            .normalize(&TargetID::parse(target_str)?)?;
        info!("Building target: {id}");
        let root = resolver.resolve(&id)?;
        let deps = resolver.dep_tree(&root)?;
        trees.0.insert(root, deps);
    }

    let builders = builders_for_trees(&trees, &session);
    Build::new(session.repo_root(), trees, builders).build()
}
