// Copyright 2025 The Hackbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::os::unix::process::CommandExt;
use std::process::Command;

use anyhow::{bail, Result};
use tracing::info;

use hackbuild::plugins::{PluginArgs, PluginRegistry};
use hackbuild::repo::find_repo_root;
use hackbuild::resolver::TargetResolver;
use hackbuild::session::BuildSession;
use hackbuild::target::{Normalizer, TargetID, TargetKind};

#[derive(clap::Args, Debug)]
pub struct Args {
    /// Target id of the binary to run.
    #[arg(value_name = "TARGET")]
    target: String,

    /// Command line arguments for the target.
    #[arg(value_name = "ARGS", last = true)]
    args: Vec<String>,
}

pub fn run(args: Args, registry: PluginRegistry, plugin_args: PluginArgs) -> Result<()> {
    info!("Entering run mode");

    let repo_root = find_repo_root(&std::env::current_dir()?)?;
    info!("Repository root: {}", repo_root.display());

    let normalizer = Normalizer::new(&repo_root)?;
    let session = BuildSession::new(normalizer, registry, plugin_args);
    let resolver = TargetResolver::new(&session);

    let id = session
        .normalizer()
        .normalize(&TargetID::parse(&args.target)?)?;
    let target = resolver.resolve(&id)?;
    let bin_path = match &target.kind {
        TargetKind::PythonBinary(bin) => bin.bin_path.clone(),
        _ => bail!("target ({id}) is not a runnable binary"),
    };

    info!("Execing: {} {}", bin_path.display(), args.args.join(" "));
    let err = Command::new(&bin_path).args(&args.args).exec();
    Err(anyhow::Error::new(err).context(format!("Failed to exec {}", bin_path.display())))
}
