// Copyright 2025 The Hackbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

mod cmd_build;
mod cmd_clean;
mod cmd_run;

use std::process::ExitCode;

use anyhow::Result;
use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
use hackbuild::plugins::PluginRegistry;

#[derive(Parser, Debug)]
#[command(name = "hack")]
#[command(about = "Monorepo build and packaging tool", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build targets.
    Build(cmd_build::Args),
    /// Run a built binary target. Pass a "--" argument before any binary
    /// arguments that start with a dash.
    Run(cmd_run::Args),
    /// Remove the src, build and pkg staging trees.
    Clean,
    /// Show help for a subcommand.
    Help {
        /// Name of the command to get help for.
        #[arg(value_name = "SUBCOMMAND")]
        subcommand: Option<String>,
    },
}

fn main() -> ExitCode {
    cliutil::cli_main(inner_main)
}

fn inner_main() -> Result<()> {
    let registry = PluginRegistry::standard();
    let mut cmd = registry.register_args(Cli::command());
    let matches = cmd.get_matches_mut();
    let cli = Cli::from_arg_matches(&matches)?;
    let plugin_args = registry.receive_args(&matches)?;
    match cli.command {
        Commands::Build(args) => cmd_build::run(args, registry, plugin_args),
        Commands::Run(args) => cmd_run::run(args, registry, plugin_args),
        Commands::Clean => cmd_clean::run(),
        Commands::Help { subcommand } => print_help(cmd, subcommand),
    }
}

/// Prints help for the named subcommand, falling back to the top-level help
/// when the name is missing or not recognized.
fn print_help(mut cmd: clap::Command, subcommand: Option<String>) -> Result<()> {
    if let Some(name) = subcommand {
        if let Some(sub) = cmd.find_subcommand_mut(&name) {
            sub.print_help()?;
            return Ok(());
        }
    }
    cmd.print_help()?;
    Ok(())
}
