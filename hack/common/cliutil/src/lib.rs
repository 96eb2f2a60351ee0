// Copyright 2025 The Hackbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Provides functions common to the hack command-line programs.

use std::fmt::Debug;
use std::process::{ExitCode, Termination};

use anyhow::{anyhow, Context, Result};
use itertools::Itertools;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

/// Installs the standard logging subscriber: a console layer on stderr at
/// INFO by default, overridable through `RUST_LOG`.
pub fn init_logging() -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!(e))
        .context("Failed to install the logging subscriber")
}

/// Wraps a CLI main function to provide the common startup/cleanup logic.
pub fn cli_main<F, T, E>(main: F) -> ExitCode
where
    F: FnOnce() -> Result<T, E>,
    T: Termination,
    E: Debug,
{
    if let Err(error) = init_logging() {
        eprintln!("ERROR: {:?}", error);
        return ExitCode::FAILURE;
    }
    log_current_command_line();
    handle_top_level_result(main())
}

/// Logs the command line of the current process.
///
/// You don't need this function if you use [`cli_main`] because it calls this
/// function for you.
pub fn log_current_command_line() {
    let escaped_command = std::env::args()
        .map(|s| shell_escape::escape(s.into()))
        .join(" ");
    tracing::debug!("COMMAND: {}", escaped_command);
}

/// Handles the top-level [`Result`] and returns the [`ExitCode`] to report.
pub fn handle_top_level_result<T: Termination, E: Debug>(result: Result<T, E>) -> ExitCode {
    match result {
        Err(error) => {
            eprintln!("ERROR: {:?}", error);
            if std::env::var("RUST_BACKTRACE").is_err() {
                eprintln!("Hint: Set RUST_BACKTRACE=1 to print stack traces");
            }
            ExitCode::FAILURE
        }
        Ok(value) => value.report(),
    }
}
