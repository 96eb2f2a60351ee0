// Copyright 2025 The Hackbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::process::{Command, ExitStatus, Stdio};

use anyhow::Context;
use tracing::instrument;

/// Captured streams of a command that exited with status zero.
#[derive(Clone, Debug)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Error raised when a captured-stream command could not run to success.
///
/// [`CommandError::Failed`] allows callers to inspect the exit status and the
/// streams the tool actually produced.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(
        "command {argv:?} exited with {status}\n\
         --- stdout ---\n{stdout}\n\
         --- stderr ---\n{stderr}"
    )]
    Failed {
        argv: Vec<String>,
        status: ExitStatus,
        stdout: String,
        stderr: String,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Runs a command to completion with stdin closed and both output streams
/// captured.
///
/// A non-zero exit becomes [`CommandError::Failed`] carrying the command
/// line, the exit status and both captured streams.
#[instrument(skip_all, fields(command = %cmd.get_program().to_string_lossy()))]
pub fn run_captured(cmd: &mut Command) -> Result<CapturedOutput, CommandError> {
    let argv: Vec<String> = std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();

    let output = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .with_context(|| format!("Failed to spawn {argv:?}"))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if !output.status.success() {
        return Err(CommandError::Failed {
            argv,
            status: output.status,
            stdout,
            stderr,
        });
    }
    Ok(CapturedOutput { stdout, stderr })
}
