// Copyright 2025 The Hackbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Loading and evaluation of per-directory `HACK_BUILD` descriptors.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::info;

use crate::plugins::RuleCtx;
use crate::session::BuildSession;
use crate::target::BuildTarget;

/// Name of the build descriptor file looked up in each target directory.
pub const DESCRIPTOR_FILE_NAME: &str = "HACK_BUILD";

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{path}: unknown rule ({name})")]
    UnknownRule { path: PathBuf, name: String },
    #[error("{path}: rule ({name}) takes a table or an array of tables")]
    MalformedRule { path: PathBuf, name: String },
}

/// Evaluates descriptors and caches the declared target set per directory.
///
/// A descriptor is a TOML document whose top-level keys are rule names
/// contributed by the active plugins; each table under a key is one rule
/// invocation. Rule functions enqueue the targets they construct on the
/// session's discovery queue, which is drained completely after every
/// evaluation.
pub struct DescriptorEvaluator {
    cache: Mutex<HashMap<String, Arc<BTreeSet<Arc<BuildTarget>>>>>,
}

impl DescriptorEvaluator {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the targets declared by the descriptor in the repository
    /// directory `descriptor_dir`, evaluating it at most once.
    pub fn targets_for_dir(
        &self,
        session: &BuildSession,
        descriptor_dir: &str,
    ) -> Result<Arc<BTreeSet<Arc<BuildTarget>>>> {
        if let Some(cached) = self.cache.lock().unwrap().get(descriptor_dir) {
            return Ok(Arc::clone(cached));
        }

        let targets = Arc::new(self.evaluate(session, descriptor_dir)?);
        self.cache
            .lock()
            .unwrap()
            .insert(descriptor_dir.to_owned(), Arc::clone(&targets));
        Ok(targets)
    }

    fn evaluate(
        &self,
        session: &BuildSession,
        descriptor_dir: &str,
    ) -> Result<BTreeSet<Arc<BuildTarget>>> {
        let rules = session.registry().merged_rules()?;
        let path = descriptor_file_path(session.repo_root(), descriptor_dir);
        info!("Loading build descriptor: {}", path.display());

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let table: toml::Table = text.parse().map_err(|source| DescriptorError::Parse {
            path: path.clone(),
            source,
        })?;

        let ctx = RuleCtx {
            session,
            descriptor_dir,
        };
        let result = (|| -> Result<()> {
            for (rule_name, value) in table {
                let rule =
                    rules
                        .get(rule_name.as_str())
                        .ok_or_else(|| DescriptorError::UnknownRule {
                            path: path.clone(),
                            name: rule_name.clone(),
                        })?;
                match value {
                    toml::Value::Table(_) => rule(&ctx, value)?,
                    toml::Value::Array(items) => {
                        for item in items {
                            if !item.is_table() {
                                return Err(DescriptorError::MalformedRule {
                                    path: path.clone(),
                                    name: rule_name.clone(),
                                }
                                .into());
                            }
                            rule(&ctx, item)?;
                        }
                    }
                    _ => {
                        return Err(DescriptorError::MalformedRule {
                            path: path.clone(),
                            name: rule_name.clone(),
                        }
                        .into())
                    }
                }
            }
            Ok(())
        })();

        // Drain unconditionally: a failing rule must not leave targets behind
        // for the next descriptor's evaluation.
        let targets = session.drain_discovered();
        result?;
        Ok(targets)
    }
}

impl Default for DescriptorEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// Absolute filesystem path of the descriptor in the repository directory
/// `descriptor_dir`.
pub fn descriptor_file_path(repo_root: &Path, descriptor_dir: &str) -> PathBuf {
    repo_root
        .join(descriptor_dir.trim_start_matches('/'))
        .join(DESCRIPTOR_FILE_NAME)
}
