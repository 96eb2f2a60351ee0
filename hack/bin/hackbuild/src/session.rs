// Copyright 2025 The Hackbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::path::Path;
use std::sync::Arc;

use crate::plugins::{PluginArgs, PluginRegistry};
use crate::target::{BuildTarget, Normalizer};

/// Per-invocation state threaded through descriptor evaluation and target
/// resolution: the normalizer, the plugin registry, the parsed plugin
/// options, and the discovery queue descriptor rules enqueue targets on.
pub struct BuildSession {
    normalizer: Normalizer,
    registry: PluginRegistry,
    plugin_args: PluginArgs,
    discovered: RefCell<VecDeque<BuildTarget>>,
}

impl BuildSession {
    pub fn new(normalizer: Normalizer, registry: PluginRegistry, plugin_args: PluginArgs) -> Self {
        Self {
            normalizer,
            registry,
            plugin_args,
            discovered: RefCell::new(VecDeque::new()),
        }
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn repo_root(&self) -> &Path {
        self.normalizer.repo_root()
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn plugin_args(&self) -> &PluginArgs {
        &self.plugin_args
    }

    /// Enqueues a target declared by a descriptor rule invocation.
    pub fn discover(&self, target: BuildTarget) {
        self.discovered.borrow_mut().push_back(target);
    }

    /// Drains the discovery queue completely, so targets declared by one
    /// descriptor never leak into the next evaluation.
    pub fn drain_discovered(&self) -> BTreeSet<Arc<BuildTarget>> {
        self.discovered
            .borrow_mut()
            .drain(..)
            .map(Arc::new)
            .collect()
    }
}
