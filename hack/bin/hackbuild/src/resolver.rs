// Copyright 2025 The Hackbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Locating declared targets and materializing their dependency trees.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;

use crate::descriptor::DescriptorEvaluator;
use crate::session::BuildSession;
use crate::target::{BuildTarget, TargetError, TargetID};

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ResolveError {
    #[error("no build target found for target id ({0})")]
    TargetNotFound(TargetID),
    #[error("dependency cycle detected involving {0}")]
    DependencyCycle(TargetID),
}

/// A dependency tree: each target maps to the trees of its dependencies.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DepTree(pub BTreeMap<Arc<BuildTarget>, DepTree>);

/// Answers target lookups against the repository's descriptors.
pub struct TargetResolver<'a> {
    session: &'a BuildSession,
    evaluator: DescriptorEvaluator,
}

impl<'a> TargetResolver<'a> {
    pub fn new(session: &'a BuildSession) -> Self {
        Self {
            session,
            evaluator: DescriptorEvaluator::new(),
        }
    }

    /// Resolves a normalized target id to the target its descriptor declares.
    pub fn resolve(&self, id: &TargetID) -> Result<Arc<BuildTarget>> {
        if !id.is_normalized() {
            return Err(TargetError::NotNormalized(id.clone()).into());
        }
        let targets = self.evaluator.targets_for_dir(self.session, id.path())?;
        targets
            .iter()
            .find(|target| &target.id == id)
            .cloned()
            .ok_or_else(|| ResolveError::TargetNotFound(id.clone()).into())
    }

    /// Materializes the transitive dependency tree of a resolved target.
    pub fn dep_tree(&self, target: &Arc<BuildTarget>) -> Result<DepTree> {
        self.dep_tree_inner(target, &mut Vec::new())
    }

    fn dep_tree_inner(
        &self,
        target: &Arc<BuildTarget>,
        in_progress: &mut Vec<TargetID>,
    ) -> Result<DepTree> {
        if in_progress.contains(&target.id) {
            return Err(ResolveError::DependencyCycle(target.id.clone()).into());
        }
        in_progress.push(target.id.clone());
        let mut deps = BTreeMap::new();
        for dep_id in &target.dep_ids {
            let dep = self.resolve(dep_id)?;
            let subtree = self.dep_tree_inner(&dep, in_progress)?;
            deps.insert(dep, subtree);
        }
        in_progress.pop();
        Ok(DepTree(deps))
    }
}
