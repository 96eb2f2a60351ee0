// Copyright 2025 The Hackbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Target identity: ids, normalization, staging layout and target recipes.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::plugins::debian::DebianPackage;
use crate::plugins::macosx::MacPackage;
use crate::plugins::python::{PythonBinary, PythonLibrary, PythonThirdPartyLibrary};
use crate::plugins::upstart::UpstartScript;

/// Errors for malformed or misused target identifiers.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum TargetError {
    #[error("invalid target id: {reason}")]
    InvalidTargetId { reason: String },
    #[error("target id is not normalized: {0}")]
    NotNormalized(TargetID),
    #[error("path ({0}) is not within the repository")]
    OutsideRepository(String),
}

/// A regular expression matching the `PATH:NAME` textual form of a target id.
static TARGET_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<path>[^:]*)(:(?P<name>[^:]+))?$").unwrap());

/// Identifier of a build unit: a repository path plus the unit name declared
/// in that directory's descriptor.
///
/// The canonical textual form is `PATH:NAME`; the `:NAME` suffix is omitted
/// for ids without a name. Equality, ordering and hashing all follow the
/// canonical form. An id whose path starts with `/` is anchored at the
/// repository root; an id is *normalized* when it is both anchored and named.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TargetID {
    path: String,
    name: String,
}

impl TargetID {
    pub fn new(path: impl Into<String>, name: impl Into<String>) -> Result<Self, TargetError> {
        let path = path.into();
        let name = name.into();
        if path.contains(':') {
            return Err(TargetError::InvalidTargetId {
                reason: format!("target id path ({path}) cannot contain a colon"),
            });
        }
        if name.contains(':') {
            return Err(TargetError::InvalidTargetId {
                reason: format!("target id name ({name}) cannot contain a colon"),
            });
        }
        if path.ends_with('/') && path.len() > 1 {
            return Err(TargetError::InvalidTargetId {
                reason: format!(
                    "target id path ({path}) cannot end in \"/\" if not the repository root"
                ),
            });
        }
        Ok(Self { path, name })
    }

    pub fn parse(id_string: &str) -> Result<Self, TargetError> {
        let parts = TARGET_ID_RE
            .captures(id_string)
            .ok_or_else(|| TargetError::InvalidTargetId {
                reason: format!("invalid target id string: {id_string}"),
            })?;
        let path = parts.name("path").map_or("", |m| m.as_str());
        let name = parts.name("name").map_or("", |m| m.as_str());
        Self::new(path, name)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_absolute(&self) -> bool {
        self.path.starts_with('/')
    }

    pub fn is_relative(&self) -> bool {
        !self.is_absolute()
    }

    pub fn has_name(&self) -> bool {
        !self.name.is_empty()
    }

    pub fn is_normalized(&self) -> bool {
        self.is_absolute() && self.has_name()
    }
}

impl fmt::Display for TargetID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_name() {
            write!(f, "{}:{}", self.path, self.name)
        } else {
            f.write_str(&self.path)
        }
    }
}

/// Folds `.` and `..` components without touching the filesystem.
fn resolve_dots(path: &Path) -> PathBuf {
    let mut resolved = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            other => resolved.push(other),
        }
    }
    resolved
}

/// Rewrites target ids and paths into their repository-anchored form.
#[derive(Clone, Debug)]
pub struct Normalizer {
    repo_root: PathBuf,
}

impl Normalizer {
    /// Creates a normalizer for the repository at `repo_root`. A relative
    /// root is resolved against the current working directory.
    pub fn new(repo_root: impl AsRef<Path>) -> anyhow::Result<Self> {
        let repo_root = repo_root.as_ref();
        let absolute = if repo_root.is_absolute() {
            repo_root.to_owned()
        } else {
            std::env::current_dir()
                .context("Failed to get the current directory")?
                .join(repo_root)
        };
        Ok(Self {
            repo_root: resolve_dots(&absolute),
        })
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Normalizes a target id. Already-normalized ids are returned as-is;
    /// a relative path is resolved against the repository root. The name is
    /// preserved, even when empty.
    pub fn normalize(&self, id: &TargetID) -> Result<TargetID, TargetError> {
        if id.is_normalized() {
            return Ok(id.clone());
        }
        let path = if id.is_relative() {
            self.normalize_path(id.path())?
        } else {
            id.path().to_owned()
        };
        TargetID::new(path, id.name())
    }

    /// Resolves a path to its `/`-prefixed repository-relative form, failing
    /// when the result would escape the repository.
    pub fn normalize_path(&self, path: &str) -> Result<String, TargetError> {
        let resolved = resolve_dots(&self.repo_root.join(path));
        let rel = resolved
            .strip_prefix(&self.repo_root)
            .map_err(|_| TargetError::OutsideRepository(path.to_owned()))?;
        Ok(format!("/{}", rel.to_string_lossy()))
    }

    /// Normalizes a target id found in the descriptor at repository path
    /// `descriptor_dir`. Pure path concatenation; no filesystem access.
    pub fn normalize_in_descriptor(
        &self,
        id: &TargetID,
        descriptor_dir: &str,
    ) -> Result<TargetID, TargetError> {
        if id.is_normalized() {
            return Ok(id.clone());
        }
        let path = self.normalize_path_in_descriptor(id.path(), descriptor_dir);
        TargetID::new(path, id.name())
    }

    /// Normalizes a path found in the descriptor at repository path
    /// `descriptor_dir`: the empty path means the descriptor's own directory.
    pub fn normalize_path_in_descriptor(&self, path: &str, descriptor_dir: &str) -> String {
        if path.is_empty() {
            descriptor_dir.to_owned()
        } else if path.starts_with('/') {
            path.to_owned()
        } else {
            format!("{}/{}", descriptor_dir.trim_end_matches('/'), path)
        }
    }
}

/// Name of the staged source tree root, relative to the repository root.
pub const SOURCE_TREE_DIR: &str = "src";
/// Name of the build scratch root, relative to the repository root.
pub const BUILD_TREE_DIR: &str = "build";
/// Name of the package output root, relative to the repository root.
pub const PACKAGE_TREE_DIR: &str = "pkg";

/// The canonical staging directories of one target, derived from its id and
/// the repository root.
///
/// The build directory leaf carries a `-` prefix so it can never collide
/// with a subdirectory named after a sibling target.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StagingLayout {
    pub working_copy_dir: PathBuf,
    pub source_root: PathBuf,
    pub source_dir: PathBuf,
    pub build_dir: PathBuf,
    pub package_dir: PathBuf,
}

impl StagingLayout {
    pub fn for_target(id: &TargetID, repo_root: &Path) -> Result<Self, TargetError> {
        if !id.is_normalized() {
            return Err(TargetError::NotNormalized(id.clone()));
        }
        let rel = id.path().trim_start_matches('/');
        let source_root = repo_root.join(SOURCE_TREE_DIR);
        Ok(Self {
            working_copy_dir: repo_root.join(rel),
            source_dir: source_root.join(rel),
            build_dir: repo_root
                .join(BUILD_TREE_DIR)
                .join(rel)
                .join(format!("-{}", id.name())),
            package_dir: repo_root.join(PACKAGE_TREE_DIR),
            source_root,
        })
    }
}

/// Builder role tags used for the scheduler's pre-phase dispatch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    Library,
    Binary,
    Package,
    StartScript,
}

/// Per-flavor state of a build target.
#[derive(Clone, Debug)]
pub enum TargetKind {
    PythonLibrary(PythonLibrary),
    PythonThirdPartyLibrary(PythonThirdPartyLibrary),
    PythonBinary(PythonBinary),
    DebianPackage(DebianPackage),
    MacPackage(MacPackage),
    UpstartScript(UpstartScript),
}

impl TargetKind {
    pub fn role(&self) -> Role {
        match self {
            TargetKind::PythonLibrary(_) | TargetKind::PythonThirdPartyLibrary(_) => Role::Library,
            TargetKind::PythonBinary(_) => Role::Binary,
            TargetKind::DebianPackage(_) | TargetKind::MacPackage(_) => Role::Package,
            TargetKind::UpstartScript(_) => Role::StartScript,
        }
    }
}

/// A named artifact recipe declared by a descriptor rule.
///
/// The id is always normalized, and so is every dependency id. Two targets
/// compare equal exactly when their ids do.
#[derive(Clone, Debug)]
pub struct BuildTarget {
    pub id: TargetID,
    pub dep_ids: BTreeSet<TargetID>,
    pub layout: StagingLayout,
    pub kind: TargetKind,
}

impl BuildTarget {
    pub fn role(&self) -> Role {
        self.kind.role()
    }
}

impl PartialEq for BuildTarget {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for BuildTarget {}

impl PartialOrd for BuildTarget {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BuildTarget {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl std::hash::Hash for BuildTarget {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_id_with_path_and_name() -> Result<(), TargetError> {
        let id = TargetID::parse("/lev1/lev2:blah")?;
        assert_eq!(id.to_string(), "/lev1/lev2:blah");
        assert_eq!(id.path(), "/lev1/lev2");
        assert_eq!(id.name(), "blah");
        assert!(id.is_absolute());
        assert!(!id.is_relative());
        assert!(id.has_name());
        assert!(id.is_normalized());
        Ok(())
    }

    #[test]
    fn relative_id_with_path_and_name() -> Result<(), TargetError> {
        let id = TargetID::parse("../lev2:blah")?;
        assert_eq!(id.to_string(), "../lev2:blah");
        assert!(id.is_relative());
        assert!(id.has_name());
        assert!(!id.is_normalized());
        Ok(())
    }

    #[test]
    fn relative_id_without_path() -> Result<(), TargetError> {
        let id = TargetID::parse(":blah")?;
        assert_eq!(id.path(), "");
        assert_eq!(id.name(), "blah");
        assert!(id.is_relative());
        Ok(())
    }

    #[test]
    fn absolute_id_without_name() -> Result<(), TargetError> {
        let id = TargetID::parse("/lev1/lev2")?;
        assert_eq!(id.path(), "/lev1/lev2");
        assert_eq!(id.name(), "");
        assert!(id.is_absolute());
        assert!(!id.has_name());
        assert!(!id.is_normalized());
        Ok(())
    }

    #[test]
    fn relative_id_without_name() -> Result<(), TargetError> {
        let id = TargetID::parse("../lev2")?;
        assert_eq!(id.to_string(), "../lev2");
        assert!(id.is_relative());
        assert!(!id.has_name());
        Ok(())
    }

    #[test]
    fn trailing_slash_is_rejected() {
        assert!(matches!(
            TargetID::new("/testdir/", "testname"),
            Err(TargetError::InvalidTargetId { .. })
        ));
        assert!(matches!(
            TargetID::new("testdir/", "testname"),
            Err(TargetError::InvalidTargetId { .. })
        ));
    }

    #[test]
    fn repo_root_path_is_allowed() -> Result<(), TargetError> {
        let id = TargetID::new("/", "tool")?;
        assert_eq!(id.to_string(), "/:tool");
        Ok(())
    }

    #[test]
    fn colons_are_rejected() {
        assert!(TargetID::new("/a:b", "c").is_err());
        assert!(TargetID::new("/a", "b:c").is_err());
        assert!(TargetID::parse("/a:b:c").is_err());
    }

    #[test]
    fn parse_round_trips_canonical_form() -> Result<(), TargetError> {
        for s in ["/lev1/lev2:blah", "../lev2", ":blah", "/", "/x:y"] {
            let id = TargetID::parse(s)?;
            assert_eq!(TargetID::parse(&id.to_string())?, id);
        }
        Ok(())
    }

    #[test]
    fn normalize_relative_path() -> anyhow::Result<()> {
        let normalizer = Normalizer::new(".")?;
        assert_eq!(normalizer.normalize_path("lev2")?, "/lev2");
        Ok(())
    }

    #[test]
    fn normalize_is_identity_on_normalized_ids() -> anyhow::Result<()> {
        let normalizer = Normalizer::new("/repo")?;
        let id = TargetID::parse("/lev1:blah")?;
        assert_eq!(normalizer.normalize(&id)?, id);
        Ok(())
    }

    #[test]
    fn normalize_resolves_relative_ids() -> anyhow::Result<()> {
        let normalizer = Normalizer::new("/repo")?;
        let id = TargetID::parse("lev1/lev2:blah")?;
        let normalized = normalizer.normalize(&id)?;
        assert_eq!(normalized.to_string(), "/lev1/lev2:blah");
        assert!(normalized.is_normalized());
        Ok(())
    }

    #[test]
    fn normalize_rejects_escaping_paths() -> anyhow::Result<()> {
        let normalizer = Normalizer::new("/repo/inner")?;
        assert!(matches!(
            normalizer.normalize_path("../outside"),
            Err(TargetError::OutsideRepository(_))
        ));
        Ok(())
    }

    #[test]
    fn normalize_in_descriptor_joins_paths() -> anyhow::Result<()> {
        let normalizer = Normalizer::new("/repo")?;
        let empty = TargetID::parse(":tool")?;
        assert_eq!(
            normalizer
                .normalize_in_descriptor(&empty, "/srv/app")?
                .to_string(),
            "/srv/app:tool"
        );
        let nested = TargetID::parse("sub/dir:lib")?;
        assert_eq!(
            normalizer
                .normalize_in_descriptor(&nested, "/srv/app")?
                .to_string(),
            "/srv/app/sub/dir:lib"
        );
        Ok(())
    }

    #[test]
    fn staging_layout_paths() -> anyhow::Result<()> {
        let id = TargetID::parse("/srv/app:tool")?;
        let layout = StagingLayout::for_target(&id, Path::new("/repo"))?;
        assert_eq!(layout.working_copy_dir, Path::new("/repo/srv/app"));
        assert_eq!(layout.source_root, Path::new("/repo/src"));
        assert_eq!(layout.source_dir, Path::new("/repo/src/srv/app"));
        assert_eq!(layout.build_dir, Path::new("/repo/build/srv/app/-tool"));
        assert_eq!(layout.package_dir, Path::new("/repo/pkg"));
        Ok(())
    }

    #[test]
    fn staging_layout_requires_normalized_id() -> Result<(), TargetError> {
        let id = TargetID::parse("/srv/app")?;
        assert!(matches!(
            StagingLayout::for_target(&id, Path::new("/repo")),
            Err(TargetError::NotNormalized(_))
        ));
        Ok(())
    }
}
