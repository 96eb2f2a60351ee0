// Copyright 2025 The Hackbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Upstart service scripts installed into package hierarchies.

use std::fs::create_dir_all;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use itertools::Itertools;
use serde::Deserialize;
use tracing::{debug, info};

use crate::builder::{Builder, BuilderMap, PackageDest, PackageInstallOps};
use crate::plugins::{Plugin, RuleCtx, RuleFn, RuleMap};
use crate::target::{BuildTarget, StagingLayout, TargetID, TargetKind};

/// In-package directory receiving the generated service scripts.
const UPSTART_SCRIPT_DIR: &str = "/etc/init";

/// Upstart script state: the service name, the binary target to launch and
/// its launch arguments.
#[derive(Clone, Debug)]
pub struct UpstartScript {
    pub service_name: String,
    pub binary_id: TargetID,
    pub args: Vec<String>,
}

pub struct UpstartPlugin;

impl Plugin for UpstartPlugin {
    fn name(&self) -> &'static str {
        "upstart"
    }

    fn rules(&self) -> RuleMap {
        RuleMap::from([("upstart_script", upstart_script as RuleFn)])
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UpstartScriptParams {
    name: String,
    #[serde(default)]
    deps: Vec<String>,
    service_name: String,
    binary: String,
    #[serde(default)]
    args: Vec<String>,
}

fn upstart_script(ctx: &RuleCtx, args: toml::Value) -> Result<()> {
    let params: UpstartScriptParams =
        args.try_into().context("invalid upstart_script parameters")?;
    debug!("Descriptor target, Upstart script: {}", params.name);
    let id = TargetID::new(ctx.descriptor_dir, &params.name)?;
    let dep_ids = ctx.normalized_deps(&params.deps)?;
    let layout = StagingLayout::for_target(&id, ctx.repo_root())?;

    let binary_id = TargetID::parse(&params.binary)?;
    let binary_id = ctx
        .normalizer()
        .normalize_in_descriptor(&binary_id, ctx.descriptor_dir)?;
    let kind = TargetKind::UpstartScript(UpstartScript {
        service_name: params.service_name,
        binary_id,
        args: params.args,
    });
    ctx.discover(BuildTarget {
        id,
        dep_ids,
        layout,
        kind,
    });
    Ok(())
}

pub struct UpstartScriptBuilder {
    target: Arc<BuildTarget>,
    script: UpstartScript,
}

impl UpstartScriptBuilder {
    pub fn new(target: Arc<BuildTarget>, script: UpstartScript) -> Self {
        Self { target, script }
    }
}

impl Builder for UpstartScriptBuilder {
    fn target(&self) -> &BuildTarget {
        &self.target
    }

    fn as_package_installable(&self) -> Option<&dyn PackageInstallOps> {
        Some(self)
    }
}

impl PackageInstallOps for UpstartScriptBuilder {
    fn install_into_package(&self, _builders: &BuilderMap, dest: &PackageDest) -> Result<()> {
        info!(
            "Adding upstart script for {} to package {}",
            self.target.id, dest.package_name
        );

        let binary_path = format!("{}/{}", dest.bin_dir, self.script.binary_id.name());
        let text = generate_upstart_script(&self.script.service_name, &binary_path, &self.script.args);
        debug!("Upstart script text:\n{text}");

        let script_dir =
            fileutil::join_absolute(dest.hierarchy_dir, Path::new(UPSTART_SCRIPT_DIR))?;
        create_dir_all(&script_dir).with_context(|| format!("mkdir -p {}", script_dir.display()))?;
        let script_path = script_dir.join(format!("{}.conf", self.script.service_name));
        std::fs::write(&script_path, text)
            .with_context(|| format!("Failed to write {}", script_path.display()))
    }
}

fn generate_upstart_script(service_name: &str, binary_path: &str, args: &[String]) -> String {
    let args_str = args
        .iter()
        .map(|arg| shell_escape::escape(arg.as_str().into()))
        .join(" ");
    let exec_line = if args_str.is_empty() {
        format!("exec {binary_path}")
    } else {
        format!("exec {binary_path} {args_str}")
    };
    format!(
        "description \"{service_name}\"\n\
         \n\
         start on filesystem\n\
         stop on runlevel [!2345]\n\
         \n\
         umask 022\n\
         \n\
         {exec_line}\n"
    )
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn script_quotes_launch_arguments() {
        let text = generate_upstart_script(
            "webapp",
            "/usr/bin/webapp",
            &["--port".to_owned(), "80 80".to_owned()],
        );
        assert_eq!(
            text,
            "description \"webapp\"\n\
             \n\
             start on filesystem\n\
             stop on runlevel [!2345]\n\
             \n\
             umask 022\n\
             \n\
             exec /usr/bin/webapp --port '80 80'\n"
        );
    }

    #[test]
    fn script_without_arguments_has_bare_exec_line() {
        let text = generate_upstart_script("svc", "/bin/svc", &[]);
        assert!(text.ends_with("exec /bin/svc\n"));
    }

    #[test]
    fn install_writes_service_file_into_hierarchy() -> Result<()> {
        let repo = tempfile::TempDir::new()?;
        let id = TargetID::parse("/svc:web-script")?;
        let layout = StagingLayout::for_target(&id, repo.path())?;
        let target = Arc::new(BuildTarget {
            id,
            dep_ids: Default::default(),
            layout,
            kind: TargetKind::UpstartScript(UpstartScript {
                service_name: "web".to_owned(),
                binary_id: TargetID::parse("/svc:web")?,
                args: vec![],
            }),
        });
        let script = match &target.kind {
            TargetKind::UpstartScript(script) => script.clone(),
            _ => unreachable!(),
        };
        let builder = UpstartScriptBuilder::new(Arc::clone(&target), script);

        let hierarchy = repo.path().join("hierarchy");
        let dest = PackageDest {
            hierarchy_dir: &hierarchy,
            package_name: "websvc",
            bin_dir: "/usr/bin",
            lib_dir: "/usr/lib",
        };
        builder.install_into_package(&BuilderMap::new(), &dest)?;

        let written = std::fs::read_to_string(hierarchy.join("etc/init/web.conf"))?;
        assert!(written.contains("exec /usr/bin/web\n"));
        Ok(())
    }
}
