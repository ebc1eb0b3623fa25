//! Building formulae from source.
//!
//! A formula's `install` steps are argv templates. Placeholders are expanded per build:
//!
//! | Placeholder | Expands to                                       |
//! |-------------|--------------------------------------------------|
//! | `{prefix}`  | the keg path being installed into                |
//! | `{name}`    | the formula name                                 |
//! | `{version}` | the package version (revision included)          |
//! | `{options}` | the used options, one argument each              |
//!
//! Steps run in the staged source directory through the [`SandboxedExecutor`]. A build
//! that exits cleanly but leaves the keg empty is an [`InstallError::EmptyInstallation`].

use crate::error::{InstallError, Result};
use crate::exec::{CommandSpec, SandboxedExecutor, run_checked};
use crate::extract;
use crate::formula::Formula;
use crate::keg::Keg;
use anyhow::Context;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Compilers any of which makes a source build possible
const COMPILERS: &[&str] = &["cc", "clang", "gcc"];

/// Whether a usable build toolchain is present
pub trait DevelopmentTools: Send + Sync {
    fn installed(&self) -> bool;
}

/// Looks for a C compiler on `PATH`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDevelopmentTools;

impl DevelopmentTools for SystemDevelopmentTools {
    fn installed(&self) -> bool {
        COMPILERS.iter().any(|compiler| which::which(compiler).is_ok())
    }
}

/// Values substituted into install step templates
#[derive(Debug, Clone)]
pub struct TemplateVars<'a> {
    pub prefix: &'a Path,
    pub name: &'a str,
    pub version: &'a str,
    pub options: &'a [String],
}

/// Expand one argv template.
///
/// An argument that is exactly `{options}` becomes one argument per option (possibly
/// none); elsewhere `{options}` is replaced by the space-joined list.
pub fn expand_template(template: &[String], vars: &TemplateVars<'_>) -> Vec<String> {
    let prefix = vars.prefix.display().to_string();
    let joined = vars.options.join(" ");

    let mut argv = Vec::with_capacity(template.len());
    for arg in template {
        if arg == "{options}" {
            argv.extend(vars.options.iter().cloned());
            continue;
        }
        argv.push(
            arg.replace("{prefix}", &prefix)
                .replace("{name}", vars.name)
                .replace("{version}", vars.version)
                .replace("{options}", &joined),
        );
    }
    argv
}

/// Runs a formula's install steps against a staged source tree
pub struct SourceBuilder {
    executor: Arc<dyn SandboxedExecutor>,
    sandbox: bool,
}

impl SourceBuilder {
    pub fn new(executor: Arc<dyn SandboxedExecutor>, sandbox: bool) -> Self {
        Self { executor, sandbox }
    }

    /// Build `formula` from `source` into `keg`.
    ///
    /// Blocks until every step has exited; async callers run it on the blocking pool.
    /// On failure the keg directory may be partially populated; the caller removes it.
    pub fn build(
        &self,
        formula: &Formula,
        source: &[u8],
        source_filename: &str,
        keg: &Keg,
        options: &[String],
    ) -> Result<()> {
        let staging = tempfile::Builder::new()
            .prefix("pourover-build-")
            .tempdir()
            .context("Failed to create build directory")?;
        let workdir = extract::stage_source(source, source_filename, staging.path())?;

        fs::create_dir_all(keg.path())
            .with_context(|| format!("Failed to create keg: {}", keg.path().display()))?;

        let vars = TemplateVars {
            prefix: keg.path(),
            name: &formula.name,
            version: keg.version(),
            options,
        };

        for step in &formula.install {
            let argv = expand_template(step, &vars);
            if argv.is_empty() {
                continue;
            }

            let mut cmd = CommandSpec::new(argv).current_dir(&workdir);
            if self.sandbox {
                cmd = cmd.sandboxed(vec![keg.path().to_path_buf(), staging.path().to_path_buf()]);
            }

            let output = run_checked(self.executor.as_ref(), &cmd)?;
            for line in &output.lines {
                tracing::debug!("{}: {}", formula.name, line.text);
            }
        }

        if !keg.is_installed() {
            return Err(InstallError::EmptyInstallation(format!(
                "{} built without installing anything into {}",
                formula.name,
                keg.path().display()
            )));
        }

        Ok(())
    }
}
