//! Installed kegs and their links into the prefix.
//!
//! A keg is `<cellar>/<name>/<version>`. Linking mirrors the keg's `bin`, `lib`, `share`
//! (and friends) into the prefix as relative symlinks:
//! ```text
//! /opt/homebrew/bin/rg -> ../Cellar/ripgrep/14.1.0/bin/rg
//! /opt/homebrew/opt/ripgrep -> ../Cellar/ripgrep/14.1.0
//! ```
//! Both linking and unlinking are idempotent: existing correct links are left alone and
//! links owned by other kegs are never touched.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs as unix_fs;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Directories to symlink from the keg to the prefix
const LINKABLE_DIRS: &[&str] = &[
    "bin",
    "sbin",
    "lib",
    "include",
    "share",
    "etc",
    "Frameworks",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keg {
    name: String,
    version: String,
    path: PathBuf,
}

impl Keg {
    pub fn new(cellar: &Path, name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            path: cellar.join(name).join(version),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `<cellar>/<name>`, the directory holding every version of the formula
    pub fn rack(&self) -> &Path {
        self.path.parent().unwrap_or(&self.path)
    }

    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    /// Directory exists and is not empty
    pub fn is_installed(&self) -> bool {
        fs::read_dir(&self.path)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }

    /// Create symlinks for every file in the keg's linkable directories
    pub fn link(&self, prefix: &Path) -> Result<Vec<PathBuf>> {
        let mut linked = Vec::new();

        for dir_name in LINKABLE_DIRS {
            let source_dir = self.path.join(dir_name);
            if !source_dir.is_dir() {
                continue;
            }

            let target_dir = prefix.join(dir_name);
            fs::create_dir_all(&target_dir)
                .with_context(|| format!("Failed to create directory: {}", target_dir.display()))?;

            for entry in WalkDir::new(&source_dir).min_depth(1).follow_links(false) {
                let entry = entry.with_context(|| {
                    format!("Failed to walk keg directory: {}", source_dir.display())
                })?;
                let relative = entry
                    .path()
                    .strip_prefix(&self.path)
                    .context("Walked outside of keg")?;
                let target = prefix.join(relative);

                if entry.file_type().is_dir() {
                    fs::create_dir_all(&target)
                        .with_context(|| format!("Failed to create directory: {}", target.display()))?;
                } else if create_relative_symlink(entry.path(), &target)? {
                    linked.push(target);
                }
            }
        }

        Ok(linked)
    }

    /// Remove every prefix symlink that points into this keg
    pub fn unlink(&self, prefix: &Path) -> Result<Vec<PathBuf>> {
        let mut unlinked = Vec::new();

        for dir_name in LINKABLE_DIRS {
            let source_dir = self.path.join(dir_name);
            if !source_dir.is_dir() || !prefix.join(dir_name).is_dir() {
                continue;
            }

            for entry in WalkDir::new(&source_dir).min_depth(1).follow_links(false) {
                let entry = entry?;
                if entry.file_type().is_dir() {
                    continue;
                }
                let relative = entry.path().strip_prefix(&self.path)?;
                let target = prefix.join(relative);
                if self.owns_link(&target) {
                    fs::remove_file(&target)
                        .with_context(|| format!("Failed to remove symlink: {}", target.display()))?;
                    unlinked.push(target);
                }
            }
        }

        Ok(unlinked)
    }

    /// Point `<opt>/<name>` at this keg
    pub fn optlink(&self, opt_dir: &Path) -> Result<()> {
        fs::create_dir_all(opt_dir)
            .with_context(|| format!("Failed to create directory: {}", opt_dir.display()))?;
        let link = opt_dir.join(&self.name);

        if link.symlink_metadata().is_ok() {
            fs::remove_file(&link)
                .with_context(|| format!("Failed to replace opt link: {}", link.display()))?;
        }

        let relative = relative_path(opt_dir, &self.path);
        unix_fs::symlink(&relative, &link).with_context(|| {
            format!(
                "Failed to create symlink: {} -> {}",
                link.display(),
                relative.display()
            )
        })
    }

    /// Remove `<opt>/<name>` if it points at this keg
    pub fn remove_optlink(&self, opt_dir: &Path) -> Result<()> {
        let link = opt_dir.join(&self.name);
        if self.owns_link(&link) {
            fs::remove_file(&link)
                .with_context(|| format!("Failed to remove opt link: {}", link.display()))?;
        }
        Ok(())
    }

    /// Delete the keg directory and, if it was the last version, the rack
    pub fn uninstall(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_dir_all(&self.path)
                .with_context(|| format!("Failed to remove keg: {}", self.path.display()))?;
        }
        let rack = self.rack();
        if fs::read_dir(rack).is_ok_and(|mut entries| entries.next().is_none()) {
            fs::remove_dir(rack)
                .with_context(|| format!("Failed to remove rack: {}", rack.display()))?;
        }
        Ok(())
    }

    fn owns_link(&self, link: &Path) -> bool {
        let Ok(target) = fs::read_link(link) else {
            return false;
        };
        let resolved = if target.is_relative() {
            match link.parent() {
                Some(parent) => normalize_path(&parent.join(&target)),
                None => return false,
            }
        } else {
            target
        };
        resolved.starts_with(&self.path)
    }
}

/// Create a relative symlink at `target` pointing to `source`.
///
/// Returns `false` when `target` already exists, either as the correct link or as
/// something that belongs to another keg.
fn create_relative_symlink(source: &Path, target: &Path) -> Result<bool> {
    let Some(target_dir) = target.parent() else {
        anyhow::bail!("Symlink target has no parent: {}", target.display());
    };
    let relative = relative_path(target_dir, source);

    if target.symlink_metadata().is_ok() {
        if fs::read_link(target).is_ok_and(|existing| existing == relative) {
            return Ok(false);
        }
        tracing::warn!(
            "Not overwriting {} (already exists and is not ours)",
            target.display()
        );
        return Ok(false);
    }

    unix_fs::symlink(&relative, target).with_context(|| {
        format!(
            "Failed to create symlink: {} -> {}",
            target.display(),
            relative.display()
        )
    })?;
    Ok(true)
}

/// Path to `to` relative to the directory `from`
fn relative_path(from: &Path, to: &Path) -> PathBuf {
    let from = normalize_path(from);
    let to = normalize_path(to);
    let common = from
        .components()
        .zip(to.components())
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in from.components().skip(common) {
        relative.push("..");
    }
    for component in to.components().skip(common) {
        relative.push(component);
    }
    relative
}

/// Lexically resolve `.` and `..` without touching the filesystem
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}
