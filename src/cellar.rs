//! Cellar management - reading installed kegs

use crate::keg::Keg;
use crate::tab::Tab;
use anyhow::{Context, Result};
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cellar {
    root: PathBuf,
}

impl Cellar {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn keg(&self, name: &str, version: &str) -> Keg {
        Keg::new(&self.root, name, version)
    }

    /// All installed kegs of `name`, newest first
    pub fn installed_kegs(&self, name: &str) -> Result<Vec<Keg>> {
        let rack = self.root.join(name);
        if !rack.is_dir() {
            return Ok(vec![]);
        }

        let mut versions = Vec::new();
        for entry in fs::read_dir(&rack)
            .with_context(|| format!("Failed to read rack: {}", rack.display()))?
        {
            let entry = entry?;
            let version = entry.file_name().to_string_lossy().to_string();
            if version.starts_with('.') || !entry.path().is_dir() {
                continue;
            }
            versions.push(version);
        }

        // [0] is always the newest version
        versions.sort_by(|a, b| compare_versions(b, a));

        Ok(versions
            .into_iter()
            .map(|version| self.keg(name, &version))
            .filter(Keg::is_installed)
            .collect())
    }

    pub fn latest_keg(&self, name: &str) -> Result<Option<Keg>> {
        Ok(self.installed_kegs(name)?.into_iter().next())
    }

    /// Every installed keg in the Cellar
    pub fn list_installed(&self) -> Result<Vec<Keg>> {
        if !self.root.exists() {
            return Ok(vec![]);
        }

        let mut kegs = Vec::new();
        for entry in fs::read_dir(&self.root)
            .with_context(|| format!("Failed to read Cellar: {}", self.root.display()))?
        {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || !entry.path().is_dir() {
                continue;
            }
            kegs.extend(self.installed_kegs(&name)?);
        }

        Ok(kegs)
    }

    /// Names of installed formulae whose receipts list `name` as a runtime dependency
    pub fn dependents_of(&self, name: &str) -> Result<Vec<String>> {
        let mut dependents: Vec<String> = self
            .list_installed()?
            .into_iter()
            .filter(|keg| keg.name() != name)
            .filter(|keg| Tab::for_keg(keg).is_ok_and(|tab| tab.depends_on(name)))
            .map(|keg| keg.name().to_string())
            .collect();
        dependents.sort();
        dependents.dedup();
        Ok(dependents)
    }
}

/// Compare two version strings numerically, falling back to lexicographic order
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a_parts: Vec<u32> = a
        .split(['.', '_'])
        .filter_map(|s| s.parse::<u32>().ok())
        .collect();
    let b_parts: Vec<u32> = b
        .split(['.', '_'])
        .filter_map(|s| s.parse::<u32>().ok())
        .collect();

    for i in 0..a_parts.len().max(b_parts.len()) {
        let a_part = a_parts.get(i).unwrap_or(&0);
        let b_part = b_parts.get(i).unwrap_or(&0);
        match a_part.cmp(b_part) {
            Ordering::Equal => continue,
            other => return other,
        }
    }

    a.cmp(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tab::RuntimeDependency;
    use tempfile::TempDir;

    fn install(cellar: &Cellar, name: &str, version: &str, deps: &[&str]) -> Keg {
        let keg = cellar.keg(name, version);
        fs::create_dir_all(keg.path().join("bin")).unwrap();
        let mut tab = Tab::new(&keg);
        tab.runtime_dependencies = deps
            .iter()
            .map(|d| RuntimeDependency {
                full_name: d.to_string(),
                version: "1.0".into(),
                declared_directly: true,
            })
            .collect();
        tab.write().unwrap();
        keg
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("1.10", "1.9"), Ordering::Greater);
        assert_eq!(compare_versions("2.0", "2.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.0_1", "1.0"), Ordering::Greater);
        assert_eq!(compare_versions("HEAD", "1.0"), Ordering::Less);
    }

    #[test]
    fn test_installed_kegs_newest_first() {
        let temp = TempDir::new().unwrap();
        let cellar = Cellar::new(temp.path().join("Cellar"));
        install(&cellar, "foo", "1.9", &[]);
        install(&cellar, "foo", "1.10", &[]);
        fs::create_dir_all(cellar.root().join("foo/.hidden")).unwrap();
        // Empty directories are not installs
        fs::create_dir_all(cellar.root().join("foo/2.0")).unwrap();

        let versions: Vec<_> = cellar
            .installed_kegs("foo")
            .unwrap()
            .iter()
            .map(|k| k.version().to_string())
            .collect();
        assert_eq!(versions, vec!["1.10", "1.9"]);
        assert!(cellar.installed_kegs("missing").unwrap().is_empty());
    }

    #[test]
    fn test_dependents_of() {
        let temp = TempDir::new().unwrap();
        let cellar = Cellar::new(temp.path().join("Cellar"));
        install(&cellar, "lib", "1.0", &[]);
        install(&cellar, "app", "1.0", &["lib"]);
        install(&cellar, "tool", "3.0", &["homebrew/core/lib"]);
        install(&cellar, "other", "1.0", &[]);

        assert_eq!(cellar.dependents_of("lib").unwrap(), vec!["app", "tool"]);
        assert!(cellar.dependents_of("app").unwrap().is_empty());
    }

    #[test]
    fn test_list_installed_missing_cellar() {
        let temp = TempDir::new().unwrap();
        let cellar = Cellar::new(temp.path().join("nope"));
        assert!(cellar.list_installed().unwrap().is_empty());
    }
}
