//! Formula loading.
//!
//! Formula definitions come from outside the installer. [`JsonFormulaLoader`] reads them
//! from a directory of `<name>.json` files:
//! ```text
//! formulae/
//!   hello.json
//!   wget.json
//! ```
//! Loaded formulae are kept in an in-memory cache for the loader's lifetime.

use crate::error::{InstallError, Result};
use crate::formula::Formula;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Minimum similarity for a "did you mean" suggestion
const SUGGESTION_THRESHOLD: f64 = 0.8;

#[async_trait]
pub trait FormulaLoader: Send + Sync {
    async fn load(&self, name: &str) -> Result<Formula>;
}

/// Loads formulae from `<dir>/<name>.json`
#[derive(Clone)]
pub struct JsonFormulaLoader {
    dir: PathBuf,
    cache: moka::future::Cache<String, Formula>,
}

impl JsonFormulaLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: moka::future::Cache::new(1000),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Names of every formula definition in the directory, sorted
    pub async fn available(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                names.extend(formula_name(&path));
            }
        }
        names.sort();
        Ok(names)
    }

    async fn suggestion_for(&self, name: &str) -> Option<String> {
        let available = self.available().await.ok()?;
        available
            .into_iter()
            .map(|candidate| (strsim::jaro_winkler(name, &candidate), candidate))
            .filter(|(score, _)| *score >= SUGGESTION_THRESHOLD)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, candidate)| candidate)
    }
}

fn formula_name(path: &Path) -> Option<String> {
    path.file_stem().map(|stem| stem.to_string_lossy().to_string())
}

#[async_trait]
impl FormulaLoader for JsonFormulaLoader {
    async fn load(&self, name: &str) -> Result<Formula> {
        if let Some(cached) = self.cache.get(name).await {
            return Ok(cached);
        }

        // Tap-qualified names resolve to the bare formula file
        let short = name.rsplit('/').next().unwrap_or(name);
        let path = self.dir.join(format!("{}.json", short));

        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(InstallError::FormulaNotFound {
                    name: name.to_string(),
                    suggestion: self.suggestion_for(short).await,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let mut formula: Formula = serde_json::from_str(&contents)?;
        if formula.full_name.is_empty() && name.contains('/') {
            formula.full_name = name.to_string();
        }
        tracing::debug!("Loaded {} from {}", formula.name, path.display());

        self.cache.insert(name.to_string(), formula.clone()).await;
        Ok(formula)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_formula(dir: &Path, name: &str) {
        std::fs::write(
            dir.join(format!("{}.json", name)),
            format!(
                r#"{{"name":"{name}","stable":{{"url":"https://example.com/{name}-1.0.tar.gz","version":"1.0"}}}}"#
            ),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_load_and_cache() {
        let temp = TempDir::new().unwrap();
        write_formula(temp.path(), "wget");
        let loader = JsonFormulaLoader::new(temp.path());

        let formula = loader.load("wget").await.unwrap();
        assert_eq!(formula.name, "wget");
        assert_eq!(formula.active_spec(None).unwrap().version(), "1.0");

        // Served from cache after the file is gone
        std::fs::remove_file(temp.path().join("wget.json")).unwrap();
        assert!(loader.load("wget").await.is_ok());
    }

    #[tokio::test]
    async fn test_tap_qualified_name() {
        let temp = TempDir::new().unwrap();
        write_formula(temp.path(), "wget");
        let loader = JsonFormulaLoader::new(temp.path());

        let formula = loader.load("homebrew/core/wget").await.unwrap();
        assert_eq!(formula.full_name(), "homebrew/core/wget");
    }

    #[tokio::test]
    async fn test_not_found_suggests() {
        let temp = TempDir::new().unwrap();
        write_formula(temp.path(), "wget");
        write_formula(temp.path(), "ripgrep");
        let loader = JsonFormulaLoader::new(temp.path());

        match loader.load("wgett").await {
            Err(InstallError::FormulaNotFound { name, suggestion }) => {
                assert_eq!(name, "wgett");
                assert_eq!(suggestion.as_deref(), Some("wget"));
            }
            other => panic!("unexpected result: {:?}", other.map(|f| f.name)),
        }

        match loader.load("zzz").await {
            Err(InstallError::FormulaNotFound { suggestion, .. }) => assert!(suggestion.is_none()),
            other => panic!("unexpected result: {:?}", other.map(|f| f.name)),
        }
    }
}
