//! Install receipts ("tabs").
//!
//! Every installed keg carries an `INSTALL_RECEIPT.json` recording how it got there:
//! ```text
//! /opt/homebrew/Cellar/ripgrep/14.1.0/
//!   INSTALL_RECEIPT.json     # poured or built, options, runtime dependency versions
//!   bin/
//! ```
//! The receipt is the only record of how a keg was installed, so it is written atomically
//! (temp file in the keg, then renamed over the final name) and read leniently: fields a
//! newer writer added are ignored and fields an older writer omitted take defaults.
//!
//! # Examples
//!
//! ```no_run
//! use pourover::keg::Keg;
//! use pourover::tab::Tab;
//! use std::path::Path;
//!
//! fn main() -> anyhow::Result<()> {
//!     let keg = Keg::new(Path::new("/opt/homebrew/Cellar"), "ripgrep", "14.1.0");
//!     let tab = Tab::for_keg(&keg)?;
//!
//!     println!("Poured from bottle: {}", tab.poured_from_bottle);
//!     println!("Dependencies: {}", tab.runtime_dependencies.len());
//!     Ok(())
//! }
//! ```

use crate::keg::Keg;
use crate::spec::SpecKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const TAB_FILENAME: &str = "INSTALL_RECEIPT.json";

/// A dependency as it was installed when the dependent was
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeDependency {
    pub full_name: String,
    pub version: String,
    #[serde(default)]
    pub declared_directly: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceVersions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tap: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<String>,
    #[serde(default)]
    pub versions: SourceVersions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tab {
    #[serde(default)]
    pub homebrew_version: String,
    #[serde(default)]
    pub used_options: Vec<String>,
    #[serde(default)]
    pub unused_options: Vec<String>,
    #[serde(default)]
    pub built_as_bottle: bool,
    #[serde(default)]
    pub poured_from_bottle: bool,
    #[serde(default)]
    pub installed_as_dependency: bool,
    #[serde(default)]
    pub installed_on_request: bool,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub runtime_dependencies: Vec<RuntimeDependency>,
    #[serde(default)]
    pub source: TabSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    #[serde(skip)]
    tabfile: Option<PathBuf>,
}

impl Tab {
    /// A fresh receipt for `keg`, not yet written
    pub fn new(keg: &Keg) -> Self {
        Self {
            homebrew_version: format!("pourover/{}", env!("CARGO_PKG_VERSION")),
            used_options: vec![],
            unused_options: vec![],
            built_as_bottle: false,
            poured_from_bottle: false,
            installed_as_dependency: false,
            installed_on_request: true,
            time: Some(chrono::Utc::now().timestamp()),
            runtime_dependencies: vec![],
            source: TabSource::default(),
            arch: Some(homebrew_arch().to_string()),
            tabfile: Some(tab_path(keg.path())),
        }
    }

    /// Read the receipt of an installed keg
    pub fn for_keg(keg: &Keg) -> Result<Self> {
        Self::from_file(&tab_path(keg.path()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read receipt: {}", path.display()))?;
        let mut tab: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse receipt: {}", path.display()))?;
        tab.tabfile = Some(path.to_path_buf());
        Ok(tab)
    }

    pub fn tabfile(&self) -> Option<&Path> {
        self.tabfile.as_deref()
    }

    /// Atomically replace the receipt on disk
    pub fn write(&self) -> Result<()> {
        let path = self
            .tabfile
            .as_deref()
            .context("Receipt has no keg to be written into")?;
        let dir = path
            .parent()
            .with_context(|| format!("Invalid receipt path: {}", path.display()))?;

        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize install receipt")?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temporary receipt in {}", dir.display()))?;
        tmp.write_all(json.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .context("Failed to write install receipt")?;
        tmp.persist(path)
            .with_context(|| format!("Failed to write receipt: {}", path.display()))?;

        Ok(())
    }

    pub fn spec(&self) -> SpecKind {
        self.source
            .spec
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(SpecKind::Stable)
    }

    /// Whether the `name` toggle was on for this install
    pub fn with_option(&self, name: &str) -> bool {
        self.used_options.iter().any(|o| *o == format!("--with-{}", name))
            || self
                .unused_options
                .iter()
                .any(|o| *o == format!("--without-{}", name))
    }

    pub fn depends_on(&self, name: &str) -> bool {
        self.runtime_dependencies.iter().any(|dep| {
            dep.full_name == name || dep.full_name.rsplit('/').next() == Some(name)
        })
    }
}

fn tab_path(keg_path: &Path) -> PathBuf {
    keg_path.join(TAB_FILENAME)
}

/// Homebrew uses "arm64" for Apple Silicon, while Rust uses "aarch64"
fn homebrew_arch() -> &'static str {
    match std::env::consts::ARCH {
        "aarch64" => "arm64",
        arch => arch,
    }
}
