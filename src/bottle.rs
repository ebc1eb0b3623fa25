//! Bottle specifications, platform matching and artifact naming.
//!
//! A bottle is a prebuilt archive of a formula's keg for one platform tag. A formula's
//! [`BottleSpecification`] lists a checksum per tag; [`BottleCollector::fetch_checksum_for`]
//! picks the entry that applies to the running platform:
//!
//! 1. an exact tag match always wins
//! 2. otherwise the first `<tag>_or_later` entry whose base tag is not newer than ours
//! 3. otherwise a universal `all` entry
//!
//! Artifact names come from [`Filename`]:
//! ```text
//! foo--1.0.arm64_sonoma.bottle.tar.gz      # cache entry / to_string()
//! foo--1.0.arm64_sonoma.bottle.1.tar.gz    # rebuild 1
//! foo--1.0.arm64_sonoma.bottle.json        # manifest, never carries the rebuild
//! foo-1.0.arm64_sonoma.bottle.tar.gz       # bintray()
//! ```

use crate::checksum::Checksum;
use crate::platform::{BottleTag, PlatformOracle};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};

/// Default download root for bottles
pub const DEFAULT_ROOT_URL: &str = "https://homebrew.bintray.com/bottles";

/// One tag/checksum pair of a bottle specification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BottleEntry {
    pub tag: BottleTag,
    pub checksum: Checksum,
}

/// Insertion-ordered mapping from platform tag to checksum
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<BottleEntry>", into = "Vec<BottleEntry>")]
pub struct BottleCollector {
    entries: Vec<BottleEntry>,
}

impl From<Vec<BottleEntry>> for BottleCollector {
    fn from(entries: Vec<BottleEntry>) -> Self {
        let mut collector = BottleCollector::new();
        for entry in entries {
            collector.add(entry.tag, entry.checksum);
        }
        collector
    }
}

impl From<BottleCollector> for Vec<BottleEntry> {
    fn from(collector: BottleCollector) -> Self {
        collector.entries
    }
}

impl BottleCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a checksum for `tag`, replacing any previous entry for the same tag
    pub fn add(&mut self, tag: impl Into<BottleTag>, checksum: Checksum) {
        let tag = tag.into();
        match self.entries.iter_mut().find(|e| e.tag == tag) {
            Some(existing) => existing.checksum = checksum,
            None => self.entries.push(BottleEntry { tag, checksum }),
        }
    }

    pub fn get(&self, tag: &BottleTag) -> Option<&Checksum> {
        self.entries
            .iter()
            .find(|e| &e.tag == tag)
            .map(|e| &e.checksum)
    }

    pub fn contains(&self, tag: &BottleTag) -> bool {
        self.get(tag).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tags(&self) -> impl Iterator<Item = &BottleTag> {
        self.entries.iter().map(|e| &e.tag)
    }

    /// Find the checksum that applies to `tag` and the key it was registered under
    pub fn fetch_checksum_for(
        &self,
        tag: &BottleTag,
        platform: &dyn PlatformOracle,
    ) -> Option<(Checksum, BottleTag)> {
        let matched = self.find_matching_tag(tag, platform)?;
        let checksum = self.get(&matched)?.clone();
        Some((checksum, matched))
    }

    fn find_matching_tag(&self, tag: &BottleTag, platform: &dyn PlatformOracle) -> Option<BottleTag> {
        if self.contains(tag) {
            return Some(tag.clone());
        }
        self.find_or_later_tag(tag, platform)
            .or_else(|| self.contains(&BottleTag::all()).then(BottleTag::all))
    }

    fn find_or_later_tag(&self, tag: &BottleTag, platform: &dyn PlatformOracle) -> Option<BottleTag> {
        self.entries
            .iter()
            .find(|e| {
                e.tag.or_later_base().is_some_and(|base| {
                    matches!(
                        platform.compare(&base, tag),
                        Some(Ordering::Less | Ordering::Equal)
                    )
                })
            })
            .map(|e| e.tag.clone())
    }
}

/// Which Cellar a bottle was built for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BottleCellar {
    /// Relocatable into any Cellar
    #[default]
    Any,
    /// Relocatable without rewriting any paths
    AnySkipRelocation,
    /// Only usable in exactly this Cellar
    Path(PathBuf),
}

impl BottleCellar {
    pub fn is_compatible_with(&self, cellar: &Path) -> bool {
        match self {
            BottleCellar::Any | BottleCellar::AnySkipRelocation => true,
            BottleCellar::Path(path) => path == cellar,
        }
    }
}

/// Bottle block of a version specification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BottleSpecification {
    #[serde(default)]
    pub rebuild: u32,
    #[serde(default)]
    pub cellar: BottleCellar,
    #[serde(default)]
    pub root_url: Option<String>,
    #[serde(default)]
    pub checksums: BottleCollector,
}

impl Default for BottleSpecification {
    fn default() -> Self {
        Self {
            rebuild: 0,
            cellar: BottleCellar::Any,
            root_url: None,
            checksums: BottleCollector::new(),
        }
    }
}

impl BottleSpecification {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checksum(mut self, tag: impl Into<BottleTag>, checksum: Checksum) -> Self {
        self.checksums.add(tag, checksum);
        self
    }

    pub fn with_rebuild(mut self, rebuild: u32) -> Self {
        self.rebuild = rebuild;
        self
    }

    pub fn with_cellar(mut self, cellar: BottleCellar) -> Self {
        self.cellar = cellar;
        self
    }

    pub fn with_root_url(mut self, root_url: impl Into<String>) -> Self {
        self.root_url = Some(root_url.into());
        self
    }

    pub fn root_url<'a>(&'a self, default: &'a str) -> &'a str {
        self.root_url.as_deref().unwrap_or(default)
    }
}

/// A bottle resolved for one formula on one platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bottle {
    pub tag: BottleTag,
    pub checksum: Checksum,
    pub filename: Filename,
    pub url: String,
}

impl Bottle {
    /// Resolve the bottle of `spec` matching the platform's current tag
    pub fn resolve(
        name: &str,
        pkg_version: &str,
        spec: &BottleSpecification,
        platform: &dyn PlatformOracle,
        default_root_url: &str,
    ) -> Option<Self> {
        let current = platform.current_tag();
        let (checksum, tag) = spec.checksums.fetch_checksum_for(&current, platform)?;
        let filename = Filename::new(name, pkg_version, tag.clone(), spec.rebuild);
        let url = format!(
            "{}/{}",
            spec.root_url(default_root_url).trim_end_matches('/'),
            filename.bintray()
        );

        Some(Self {
            tag,
            checksum,
            filename,
            url,
        })
    }
}

/// Deterministic bottle artifact names
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Filename {
    name: String,
    version: String,
    tag: BottleTag,
    rebuild: u32,
}

impl Filename {
    /// Tap-qualified names (`user/tap/foo`) are flattened to the bare formula name
    pub fn new(name: &str, version: &str, tag: impl Into<BottleTag>, rebuild: u32) -> Self {
        let name = name.rsplit('/').next().unwrap_or(name).to_string();
        Self {
            name,
            version: version.to_string(),
            tag: tag.into(),
            rebuild,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn tag(&self) -> &BottleTag {
        &self.tag
    }

    pub fn rebuild(&self) -> u32 {
        self.rebuild
    }

    pub fn extname(&self) -> String {
        let rebuild = if self.rebuild > 0 {
            format!(".{}", self.rebuild)
        } else {
            String::new()
        };
        format!(".{}.bottle{}.tar.gz", self.tag, rebuild)
    }

    /// Manifest name; identical across rebuilds
    pub fn json(&self) -> String {
        format!("{}--{}.{}.bottle.json", self.name, self.version, self.tag)
    }

    pub fn bintray(&self) -> String {
        format!("{}-{}{}", self.name, self.version, self.extname())
    }
}

impl fmt::Display for Filename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}--{}{}", self.name, self.version, self.extname())
    }
}
