//! Platform tags and their ordering.
//!
//! Bottles are keyed by platform tags like `arm64_sequoia`, `sonoma` or `x86_64_linux`:
//! - `<arch>_<system>` for Apple Silicon and Linux
//! - bare `<system>` for Intel macOS
//!
//! A tag ending in `_or_later` declares a range: `monterey_or_later` covers Monterey and
//! every newer macOS release on the same architecture. Deciding whether one tag is "later"
//! than another is the job of a [`PlatformOracle`]; [`HostPlatform`] knows the macOS
//! release order and detects the running system's tag.

#[cfg(target_os = "macos")]
use anyhow::Context;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
#[cfg(target_os = "macos")]
use std::process::Command;

const OR_LATER_SUFFIX: &str = "_or_later";

/// Architecture prefixes that may lead a tag
const ARCH_PREFIXES: &[&str] = &["arm64", "x86_64"];

/// macOS releases, oldest first
const MACOS_RELEASES: &[&str] = &[
    "mountain_lion",
    "mavericks",
    "yosemite",
    "el_capitan",
    "sierra",
    "high_sierra",
    "mojave",
    "catalina",
    "big_sur",
    "monterey",
    "ventura",
    "sonoma",
    "sequoia",
    "tahoe",
];

/// A platform tag as it appears in bottle specifications and filenames
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BottleTag(String);

impl BottleTag {
    pub fn new(tag: impl Into<String>) -> Self {
        let tag = tag.into();
        Self(tag.trim_start_matches(':').to_string())
    }

    /// Universal tag for architecture-independent bottles
    pub fn all() -> Self {
        Self::new("all")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// For `foo_or_later`, the tag `foo`
    pub fn or_later_base(&self) -> Option<BottleTag> {
        self.0
            .strip_suffix(OR_LATER_SUFFIX)
            .filter(|base| !base.is_empty())
            .map(BottleTag::new)
    }

    /// Architecture prefix, if the tag carries one
    pub fn arch(&self) -> Option<&str> {
        ARCH_PREFIXES
            .iter()
            .find(|arch| {
                self.0
                    .strip_prefix(*arch)
                    .is_some_and(|rest| rest.starts_with('_'))
            })
            .copied()
    }

    /// The tag without its architecture prefix
    pub fn system(&self) -> &str {
        match self.arch() {
            Some(arch) => &self.0[arch.len() + 1..],
            None => &self.0,
        }
    }
}

impl fmt::Display for BottleTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BottleTag {
    fn from(value: &str) -> Self {
        BottleTag::new(value)
    }
}

/// Knowledge about platforms supplied by the operating system layer
pub trait PlatformOracle: Send + Sync {
    /// Tag of the system we are installing onto
    fn current_tag(&self) -> BottleTag;

    /// Chronological order of two tags, `None` when they are not comparable
    fn compare(&self, a: &BottleTag, b: &BottleTag) -> Option<Ordering>;
}

/// Total order over macOS releases, per architecture
pub fn compare_macos_tags(a: &BottleTag, b: &BottleTag) -> Option<Ordering> {
    if a.arch() != b.arch() {
        return None;
    }
    if a.system() == b.system() {
        return Some(Ordering::Equal);
    }
    let ia = MACOS_RELEASES.iter().position(|r| *r == a.system())?;
    let ib = MACOS_RELEASES.iter().position(|r| *r == b.system())?;
    Some(ia.cmp(&ib))
}

/// The running system
#[derive(Debug, Clone)]
pub struct HostPlatform {
    tag: BottleTag,
}

impl HostPlatform {
    /// Detect the current system platform for bottle selection.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - On macOS: `sw_vers` command is unavailable
    /// - On unsupported platforms: Not macOS or Linux
    pub fn detect() -> Result<Self> {
        Ok(Self {
            tag: detect_bottle_tag()?,
        })
    }

    /// Pretend to be a specific platform
    pub fn with_tag(tag: impl Into<BottleTag>) -> Self {
        Self { tag: tag.into() }
    }
}

impl PlatformOracle for HostPlatform {
    fn current_tag(&self) -> BottleTag {
        self.tag.clone()
    }

    fn compare(&self, a: &BottleTag, b: &BottleTag) -> Option<Ordering> {
        compare_macos_tags(a, b)
    }
}

/// Homebrew uses "arm64" not "aarch64"
fn homebrew_arch() -> &'static str {
    match std::env::consts::ARCH {
        "aarch64" => "arm64",
        other => other,
    }
}

/// Detect the tag of the running system.
///
/// Examples of returned tags:
/// - `arm64_sequoia` - Apple Silicon (M1+) on macOS 15
/// - `ventura` - Intel on macOS 13
/// - `x86_64_linux` - x86_64 Linux
pub fn detect_bottle_tag() -> Result<BottleTag> {
    #[cfg(target_os = "macos")]
    {
        let os_version = macos_version()?;
        let os_name = macos_name(&os_version);
        let tag = match homebrew_arch() {
            "x86_64" => os_name.to_string(),
            arch => format!("{}_{}", arch, os_name),
        };
        Ok(BottleTag::new(tag))
    }

    #[cfg(target_os = "linux")]
    {
        Ok(BottleTag::new(format!("{}_linux", homebrew_arch())))
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        let _ = homebrew_arch();
        anyhow::bail!("Unsupported platform")
    }
}

#[cfg(target_os = "macos")]
fn macos_version() -> Result<String> {
    let output = Command::new("sw_vers")
        .arg("-productVersion")
        .output()
        .context("Failed to run sw_vers")?;

    let version = String::from_utf8(output.stdout)
        .context("Invalid UTF-8 in sw_vers output")?
        .trim()
        .to_string();

    Ok(version)
}

#[cfg(target_os = "macos")]
fn macos_name(version: &str) -> &'static str {
    let mut parts = version.split('.').filter_map(|s| s.parse::<u32>().ok());
    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);

    match (major, minor) {
        (26, _) | (16, _) => "tahoe",
        (15, _) => "sequoia",
        (14, _) => "sonoma",
        (13, _) => "ventura",
        (12, _) => "monterey",
        (11, _) | (10, 16) => "big_sur",
        (10, 15) => "catalina",
        (10, 14) => "mojave",
        (10, 13) => "high_sierra",
        (10, 12) => "sierra",
        _ => "sonoma",
    }
}
