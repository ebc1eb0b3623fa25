//! Version specifications and active-spec selection.
//!
//! A formula may carry up to three specs: `stable`, `devel` and `head`. Exactly one is
//! active for an install. Without an explicit request the first usable spec in that order
//! wins; an explicit request that is not usable falls back to the same default order.

use crate::bottle::BottleSpecification;
use crate::checksum::Checksum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version string used for head installs
pub const HEAD_VERSION: &str = "HEAD";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecKind {
    Stable,
    Devel,
    Head,
}

impl SpecKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpecKind::Stable => "stable",
            SpecKind::Devel => "devel",
            SpecKind::Head => "head",
        }
    }
}

impl fmt::Display for SpecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpecKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches(':') {
            "stable" => Ok(SpecKind::Stable),
            "devel" => Ok(SpecKind::Devel),
            "head" | "HEAD" => Ok(SpecKind::Head),
            other => Err(format!("unknown spec: {}", other)),
        }
    }
}

/// One version specification of a formula.
///
/// Fields are set once when the spec is built and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftwareSpec {
    #[serde(default)]
    url: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    checksum: Option<Checksum>,
    #[serde(default)]
    bottle: Option<BottleSpecification>,
}

impl SoftwareSpec {
    pub fn new(url: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            version: version.into(),
            checksum: None,
            bottle: None,
        }
    }

    pub fn with_checksum(self, checksum: Checksum) -> Self {
        Self {
            checksum: Some(checksum),
            ..self
        }
    }

    pub fn with_bottle(self, bottle: BottleSpecification) -> Self {
        Self {
            bottle: Some(bottle),
            ..self
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn checksum(&self) -> Option<&Checksum> {
        self.checksum.as_ref()
    }

    pub fn bottle(&self) -> Option<&BottleSpecification> {
        self.bottle.as_ref()
    }

    /// Both a url and a version are present
    pub fn is_fully_specified(&self) -> bool {
        !self.url.trim().is_empty() && !self.version.trim().is_empty()
    }
}

/// The stable/devel/head specs a formula declares
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecSet {
    #[serde(default)]
    pub stable: Option<SoftwareSpec>,
    #[serde(default)]
    pub devel: Option<SoftwareSpec>,
    #[serde(default)]
    pub head: Option<SoftwareSpec>,
}

impl SpecSet {
    pub fn get(&self, kind: SpecKind) -> Option<&SoftwareSpec> {
        match kind {
            SpecKind::Stable => self.stable.as_ref(),
            SpecKind::Devel => self.devel.as_ref(),
            SpecKind::Head => self.head.as_ref(),
        }
    }

    /// The spec of `kind` if it can drive an install
    fn usable(&self, kind: SpecKind) -> Option<&SoftwareSpec> {
        let spec = self.get(kind)?;
        let usable = match kind {
            SpecKind::Stable | SpecKind::Devel => spec.is_fully_specified(),
            SpecKind::Head => !spec.url().trim().is_empty(),
        };
        usable.then_some(spec)
    }
}

/// A spec chosen for an install
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveSpec<'a> {
    pub kind: SpecKind,
    pub spec: &'a SoftwareSpec,
}

impl ActiveSpec<'_> {
    /// Version the keg is installed under; head specs default to `HEAD`
    pub fn version(&self) -> &str {
        match self.kind {
            SpecKind::Head if self.spec.version().trim().is_empty() => HEAD_VERSION,
            _ => self.spec.version(),
        }
    }
}

/// Chooses the active version specification
pub struct SpecSelector;

impl SpecSelector {
    const DEFAULT_ORDER: [SpecKind; 3] = [SpecKind::Stable, SpecKind::Devel, SpecKind::Head];

    /// Select the requested spec when usable, otherwise the first usable of
    /// stable, devel, head. `None` means the formula has no usable spec.
    pub fn select(specs: &SpecSet, requested: Option<SpecKind>) -> Option<ActiveSpec<'_>> {
        requested
            .into_iter()
            .chain(Self::DEFAULT_ORDER)
            .find_map(|kind| specs.usable(kind).map(|spec| ActiveSpec { kind, spec }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stable() -> SoftwareSpec {
        SoftwareSpec::new("https://example.com/foo-1.0.tar.gz", "1.0")
    }

    fn devel() -> SoftwareSpec {
        SoftwareSpec::new("https://example.com/foo-1.1-beta.tar.gz", "1.1-beta")
    }

    fn head() -> SoftwareSpec {
        SoftwareSpec::new("https://example.com/foo.git", "")
    }

    #[test]
    fn test_defaults_to_stable() {
        let specs = SpecSet {
            stable: Some(stable()),
            devel: Some(devel()),
            head: Some(head()),
        };
        let active = SpecSelector::select(&specs, None).unwrap();
        assert_eq!(active.kind, SpecKind::Stable);
        assert_eq!(active.version(), "1.0");
    }

    #[test]
    fn test_falls_back_to_devel_then_head() {
        let specs = SpecSet {
            stable: None,
            devel: Some(devel()),
            head: Some(head()),
        };
        assert_eq!(SpecSelector::select(&specs, None).unwrap().kind, SpecKind::Devel);

        let specs = SpecSet {
            stable: None,
            devel: None,
            head: Some(head()),
        };
        let active = SpecSelector::select(&specs, None).unwrap();
        assert_eq!(active.kind, SpecKind::Head);
        assert_eq!(active.version(), HEAD_VERSION);
    }

    #[test]
    fn test_version_only_spec_is_not_usable() {
        let specs = SpecSet {
            stable: Some(SoftwareSpec::new("", "1.0")),
            devel: None,
            head: Some(head()),
        };
        assert_eq!(SpecSelector::select(&specs, None).unwrap().kind, SpecKind::Head);
    }

    #[test]
    fn test_requested_spec_selected_directly() {
        let specs = SpecSet {
            stable: Some(stable()),
            devel: Some(devel()),
            head: Some(head()),
        };
        assert_eq!(
            SpecSelector::select(&specs, Some(SpecKind::Devel)).unwrap().kind,
            SpecKind::Devel
        );
        assert_eq!(
            SpecSelector::select(&specs, Some(SpecKind::Head)).unwrap().kind,
            SpecKind::Head
        );
    }

    #[test]
    fn test_requested_incomplete_spec_falls_back() {
        let specs = SpecSet {
            stable: Some(stable()),
            devel: None,
            head: None,
        };
        assert_eq!(
            SpecSelector::select(&specs, Some(SpecKind::Devel)).unwrap().kind,
            SpecKind::Stable
        );

        let specs = SpecSet {
            stable: Some(stable()),
            devel: Some(SoftwareSpec::new("", "2.0")),
            head: None,
        };
        assert_eq!(
            SpecSelector::select(&specs, Some(SpecKind::Devel)).unwrap().kind,
            SpecKind::Stable
        );
    }

    #[test]
    fn test_no_usable_spec() {
        assert!(SpecSelector::select(&SpecSet::default(), None).is_none());
        let specs = SpecSet {
            stable: Some(SoftwareSpec::new("", "")),
            devel: None,
            head: Some(SoftwareSpec::new("", "")),
        };
        assert!(SpecSelector::select(&specs, Some(SpecKind::Head)).is_none());
    }

    #[test]
    fn test_spec_kind_parse() {
        assert_eq!(":devel".parse::<SpecKind>(), Ok(SpecKind::Devel));
        assert_eq!("HEAD".parse::<SpecKind>(), Ok(SpecKind::Head));
        assert!("nightly".parse::<SpecKind>().is_err());
    }
}
