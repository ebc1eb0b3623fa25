//! Formula definitions as supplied by a loader.
//!
//! A [`Formula`] is plain data: name, version specs, declared options, dependencies and
//! the argv templates used to build it from source. Nothing here is evaluated lazily or
//! executed; the loader fills the struct once and the installer only reads it.
//!
//! ```json
//! {
//!   "name": "hello",
//!   "stable": {
//!     "url": "https://example.com/hello-2.12.tar.gz",
//!     "version": "2.12",
//!     "checksum": "sha256:cf04af86dc085268c5f4470fbae49b18afbc221b78096aab842d934a76bad0ab",
//!     "bottle": { "checksums": [{ "tag": "arm64_sonoma", "checksum": "sha256:..." }] }
//!   },
//!   "options": ["--with-docs"],
//!   "dependencies": ["gettext"],
//!   "install": [["./configure", "--prefix={prefix}", "{options}"], ["make", "install"]]
//! }
//! ```

use crate::bottle::Bottle;
use crate::cellar::Cellar;
use crate::platform::PlatformOracle;
use crate::spec::{ActiveSpec, SpecKind, SpecSelector, SpecSet};
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Formula {
    pub name: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub tap: Option<String>,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub revision: u32,
    #[serde(flatten)]
    pub specs: SpecSet,
    /// Declared option flags (`--with-foo`, `--without-bar`)
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub build_dependencies: Vec<String>,
    #[serde(default)]
    pub keg_only: bool,
    /// Formula-level veto on pouring bottles
    #[serde(default = "default_true")]
    pub pour_bottle: bool,
    /// Source build steps; each entry is an argv template
    #[serde(default)]
    pub install: Vec<Vec<String>>,
}

impl Formula {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            full_name: String::new(),
            tap: None,
            desc: None,
            revision: 0,
            specs: SpecSet::default(),
            options: vec![],
            dependencies: vec![],
            build_dependencies: vec![],
            keg_only: false,
            pour_bottle: true,
            install: vec![],
        }
    }

    /// Tap-qualified name when known, otherwise the bare name
    pub fn full_name(&self) -> &str {
        if self.full_name.is_empty() {
            &self.name
        } else {
            &self.full_name
        }
    }

    pub fn active_spec(&self, requested: Option<SpecKind>) -> Option<ActiveSpec<'_>> {
        SpecSelector::select(&self.specs, requested)
    }

    /// Version string including the formula revision (`1.0_1`)
    pub fn pkg_version(&self, version: &str) -> String {
        if self.revision > 0 {
            format!("{}_{}", version, self.revision)
        } else {
            version.to_string()
        }
    }
}

/// What the installer needs to know about a package
pub trait Installable {
    /// The bottle to pour for `spec` on this platform, downloaded from under `root_url`
    /// unless the bottle declares its own root
    fn bottle(&self, spec: SpecKind, platform: &dyn PlatformOracle, root_url: &str)
    -> Option<Bottle>;

    /// A bottle exists for the platform under the given spec
    fn bottled(&self, spec: SpecKind, platform: &dyn PlatformOracle) -> bool {
        self.bottle(spec, platform, "").is_some()
    }

    /// The version the spec would install (requested, else the default order) has a
    /// populated keg in the Cellar
    fn is_installed(&self, cellar: &Cellar, spec: Option<SpecKind>) -> bool;

    /// The package itself allows pouring bottles
    fn pour_bottle(&self) -> bool;

    fn runtime_dependencies(&self) -> &[String];
}

impl Installable for Formula {
    fn bottle(
        &self,
        spec: SpecKind,
        platform: &dyn PlatformOracle,
        root_url: &str,
    ) -> Option<Bottle> {
        let active = self.active_spec(Some(spec)).filter(|a| a.kind == spec)?;
        let pkg_version = self.pkg_version(active.version());
        Bottle::resolve(
            &self.name,
            &pkg_version,
            active.spec.bottle()?,
            platform,
            root_url,
        )
    }

    fn is_installed(&self, cellar: &Cellar, spec: Option<SpecKind>) -> bool {
        self.active_spec(spec).is_some_and(|active| {
            cellar
                .keg(&self.name, &self.pkg_version(active.version()))
                .is_installed()
        })
    }

    fn pour_bottle(&self) -> bool {
        self.pour_bottle
    }

    fn runtime_dependencies(&self) -> &[String] {
        &self.dependencies
    }
}
