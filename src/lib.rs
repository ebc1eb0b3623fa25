//! Library interface for pourover, the install core of a Homebrew-compatible package
//! manager.
//!
//! Given a [`Formula`], the [`Installer`] selects the version spec to install, resolves
//! build options, decides between pouring a bottle and building from source, verifies
//! downloads, and records the result in an install receipt ([`Tab`]) under a per-formula
//! lock.

pub mod bottle;
pub mod build;
pub mod cellar;
pub mod checksum;
pub mod config;
pub mod deferred;
pub mod error;
pub mod exec;
pub mod extract;
pub mod fetch;
pub mod formula;
pub mod installer;
pub mod keg;
pub mod loader;
pub mod lock;
pub mod options;
pub mod platform;
pub mod spec;
pub mod tab;

// Re-export commonly used types
pub use bottle::{Bottle, BottleCollector, BottleSpecification, Filename};
pub use checksum::{Checksum, HashAlgorithm};
pub use config::Config;
pub use error::{InstallError, Result};
pub use formula::{Formula, Installable};
pub use installer::{BottlePolicy, InstallOptions, InstallOutcome, InstallState, Installer};
pub use keg::{Keg, normalize_path};
pub use loader::JsonFormulaLoader;
pub use lock::{LockManager, LockResource, LockState};
pub use options::BuildOptions;
pub use platform::{BottleTag, HostPlatform, PlatformOracle};
pub use spec::{SpecKind, SpecSelector};
pub use tab::Tab;
