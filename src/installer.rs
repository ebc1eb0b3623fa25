//! Install orchestration.
//!
//! The [`Installer`] drives one formula through a fixed sequence of states:
//!
//! ```text
//! Idle → Resolving → Locked → Fetching → Verifying → PouringBottle ─────┐
//!                                                  └→ BuildingFromSource ┴→ Linking → RecordingTab → Done
//! ```
//!
//! `Error` is reachable from every state. Whether a bottle is poured is decided once,
//! right after resolving, from the formula, the injected [`BottlePolicy`] and the
//! install flags. The formula lock is held from `Locked` until the run ends, whatever
//! the outcome.
//!
//! Reinstalling moves the previous keg aside first. It is deleted once the new keg has
//! its receipt and put back, relinked, if any later step fails.
//!
//! # Examples
//!
//! ```no_run
//! use pourover::{Config, InstallOptions, Installer, JsonFormulaLoader};
//! use pourover::loader::FormulaLoader;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let installer = Installer::new(Config::from_env())?;
//!     let formula = JsonFormulaLoader::new("formulae").load("hello").await?;
//!
//!     let outcome = installer.install(&formula, &InstallOptions::default()).await?;
//!     println!("Installed {} {}", outcome.name, outcome.keg.version());
//!     Ok(())
//! }
//! ```

use crate::bottle::Bottle;
use crate::build::{DevelopmentTools, SourceBuilder, SystemDevelopmentTools};
use crate::cellar::Cellar;
use crate::checksum::Checksum;
use crate::config::Config;
use crate::deferred::Deferred;
use crate::error::{InstallError, Result};
use crate::exec::{SandboxedExecutor, SystemExecutor};
use crate::extract;
use crate::fetch::{DownloadCache, Fetcher, HttpFetcher};
use crate::formula::{Formula, Installable};
use crate::keg::Keg;
use crate::lock::{LockManager, LockResource};
use crate::options::BuildOptions;
use crate::platform::{HostPlatform, PlatformOracle};
use crate::spec::{ActiveSpec, SpecKind};
use crate::tab::{RuntimeDependency, SourceVersions, Tab, TabSource};
use anyhow::Context;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstallState {
    Idle,
    Resolving,
    Locked,
    Fetching,
    Verifying,
    PouringBottle,
    BuildingFromSource,
    Linking,
    RecordingTab,
    Done,
    Error,
}

impl InstallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallState::Idle => "idle",
            InstallState::Resolving => "resolving",
            InstallState::Locked => "locked",
            InstallState::Fetching => "fetching",
            InstallState::Verifying => "verifying",
            InstallState::PouringBottle => "pouring bottle",
            InstallState::BuildingFromSource => "building from source",
            InstallState::Linking => "linking",
            InstallState::RecordingTab => "recording tab",
            InstallState::Done => "done",
            InstallState::Error => "error",
        }
    }
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type FormulaPredicate = Arc<dyn Fn(&Formula) -> bool + Send + Sync>;
type FormulaHook = Arc<dyn Fn(&Formula) + Send + Sync>;
type StateObserver = Arc<dyn Fn(&str, InstallState) + Send + Sync>;

/// Policy hooks around bottle pouring.
///
/// The predicate can veto pouring for a formula; the hooks run immediately before and
/// after a bottle is poured. A fresh policy has no predicate (pouring allowed) and no
/// hooks.
#[derive(Clone, Default)]
pub struct BottlePolicy {
    pour_bottle: Option<FormulaPredicate>,
    before_pour: Option<FormulaHook>,
    after_pour: Option<FormulaHook>,
}

impl BottlePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pour_bottle(
        mut self,
        predicate: impl Fn(&Formula) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.pour_bottle = Some(Arc::new(predicate));
        self
    }

    pub fn with_before_pour(mut self, hook: impl Fn(&Formula) + Send + Sync + 'static) -> Self {
        self.before_pour = Some(Arc::new(hook));
        self
    }

    pub fn with_after_pour(mut self, hook: impl Fn(&Formula) + Send + Sync + 'static) -> Self {
        self.after_pour = Some(Arc::new(hook));
        self
    }

    pub fn allows(&self, formula: &Formula) -> bool {
        self.pour_bottle.as_ref().is_none_or(|predicate| predicate(formula))
    }

    fn before_pour(&self, formula: &Formula) {
        if let Some(hook) = &self.before_pour {
            hook(formula);
        }
    }

    fn after_pour(&self, formula: &Formula) {
        if let Some(hook) = &self.after_pour {
            hook(formula);
        }
    }
}

impl fmt::Debug for BottlePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BottlePolicy")
            .field("pour_bottle", &self.pour_bottle.is_some())
            .field("before_pour", &self.before_pour.is_some())
            .field("after_pour", &self.after_pour.is_some())
            .finish()
    }
}

/// Per-install flags
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Spec to prefer; falls back to the default order when unusable
    pub spec: Option<SpecKind>,
    /// Requested build options (`--with-foo`)
    pub options: Vec<String>,
    /// Reinstall even when the target version is present
    pub force: bool,
    pub build_from_source: bool,
    pub force_bottle: bool,
    pub installed_as_dependency: bool,
}

/// Result of a finished install
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub name: String,
    pub keg: Keg,
    pub spec: SpecKind,
    /// Every state the run passed through, `Idle` first
    pub states: Vec<InstallState>,
    pub poured_from_bottle: bool,
    /// Nothing was done because the keg was already present
    pub already_installed: bool,
    pub tab: Option<Tab>,
    pub linked: usize,
    /// Linking failed; the keg is installed regardless
    pub link_error: Option<String>,
    /// Requested options the formula does not declare
    pub invalid_options: Vec<String>,
    pub time_ms: u64,
}

/// Result of an uninstall
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UninstallOutcome {
    pub name: String,
    pub versions: Vec<String>,
    pub unlinked: usize,
}

/// Records the state trail of one run
struct Run<'a> {
    name: &'a str,
    states: Vec<InstallState>,
    observer: Option<&'a StateObserver>,
}

impl<'a> Run<'a> {
    fn new(name: &'a str, observer: Option<&'a StateObserver>) -> Self {
        let mut run = Self {
            name,
            states: Vec::new(),
            observer,
        };
        run.enter(InstallState::Idle);
        run
    }

    fn enter(&mut self, state: InstallState) {
        tracing::debug!("{}: {}", self.name, state);
        self.states.push(state);
        if let Some(observer) = self.observer {
            observer(self.name, state);
        }
    }
}

/// What was resolved for a run before the lock is taken
struct Plan<'f> {
    active: ActiveSpec<'f>,
    keg: Keg,
    build_options: BuildOptions,
    bottle: Option<Bottle>,
    pour: bool,
}

/// An existing keg parked inside its rack while a replacement is installed
struct SetAside {
    /// `<rack>/.<version>.reinstall`, hidden from Cellar listings
    stored: PathBuf,
    was_linked: bool,
}

/// Drives installs and uninstalls against one prefix
pub struct Installer {
    config: Config,
    cellar: Cellar,
    cache: DownloadCache,
    fetcher: Arc<dyn Fetcher>,
    platform: Arc<dyn PlatformOracle>,
    executor: Arc<dyn SandboxedExecutor>,
    dev_tools: Arc<dyn DevelopmentTools>,
    policy: BottlePolicy,
    observer: Option<StateObserver>,
}

impl Installer {
    /// Installer with the host's collaborators: HTTP downloads, detected platform,
    /// system command execution and compiler detection.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or the platform cannot be
    /// detected.
    pub fn new(config: Config) -> Result<Self> {
        if config.sandbox && config.sandbox_wrapper.is_none() {
            tracing::warn!(
                "Sandboxed builds are enabled but no sandbox wrapper is configured; source builds will fail"
            );
        }
        let fetcher = HttpFetcher::new()?;
        let platform = HostPlatform::detect()?;
        Ok(Self::with_collaborators(
            config,
            Arc::new(fetcher),
            Arc::new(platform),
        ))
    }

    /// Commands run on the host, wrapped in `config.sandbox_wrapper` when sandboxed
    pub fn with_collaborators(
        config: Config,
        fetcher: Arc<dyn Fetcher>,
        platform: Arc<dyn PlatformOracle>,
    ) -> Self {
        let executor = config
            .sandbox_wrapper
            .clone()
            .map(SystemExecutor::with_sandbox)
            .unwrap_or_default();
        Self {
            cellar: Cellar::new(&config.cellar),
            cache: DownloadCache::new(&config.cache),
            config,
            fetcher,
            platform,
            executor: Arc::new(executor),
            dev_tools: Arc::new(SystemDevelopmentTools),
            policy: BottlePolicy::default(),
            observer: None,
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn SandboxedExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_dev_tools(mut self, dev_tools: Arc<dyn DevelopmentTools>) -> Self {
        self.dev_tools = dev_tools;
        self
    }

    pub fn with_policy(mut self, policy: BottlePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Called with the formula name on every state transition
    pub fn with_observer(
        mut self,
        observer: impl Fn(&str, InstallState) + Send + Sync + 'static,
    ) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cellar(&self) -> &Cellar {
        &self.cellar
    }

    pub fn cache(&self) -> &DownloadCache {
        &self.cache
    }

    /// The bottle `formula` would pour on this platform, if any
    pub fn bottle_for(&self, formula: &impl Installable, spec: SpecKind) -> Option<Bottle> {
        formula.bottle(spec, self.platform.as_ref(), &self.config.bottle_domain)
    }

    /// Whether to pour a bottle instead of building
    fn should_pour(
        &self,
        formula: &Formula,
        active: &ActiveSpec<'_>,
        build_options: &BuildOptions,
        opts: &InstallOptions,
    ) -> bool {
        if !formula.bottled(active.kind, self.platform.as_ref()) {
            return false;
        }
        if opts.force_bottle || self.config.force_bottle {
            return true;
        }
        if opts.build_from_source || self.config.build_from_source {
            return false;
        }
        if !build_options.used_options().is_empty() {
            return false;
        }
        if !formula.pour_bottle() || !self.policy.allows(formula) {
            return false;
        }

        let compatible = active
            .spec
            .bottle()
            .is_some_and(|spec| spec.cellar.is_compatible_with(&self.config.cellar));
        if !compatible {
            tracing::info!(
                "{}: bottle is not relocatable to {}",
                formula.name,
                self.config.cellar.display()
            );
        }
        compatible
    }

    /// Install one formula
    pub async fn install(
        &self,
        formula: &Formula,
        opts: &InstallOptions,
    ) -> Result<InstallOutcome> {
        let start = Instant::now();
        let mut run = Run::new(&formula.name, self.observer.as_ref());

        match self.run_install(&mut run, formula, opts, start).await {
            Ok(mut outcome) => {
                outcome.states = run.states;
                Ok(outcome)
            }
            Err(e) => {
                run.enter(InstallState::Error);
                tracing::debug!("{} failed: {}", formula.name, e);
                Err(e)
            }
        }
    }

    /// Install several independent formulae concurrently.
    ///
    /// Each install takes its own lock; one failing never affects the others. Results are
    /// in input order.
    pub async fn install_all(
        &self,
        formulae: &[Formula],
        opts: &InstallOptions,
    ) -> Vec<Result<InstallOutcome>> {
        futures::future::join_all(formulae.iter().map(|formula| self.install(formula, opts))).await
    }

    async fn run_install(
        &self,
        run: &mut Run<'_>,
        formula: &Formula,
        opts: &InstallOptions,
        start: Instant,
    ) -> Result<InstallOutcome> {
        run.enter(InstallState::Resolving);
        let plan = self.resolve(formula, opts)?;
        let invalid_options = plan.build_options.invalid_option_names();

        if let Some(tab) = self.completed_install(formula, opts, &plan.keg) {
            run.enter(InstallState::Done);
            return Ok(already_installed(formula, plan, tab, invalid_options, start));
        }

        let cellar = self.cellar.clone();
        let dependencies = formula.runtime_dependencies().to_vec();
        let runtime_dependencies =
            Deferred::new(move || resolve_runtime_deps(&cellar, &dependencies));

        let locks = LockManager::new(&self.config.locks);
        let resource = LockResource::formula(&formula.name);
        locks.lock(&resource)?;
        run.enter(InstallState::Locked);

        // Another process may have finished the same install while we waited
        if let Some(tab) = self.completed_install(formula, opts, &plan.keg) {
            if let Err(e) = locks.unlock(&resource) {
                tracing::warn!("Failed to unlock {}: {}", formula.name, e);
            }
            run.enter(InstallState::Done);
            return Ok(already_installed(formula, plan, tab, invalid_options, start));
        }

        let result = self
            .install_locked(run, formula, opts, &plan, runtime_dependencies)
            .await;

        if let Err(e) = locks.unlock(&resource) {
            tracing::warn!("Failed to unlock {}: {}", formula.name, e);
        }

        let (poured, tab, linked, link_error) = result?;
        run.enter(InstallState::Done);
        tracing::info!(
            "Installed {} {} ({})",
            formula.name,
            plan.keg.version(),
            if poured { "bottle" } else { "source" }
        );

        Ok(InstallOutcome {
            name: formula.name.clone(),
            keg: plan.keg,
            spec: plan.active.kind,
            states: vec![],
            poured_from_bottle: poured,
            already_installed: false,
            tab: Some(tab),
            linked,
            link_error,
            invalid_options,
            time_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn resolve<'f>(&self, formula: &'f Formula, opts: &InstallOptions) -> Result<Plan<'f>> {
        let active = formula
            .active_spec(opts.spec)
            .ok_or_else(|| InstallError::IncompleteSpec {
                name: formula.name.clone(),
            })?;
        if opts.spec.is_some_and(|requested| requested != active.kind) {
            tracing::warn!(
                "{}: requested spec is not available, using {}",
                formula.name,
                active.kind
            );
        }

        let build_options = BuildOptions::from_strs(&opts.options, &formula.options);
        let keg = self
            .cellar
            .keg(&formula.name, &formula.pkg_version(active.version()));
        let bottle = self.bottle_for(formula, active.kind);
        let pour = self.should_pour(formula, &active, &build_options, opts);

        Ok(Plan {
            active,
            keg,
            build_options,
            bottle,
            pour,
        })
    }

    /// The receipt of a finished install of the requested version, unless forced
    fn completed_install(
        &self,
        formula: &Formula,
        opts: &InstallOptions,
        keg: &Keg,
    ) -> Option<Tab> {
        if opts.force || !formula.is_installed(&self.cellar, opts.spec) {
            return None;
        }
        match Tab::for_keg(keg) {
            Ok(tab) => {
                tracing::info!("{} {} is already installed", formula.name, keg.version());
                Some(tab)
            }
            Err(e) => {
                tracing::info!(
                    "{} {} has no readable receipt ({:#}); reinstalling",
                    formula.name,
                    keg.version(),
                    e
                );
                None
            }
        }
    }

    async fn install_locked<F>(
        &self,
        run: &mut Run<'_>,
        formula: &Formula,
        opts: &InstallOptions,
        plan: &Plan<'_>,
        runtime_dependencies: Deferred<Vec<RuntimeDependency>, F>,
    ) -> Result<(bool, Tab, usize, Option<String>)>
    where
        F: FnOnce() -> Vec<RuntimeDependency>,
    {
        let keg = &plan.keg;
        let previous = if keg.exists() {
            tracing::info!("Reinstalling {} {}", formula.name, keg.version());
            Some(self.set_aside(keg)?)
        } else {
            None
        };

        let result = self
            .install_keg(run, formula, opts, plan, runtime_dependencies)
            .await;

        match previous {
            Some(previous) if result.is_err() => {
                self.discard_keg(keg);
                self.restore(formula, keg, &previous);
            }
            Some(previous) => {
                if let Err(e) = fs::remove_dir_all(&previous.stored) {
                    tracing::warn!("Failed to remove {}: {}", previous.stored.display(), e);
                }
            }
            None => {}
        }
        result
    }

    /// Unlink `keg` and move it to a hidden directory in its rack
    fn set_aside(&self, keg: &Keg) -> Result<SetAside> {
        let was_linked = !keg.unlink(&self.config.prefix)?.is_empty();
        let stored = keg.rack().join(format!(".{}.reinstall", keg.version()));
        if stored.exists() {
            // Left over from an interrupted reinstall; the keg in place is newer
            fs::remove_dir_all(&stored)
                .with_context(|| format!("Failed to remove {}", stored.display()))?;
        }
        if let Err(e) = fs::rename(keg.path(), &stored) {
            if was_linked {
                keg.link(&self.config.prefix)?;
            }
            return Err(anyhow::Error::new(e)
                .context(format!("Failed to move {} aside", keg.path().display()))
                .into());
        }
        Ok(SetAside { stored, was_linked })
    }

    /// Move a set-aside keg back into place and relink it
    fn restore(&self, formula: &Formula, keg: &Keg, previous: &SetAside) {
        if let Err(e) = fs::rename(&previous.stored, keg.path()) {
            tracing::error!(
                "Failed to restore {} {} ({}); the previous keg was left in {}",
                formula.name,
                keg.version(),
                e,
                previous.stored.display()
            );
            return;
        }
        tracing::info!("Restored previous {} {}", formula.name, keg.version());

        let relinked = keg.optlink(&self.config.opt_dir()).and_then(|()| {
            if previous.was_linked {
                keg.link(&self.config.prefix)?;
            }
            Ok(())
        });
        if let Err(e) = relinked {
            tracing::warn!("Failed to relink {}: {:#}", formula.name, e);
        }
    }

    /// Pour or build into the (absent) keg, link it and write its receipt
    async fn install_keg<F>(
        &self,
        run: &mut Run<'_>,
        formula: &Formula,
        opts: &InstallOptions,
        plan: &Plan<'_>,
        runtime_dependencies: Deferred<Vec<RuntimeDependency>, F>,
    ) -> Result<(bool, Tab, usize, Option<String>)>
    where
        F: FnOnce() -> Vec<RuntimeDependency>,
    {
        let keg = &plan.keg;
        let poured = match (&plan.bottle, plan.pour) {
            (Some(bottle), true) => match self.pour(run, formula, bottle, keg).await {
                Ok(()) => true,
                Err(e) if self.can_fall_back(&e) => {
                    tracing::warn!(
                        "Bottle installation failed for {}: {}; building from source",
                        formula.name,
                        e
                    );
                    false
                }
                Err(e) => return Err(e),
            },
            _ => false,
        };

        if !poured {
            self.build(run, formula, plan).await?;
        }

        run.enter(InstallState::Linking);
        let (linked, link_error) = match self.link_keg(formula, keg) {
            Ok(linked) => (linked, None),
            Err(e) => {
                tracing::warn!("Failed to link {}: {:#}", formula.name, e);
                (0, Some(format!("{:#}", e)))
            }
        };

        run.enter(InstallState::RecordingTab);
        let mut tab = Tab::new(keg);
        tab.used_options = plan.build_options.used_options();
        tab.unused_options = plan.build_options.unused_options();
        tab.built_as_bottle = poured;
        tab.poured_from_bottle = poured;
        tab.installed_as_dependency = opts.installed_as_dependency;
        tab.installed_on_request = !opts.installed_as_dependency;
        tab.runtime_dependencies = runtime_dependencies.into_inner();
        tab.source = TabSource {
            tap: formula.tap.clone(),
            spec: Some(plan.active.kind.to_string()),
            versions: SourceVersions {
                stable: formula.specs.stable.as_ref().map(|s| s.version().to_string()),
                devel: formula.specs.devel.as_ref().map(|s| s.version().to_string()),
                head: formula.specs.head.as_ref().map(|s| s.version().to_string()),
            },
        };

        // A keg without a receipt is never left linked
        if let Err(e) = tab.write() {
            self.discard_keg(keg);
            return Err(e.into());
        }

        Ok((poured, tab, linked, link_error))
    }

    /// Pour failures other than integrity errors fall back to a source build when one
    /// is possible
    fn can_fall_back(&self, error: &InstallError) -> bool {
        !matches!(error, InstallError::ChecksumMismatch { .. }) && self.dev_tools.installed()
    }

    async fn pour(
        &self,
        run: &mut Run<'_>,
        formula: &Formula,
        bottle: &Bottle,
        keg: &Keg,
    ) -> Result<()> {
        let filename = bottle.filename.to_string();

        run.enter(InstallState::Fetching);
        let bytes = self
            .cache
            .fetch_with(self.fetcher.as_ref(), &bottle.url, &filename)
            .await?;

        run.enter(InstallState::Verifying);
        let bytes = self.verify(bytes, &bottle.checksum, &filename).await?;

        run.enter(InstallState::PouringBottle);
        self.policy.before_pour(formula);

        let cellar = self.config.cellar.clone();
        let name = formula.name.clone();
        let version = keg.version().to_string();
        let poured = tokio::task::spawn_blocking(move || {
            extract::pour_bottle(&bytes, &cellar, &name, &version)
        })
        .await
        .map_err(|e| anyhow::anyhow!("Bottle extraction task failed: {}", e))?;

        if let Err(e) = poured {
            self.discard_keg(keg);
            return Err(e.into());
        }

        self.policy.after_pour(formula);
        Ok(())
    }

    async fn build(&self, run: &mut Run<'_>, formula: &Formula, plan: &Plan<'_>) -> Result<()> {
        if !self.dev_tools.installed() {
            return Err(InstallError::BuildTools {
                name: formula.name.clone(),
            });
        }

        let spec = plan.active.spec;
        let filename = source_filename(&formula.name, plan.keg.version(), spec.url());

        run.enter(InstallState::Fetching);
        let bytes = self
            .cache
            .fetch_with(self.fetcher.as_ref(), spec.url(), &filename)
            .await?;

        let bytes = match spec.checksum() {
            Some(expected) => {
                run.enter(InstallState::Verifying);
                self.verify(bytes, expected, &filename).await?
            }
            None => {
                tracing::debug!("{}: no checksum declared for {}", formula.name, spec.url());
                bytes
            }
        };

        run.enter(InstallState::BuildingFromSource);
        let builder = SourceBuilder::new(self.executor.clone(), self.config.sandbox);
        let used_options = plan.build_options.used_options();
        let owned = formula.clone();
        let keg = plan.keg.clone();
        let built = tokio::task::spawn_blocking(move || {
            builder.build(&owned, &bytes, &filename, &keg, &used_options)
        })
        .await
        .map_err(|e| anyhow::anyhow!("Build task failed: {}", e))?;

        if let Err(e) = built {
            self.discard_keg(&plan.keg);
            return Err(e);
        }
        Ok(())
    }

    /// Checksum `bytes` off the async executor; a mismatch discards the cache entry
    async fn verify(&self, bytes: Vec<u8>, expected: &Checksum, filename: &str) -> Result<Vec<u8>> {
        let algorithm = expected.algorithm();
        let (actual, bytes) = tokio::task::spawn_blocking(move || {
            let actual = Checksum::compute(algorithm, &bytes);
            (actual, bytes)
        })
        .await
        .map_err(|e| anyhow::anyhow!("Checksum task failed: {}", e))?;

        if actual == *expected {
            return Ok(bytes);
        }

        if let Err(e) = self.cache.discard(filename).await {
            tracing::warn!("Failed to remove {} from the cache: {}", filename, e);
        }
        Err(InstallError::ChecksumMismatch {
            expected: expected.clone(),
            actual,
            path: self.cache.path_for(filename),
        })
    }

    fn link_keg(&self, formula: &Formula, keg: &Keg) -> anyhow::Result<usize> {
        keg.optlink(&self.config.opt_dir())?;
        if formula.keg_only {
            tracing::info!(
                "{} is keg-only and was not linked into {}",
                formula.name,
                self.config.prefix.display()
            );
            return Ok(0);
        }
        Ok(keg.link(&self.config.prefix)?.len())
    }

    /// Remove a failed keg along with any links made to it
    fn discard_keg(&self, keg: &Keg) {
        let removed = keg
            .unlink(&self.config.prefix)
            .and_then(|_| keg.remove_optlink(&self.config.opt_dir()))
            .and_then(|()| keg.uninstall());
        if let Err(e) = removed {
            tracing::warn!("Failed to clean up {}: {:#}", keg.path().display(), e);
        }
    }

    /// Remove every installed version of `name`.
    ///
    /// Refuses while other installed formulae record `name` as a runtime dependency,
    /// unless `ignore_dependencies` is set.
    pub fn uninstall(&self, name: &str, ignore_dependencies: bool) -> Result<UninstallOutcome> {
        let locks = LockManager::new(&self.config.locks);
        let resource = LockResource::formula(name);
        locks.lock(&resource)?;

        let result = self.uninstall_locked(name, ignore_dependencies);

        if let Err(e) = locks.unlock(&resource) {
            tracing::warn!("Failed to unlock {}: {}", name, e);
        }
        result
    }

    fn uninstall_locked(&self, name: &str, ignore_dependencies: bool) -> Result<UninstallOutcome> {
        let kegs = self.cellar.installed_kegs(name)?;
        if kegs.is_empty() {
            return Err(InstallError::NotInstalled(name.to_string()));
        }

        if !ignore_dependencies {
            let dependents = self.cellar.dependents_of(name)?;
            if !dependents.is_empty() {
                return Err(InstallError::HasDependents {
                    name: name.to_string(),
                    dependents,
                });
            }
        }

        let mut unlinked = 0;
        let mut versions = Vec::new();
        for keg in kegs {
            unlinked += keg.unlink(&self.config.prefix)?.len();
            keg.remove_optlink(&self.config.opt_dir())?;
            keg.uninstall()?;
            tracing::info!("Uninstalled {} {}", name, keg.version());
            versions.push(keg.version().to_string());
        }

        Ok(UninstallOutcome {
            name: name.to_string(),
            versions,
            unlinked,
        })
    }

    /// Link the newest installed keg of `name` into the prefix
    pub fn link(&self, name: &str) -> Result<Vec<PathBuf>> {
        let keg = self.latest_keg(name)?;
        keg.optlink(&self.config.opt_dir())?;
        Ok(keg.link(&self.config.prefix)?)
    }

    /// Remove the newest installed keg of `name` from the prefix
    pub fn unlink(&self, name: &str) -> Result<Vec<PathBuf>> {
        let keg = self.latest_keg(name)?;
        Ok(keg.unlink(&self.config.prefix)?)
    }

    fn latest_keg(&self, name: &str) -> Result<Keg> {
        self.cellar
            .latest_keg(name)?
            .ok_or_else(|| InstallError::NotInstalled(name.to_string()))
    }
}

fn already_installed(
    formula: &Formula,
    plan: Plan<'_>,
    tab: Tab,
    invalid_options: Vec<String>,
    start: Instant,
) -> InstallOutcome {
    InstallOutcome {
        name: formula.name.clone(),
        keg: plan.keg,
        spec: plan.active.kind,
        states: vec![],
        poured_from_bottle: false,
        already_installed: true,
        tab: Some(tab),
        linked: 0,
        link_error: None,
        invalid_options,
        time_ms: start.elapsed().as_millis() as u64,
    }
}

/// Installed versions of the formula's declared dependencies
fn resolve_runtime_deps(cellar: &Cellar, dependencies: &[String]) -> Vec<RuntimeDependency> {
    dependencies
        .iter()
        .filter_map(|full_name| {
            let short = full_name.rsplit('/').next().unwrap_or(full_name);
            match cellar.latest_keg(short) {
                Ok(Some(keg)) => Some(RuntimeDependency {
                    full_name: full_name.clone(),
                    version: keg.version().to_string(),
                    declared_directly: true,
                }),
                Ok(None) => {
                    tracing::warn!("Dependency {} is not installed", full_name);
                    None
                }
                Err(e) => {
                    tracing::warn!("Failed to inspect dependency {}: {:#}", full_name, e);
                    None
                }
            }
        })
        .collect()
}

/// Cache name for a source download: `{name}--{version}{ext}`
fn source_filename(name: &str, version: &str, url: &str) -> String {
    let last = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .rsplit('/')
        .next()
        .unwrap_or_default();

    let ext = if last.ends_with(".tar.gz") {
        ".tar.gz"
    } else {
        last.rfind('.').map_or("", |idx| &last[idx..])
    };
    format!("{}--{}{}", name, version, ext)
}
