//! Advisory locks over formulae and taps.
//!
//! A lock is a marker file in the locks directory, created with `O_EXCL` semantics so only
//! one holder can create it. Markers are plain files and outlive the process that created
//! them; a marker left behind by a crashed run keeps the resource locked until an operator
//! removes it.
//!
//! ```text
//! /opt/homebrew/var/homebrew/locks/
//!   wget.formula.lock              # "pid=4242 holder=4242-0"
//!   homebrew%2Fcore.tap.lock
//! ```
//!
//! Each [`LockManager`] is one holder. Locking a resource it already holds is a no-op;
//! locking a resource held by anyone else fails with
//! [`InstallError::OperationInProgress`](crate::error::InstallError::OperationInProgress).

use crate::error::{InstallError, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

static NEXT_HOLDER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Formula,
    Tap,
}

impl ResourceKind {
    fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Formula => "formula",
            ResourceKind::Tap => "tap",
        }
    }
}

/// Something that can be locked
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockResource {
    kind: ResourceKind,
    name: String,
}

impl LockResource {
    pub fn formula(name: &str) -> Self {
        Self {
            kind: ResourceKind::Formula,
            name: name.to_string(),
        }
    }

    pub fn tap(name: &str) -> Self {
        Self {
            kind: ResourceKind::Tap,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// `homebrew/core` tap → `homebrew%2Fcore.tap.lock`; distinct names never share a marker
    fn marker_name(&self) -> String {
        let escaped = self.name.replace('%', "%25").replace('/', "%2F");
        format!("{}.{}.lock", escaped, self.kind.as_str())
    }
}

impl fmt::Display for LockResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    LockedBySelf,
    LockedByOther,
}

/// One lock holder and the markers it currently owns
#[derive(Debug)]
pub struct LockManager {
    dir: PathBuf,
    holder: String,
    held: Mutex<BTreeSet<LockResource>>,
}

impl LockManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let id = NEXT_HOLDER.fetch_add(1, Ordering::Relaxed);
        Self {
            dir: dir.into(),
            holder: format!("{}-{}", std::process::id(), id),
            held: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn marker_path(&self, resource: &LockResource) -> PathBuf {
        self.dir.join(resource.marker_name())
    }

    fn held(&self) -> MutexGuard<'_, BTreeSet<LockResource>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self, resource: &LockResource) -> LockState {
        if self.held().contains(resource) {
            LockState::LockedBySelf
        } else if self.marker_path(resource).symlink_metadata().is_ok() {
            LockState::LockedByOther
        } else {
            LockState::Unlocked
        }
    }

    pub fn lock(&self, resource: &LockResource) -> Result<()> {
        let mut held = self.held();
        if held.contains(resource) {
            return Ok(());
        }

        fs::create_dir_all(&self.dir)?;
        let path = self.marker_path(resource);

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                tracing::debug!(
                    "{} is locked by {}",
                    resource,
                    read_marker(&path).unwrap_or_else(|| "an unknown holder".to_string())
                );
                return Err(InstallError::OperationInProgress {
                    name: resource.name().to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = writeln!(file, "pid={} holder={}", std::process::id(), self.holder) {
            let _ = fs::remove_file(&path);
            return Err(e.into());
        }

        held.insert(resource.clone());
        tracing::debug!("Locked {} ({})", resource, path.display());
        Ok(())
    }

    pub fn unlock(&self, resource: &LockResource) -> Result<()> {
        let mut held = self.held();
        if !held.contains(resource) {
            return Ok(());
        }

        let path = self.marker_path(resource);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!("Lock marker disappeared: {}", path.display());
            }
            Err(e) => return Err(e.into()),
        }

        held.remove(resource);
        tracing::debug!("Unlocked {}", resource);
        Ok(())
    }

    /// Release everything this holder still owns
    pub fn unlock_all(&self) -> Result<()> {
        let resources: Vec<LockResource> = self.held().iter().cloned().collect();
        for resource in &resources {
            self.unlock(resource)?;
        }
        Ok(())
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        if let Err(e) = self.unlock_all() {
            tracing::warn!("Failed to release locks: {}", e);
        }
    }
}

fn read_marker(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
