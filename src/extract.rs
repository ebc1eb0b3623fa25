//! Bottle pouring and source staging.
//!
//! Bottles are tar.gz archives of a keg, rooted at `{name}/{version}`:
//! ```text
//! Input:  foo--1.0.arm64_sonoma.bottle.tar.gz
//!   foo/1.0/bin/foo
//!   foo/1.0/share/man/man1/foo.1
//! Poured: <cellar>/foo/1.0/
//! ```
//!
//! Archives are unpacked into a hidden staging directory next to the kegs and only
//! renamed into place once extraction succeeded, so a failed pour leaves nothing behind
//! in the Cellar.
//!
//! # Bottle Revisions
//!
//! A bottle built from a revised formula may carry a `_N` suffix on its version
//! directory (`1.0_1`). The directory is found regardless of suffix and poured to the
//! keg path the caller asked for.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::fs;
use std::path::{Path, PathBuf};
use tar::Archive;

/// Unpack a gzip-compressed tarball into `dest`
pub fn unpack_tar_gz(bytes: &[u8], dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create directory: {}", dest.display()))?;

    let mut archive = Archive::new(GzDecoder::new(bytes));
    archive
        .unpack(dest)
        .with_context(|| format!("Failed to extract archive to: {}", dest.display()))
}

/// Pour a bottle into `<cellar>/<name>/<pkg_version>` and return the keg path
pub fn pour_bottle(bytes: &[u8], cellar: &Path, name: &str, pkg_version: &str) -> Result<PathBuf> {
    fs::create_dir_all(cellar)
        .with_context(|| format!("Failed to create Cellar directory: {}", cellar.display()))?;

    let staging = tempfile::Builder::new()
        .prefix(".pour-")
        .tempdir_in(cellar)
        .with_context(|| format!("Failed to create staging directory in {}", cellar.display()))?;
    unpack_tar_gz(bytes, staging.path())?;

    let extracted = find_version_dir(&staging.path().join(name), pkg_version)?;

    let rack = cellar.join(name);
    let keg = rack.join(pkg_version);
    fs::create_dir_all(&rack)
        .with_context(|| format!("Failed to create rack: {}", rack.display()))?;
    if keg.exists() {
        fs::remove_dir_all(&keg)
            .with_context(|| format!("Failed to replace existing keg: {}", keg.display()))?;
    }
    fs::rename(&extracted, &keg)
        .with_context(|| format!("Failed to move bottle into {}", keg.display()))?;

    tracing::debug!("Poured {} into {}", name, keg.display());
    Ok(keg)
}

/// The bottle's version directory: exact match first, then `{version}_N`
fn find_version_dir(formula_dir: &Path, version: &str) -> Result<PathBuf> {
    let exact = formula_dir.join(version);
    if exact.is_dir() {
        return Ok(exact);
    }

    // The revision may live on either side: archive has 1.0_1 for keg 1.0, or vice versa
    let base = version.split_once('_').map_or(version, |(base, _)| base);
    let found = fs::read_dir(formula_dir)
        .with_context(|| format!("Bottle has no directory for {}", formula_dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .find(|dir| dir == base || dir.starts_with(&format!("{}_", base)))
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Extraction failed: no directory found matching version {} in {}",
                version,
                formula_dir.display()
            )
        })?;

    Ok(formula_dir.join(found))
}

/// Stage a downloaded source artifact into `dest` and return the build directory.
///
/// Tarballs are unpacked and a single top-level directory is descended into; any other
/// file is copied in as-is.
pub fn stage_source(bytes: &[u8], filename: &str, dest: &Path) -> Result<PathBuf> {
    if filename.ends_with(".tar.gz") || filename.ends_with(".tgz") {
        unpack_tar_gz(bytes, dest)?;
    } else {
        fs::create_dir_all(dest)?;
        fs::write(dest.join(filename), bytes)
            .with_context(|| format!("Failed to stage {}", filename))?;
    }

    let entries: Vec<PathBuf> = fs::read_dir(dest)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();

    match entries.as_slice() {
        [only] if only.is_dir() => Ok(only.clone()),
        _ => Ok(dest.to_path_buf()),
    }
}
