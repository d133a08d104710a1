//! Source acquisition and preparation
//!
//! Gets a ready-to-compile Boost source tree: download (cached),
//! unpack (skipped when the tree exists), the darwin.jam flag fix for
//! old releases under new Xcodes, and the two SDK headers the tvOS
//! sysroot is missing. Each step is independently re-runnable.

pub mod download;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::error::{hints, ForgeError};
use crate::matrix::{BuildConfig, Platform};
use crate::utils::paths::ensure_dir;
use crate::utils::terminal::{create_spinner, print_info};
use crate::version::Version;

/// Compiler flag that newer Xcode clangs reject outright
const COALESCE_FLAG: &str = "-fcoalesce-templates";

/// Last release whose build scripts still emit the flag
const COALESCE_LAST_BAD: Version = Version {
    major: 1,
    minor: 73,
    patch: 0,
};

/// First Xcode whose clang rejects it
const COALESCE_FIRST_STRICT_XCODE: Version = Version {
    major: 11,
    minor: 4,
    patch: 0,
};

/// Headers copied from the device SDK into the source root; the tvOS
/// sysroot does not ship them but Boost.Test and iostreams include them
const SYNTHESIZED_HEADERS: &[&str] = &["crt_externs.h", "bzlib.h"];

/// A prepared source tree
#[derive(Debug)]
pub struct SourceTree {
    pub dir: PathBuf,
    pub tarball_path: PathBuf,
    pub tarball_sha256: String,
}

/// Download, unpack, and prepare the Boost source tree.
///
/// `device_sdk_include` is the iOS device SDK's include directory,
/// or None when no Apple-embedded platform is being built (pure macOS
/// builds need no synthesized headers).
pub fn ensure_source(
    config: &BuildConfig,
    xcode_version: &Version,
    device_sdk_include: Option<&Path>,
    verbose: bool,
) -> Result<SourceTree> {
    let paths = config.paths();
    let archive = download::ensure_tarball(&config.version, &config.cache_dir)?;
    if verbose {
        if archive.from_cache {
            print_info(&format!("using cached {}", archive.path.display()));
        }
        print_info(&format!("tarball sha256 {}", archive.sha256));
    }

    let source_dir = paths.source_dir();
    let fresh = unpack_if_needed(&archive.path, &paths.sources_root(), &source_dir)?;
    if !fresh && verbose {
        print_info(&format!(
            "source tree {} already unpacked, skipping",
            source_dir.display()
        ));
    }

    patch_darwin_jam(&source_dir, &config.version, xcode_version, fresh)?;

    if let Some(include_dir) = device_sdk_include {
        synthesize_headers(&source_dir, include_dir)?;
    }

    Ok(SourceTree {
        dir: source_dir,
        tarball_path: archive.path,
        tarball_sha256: archive.sha256,
    })
}

/// True when building anything that needs the synthesized SDK headers
pub fn needs_synthesized_headers(config: &BuildConfig) -> bool {
    config
        .enabled_platforms()
        .iter()
        .any(|p| matches!(p, Platform::Ios | Platform::Tvos))
}

/// Unpack the tarball unless the tree is already there. Returns true
/// when extraction actually ran.
///
/// Presence of the directory is the only check; a tree corrupted by a
/// killed run is not detected here, `clean --purge` is the remedy.
pub fn unpack_if_needed(tarball: &Path, sources_root: &Path, source_dir: &Path) -> Result<bool> {
    if source_dir.exists() {
        return Ok(false);
    }

    ensure_dir(sources_root)?;
    let spinner = create_spinner(&format!("Unpacking {}", tarball.display()));

    let file = std::fs::File::open(tarball)
        .with_context(|| format!("Failed to open {}", tarball.display()))?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);
    archive
        .unpack(sources_root)
        .with_context(|| format!("Failed to unpack {}", tarball.display()))?;

    spinner.finish_and_clear();

    if !source_dir.exists() {
        return Err(ForgeError::config_error_with_hint(
            format!(
                "tarball did not contain the expected top-level directory {}",
                source_dir.display()
            ),
            "the download may be truncated; delete it from the cache and retry",
        )
        .into());
    }
    Ok(true)
}

/// Strip `-fcoalesce-templates` from tools/build/src/tools/darwin.jam.
///
/// Gated on release <= 1.73.0 and Xcode >= 11.4; outside the gate the
/// flag is either absent upstream or still accepted by clang. On a
/// pre-existing tree the patch has already run, so a missing flag is
/// only an error right after a fresh unpack.
pub fn patch_darwin_jam(
    source_dir: &Path,
    boost_version: &Version,
    xcode_version: &Version,
    fresh_unpack: bool,
) -> Result<()> {
    if *boost_version > COALESCE_LAST_BAD || *xcode_version < COALESCE_FIRST_STRICT_XCODE {
        return Ok(());
    }

    let jam = source_dir
        .join("tools")
        .join("build")
        .join("src")
        .join("tools")
        .join("darwin.jam");
    let text = std::fs::read_to_string(&jam)
        .with_context(|| format!("Failed to read {}", jam.display()))?;

    if !text.contains(COALESCE_FLAG) {
        if fresh_unpack {
            return Err(ForgeError::patch_error(
                jam.display().to_string(),
                format!("expected flag '{}' not present", COALESCE_FLAG),
                hints::darwin_jam(),
            )
            .into());
        }
        return Ok(());
    }

    let patched = text.replace(COALESCE_FLAG, "");
    std::fs::write(&jam, patched).with_context(|| format!("Failed to write {}", jam.display()))?;
    Ok(())
}

/// Copy the headers the tvOS SDK lacks from the device SDK include dir
/// into the source root. Copies are made writable so a re-run can
/// overwrite them (SDK headers are read-only).
pub fn synthesize_headers(source_dir: &Path, sdk_include_dir: &Path) -> Result<()> {
    for name in SYNTHESIZED_HEADERS {
        let src = sdk_include_dir.join(name);
        let dest = source_dir.join(name);

        std::fs::copy(&src, &dest).with_context(|| {
            format!("Failed to copy {} to {}", src.display(), dest.display())
        })?;

        let mut perms = std::fs::metadata(&dest)
            .with_context(|| format!("Failed to stat {}", dest.display()))?
            .permissions();
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
        std::fs::set_permissions(&dest, perms)
            .with_context(|| format!("Failed to chmod {}", dest.display()))?;
    }
    Ok(())
}
