//! Release tarball download and caching

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::error::ForgeError;
use crate::utils::paths::ensure_dir;
use crate::utils::terminal::{create_download_bar, create_spinner};
use crate::version::Version;

/// First release published on the boost.io archive host; older
/// releases only exist on SourceForge
const ARCHIVE_HOST_SWITCH: Version = Version {
    major: 1,
    minor: 63,
    patch: 0,
};

/// Canonical tarball file name for a release
pub fn tarball_name(version: &Version) -> String {
    format!("boost_{}.tar.gz", version.underscored())
}

/// Download URL for a release, routed by age
pub fn archive_url(version: &Version) -> String {
    let file = tarball_name(version);
    if *version >= ARCHIVE_HOST_SWITCH {
        format!("https://archives.boost.io/release/{version}/source/{file}")
    } else {
        format!("https://downloads.sourceforge.net/project/boost/boost/{version}/{file}")
    }
}

/// A tarball present in the cache, fingerprinted
#[derive(Debug)]
pub struct DownloadedArchive {
    pub path: PathBuf,
    pub sha256: String,
    pub from_cache: bool,
}

/// Get the release tarball into the cache, downloading it on first use.
///
/// The download streams into a temporary file and lands under its final
/// name with one rename, so an interrupted run never leaves a partial
/// tarball behind. No retries; a network failure is fatal.
pub fn ensure_tarball(version: &Version, cache_dir: &Path) -> Result<DownloadedArchive> {
    ensure_dir(cache_dir)?;
    let target = cache_dir.join(tarball_name(version));

    if target.exists() {
        let sha256 = sha256_file(&target)?;
        return Ok(DownloadedArchive {
            path: target,
            sha256,
            from_cache: true,
        });
    }

    let url = archive_url(version);
    let sha256 = download_to(&url, &target, cache_dir)?;
    Ok(DownloadedArchive {
        path: target,
        sha256,
        from_cache: false,
    })
}

fn download_to(url: &str, target: &Path, cache_dir: &Path) -> Result<String> {
    // The blocking client's default 30s timeout spans the whole body
    // and a release tarball is >100 MB, so cap only the connect phase
    let client = reqwest::blocking::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(None::<Duration>)
        .user_agent(format!("boostforge/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to create HTTP client")?;

    let mut response = client
        .get(url)
        .send()
        .map_err(|e| ForgeError::download_error(url, e.to_string(), Some(e.into())))?;

    let status = response.status();
    if !status.is_success() {
        return Err(
            ForgeError::download_error(url, format!("HTTP {}", status.as_u16()), None).into(),
        );
    }

    let total = response.content_length().unwrap_or(0);
    let bar = if total > 0 {
        create_download_bar(total, "Downloading")
    } else {
        create_spinner("Downloading")
    };

    let mut tmp = tempfile::NamedTempFile::new_in(cache_dir)
        .context("Failed to create temporary download file")?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];

    loop {
        let n = response
            .read(&mut buf)
            .map_err(|e| ForgeError::download_error(url, e.to_string(), Some(e.into())))?;
        if n == 0 {
            break;
        }
        tmp.write_all(&buf[..n])
            .context("Failed to write download to disk")?;
        hasher.update(&buf[..n]);
        bar.inc(n as u64);
    }
    bar.finish_and_clear();

    tmp.persist(target)
        .with_context(|| format!("Failed to move download into place: {}", target.display()))?;

    Ok(format!("{:x}", hasher.finalize()))
}

/// SHA-256 of a file on disk, hex encoded
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(format!("{:x}", hasher.finalize()))
}
