//! Final package assembly
//!
//! Bundles the per-pass fat slices into one XCFramework with a shared
//! header tree, a plain-text VERSION marker, and a manifest.json build
//! descriptor. macOS device passes are collapsed into a single slice
//! first: the package format wants one slice per platform identity,
//! not one per build pass.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;
use walkdir::WalkDir;
use zip::{write::FileOptions, ZipArchive, ZipWriter};

use crate::error::ForgeError;
use crate::exec::{Invocation, Runner};
use crate::matrix::{BuildConfig, Platform};
use crate::merge::PlatformMerge;
use crate::toolchain::XcodeToolchain;
use crate::utils::paths::{ensure_dir, ForgePaths};
use crate::utils::terminal::{print_info, print_stage, print_success};

/// One slice entry in the build descriptor
#[derive(Debug, Serialize)]
pub struct ManifestSlice {
    pub platform: String,
    pub passes: Vec<String>,
    pub architectures: Vec<String>,
    pub library: String,
}

/// Build descriptor written next to the bundle
#[derive(Debug, Serialize)]
pub struct PackageManifest {
    pub project: String,
    pub boost_version: String,
    pub variant: String,
    pub created_at: String,
    pub xcode_version: String,
    pub xcode_build: String,
    pub tarball_sha256: String,
    /// Header root relative to the dist directory; assumed identical
    /// across the passes that installed headers
    pub headers: String,
    pub slices: Vec<ManifestSlice>,
}

pub struct PackageContext<'a> {
    pub config: &'a BuildConfig,
    pub paths: &'a ForgePaths,
    pub toolchain: &'a XcodeToolchain,
    pub tarball_sha256: &'a str,
}

/// Assemble dist/: the XCFramework, its shared headers, VERSION and
/// manifest.json. Returns None when no slice was produced.
pub fn assemble(
    ctx: &PackageContext,
    merges: &[PlatformMerge],
    runner: &dyn Runner,
) -> Result<Option<PathBuf>> {
    print_stage("Assembling boost.xcframework");

    let slices = collect_slices(ctx, merges, runner)?;
    if slices.is_empty() {
        print_info("no library slices to package, skipping");
        return Ok(None);
    }

    // Resolved before xcodebuild runs so a header-less tree fails fast
    let headers_source = headers_source(ctx)?;

    let xcframework = ctx.paths.xcframework();
    if xcframework.exists() {
        fs::remove_dir_all(&xcframework).with_context(|| {
            format!("Failed to remove old bundle {}", xcframework.display())
        })?;
    }
    ensure_dir(&ctx.paths.dist_dir())?;

    let libraries: Vec<PathBuf> = slices.iter().map(|s| PathBuf::from(&s.library)).collect();
    ctx.toolchain
        .create_xcframework(runner, &libraries, &xcframework)
        .map_err(|err| package_failure("creating the XCFramework", err))?;

    copy_headers(&headers_source, &xcframework.join("Headers").join("boost"))?;
    rewrite_header_paths(runner, &xcframework)?;

    fs::write(
        ctx.paths.version_marker(),
        format!("{}\n", ctx.config.version),
    )
    .context("Failed to write VERSION")?;
    write_manifest(ctx, slices)?;

    print_success(&format!("Created {}", xcframework.display()));
    Ok(Some(xcframework))
}

/// One XCFramework `-library` input per iOS/tvOS pass; macOS passes
/// are fat-merged into a single desktop slice first
fn collect_slices(
    ctx: &PackageContext,
    merges: &[PlatformMerge],
    runner: &dyn Runner,
) -> Result<Vec<ManifestSlice>> {
    let mut slices = Vec::new();

    for merge in merges {
        let platform = merge.platform.as_str();
        if merge.slices.is_empty() {
            continue;
        }

        if merge.platform == Platform::Macos && merge.slices.len() > 1 {
            let fused = ctx.paths.fused_platform_archive(platform);
            let inputs: Vec<PathBuf> = merge.slices.iter().map(|s| s.archive.clone()).collect();
            ctx.toolchain
                .create_universal_binary(runner, &inputs, &fused)
                .map_err(|err| package_failure("fusing the macOS slices", err))?;

            let mut architectures = Vec::new();
            for slice in &merge.slices {
                for arch in &slice.architectures {
                    if !architectures.contains(arch) {
                        architectures.push(arch.clone());
                    }
                }
            }
            slices.push(ManifestSlice {
                platform: platform.to_string(),
                passes: merge.slices.iter().map(|s| s.pass.name().to_string()).collect(),
                architectures,
                library: fused.display().to_string(),
            });
        } else {
            for slice in &merge.slices {
                slices.push(ManifestSlice {
                    platform: platform.to_string(),
                    passes: vec![slice.pass.name().to_string()],
                    architectures: slice.architectures.clone(),
                    library: slice.archive.display().to_string(),
                });
            }
        }
    }

    Ok(slices)
}

/// The install prefix whose headers ship with the bundle. Iteration
/// order makes the last device-class pass win; headers are assumed
/// identical across passes, which is not verified.
fn headers_source(ctx: &PackageContext) -> Result<PathBuf> {
    let mut found = None;
    for platform in ctx.config.enabled_platforms() {
        let headers = ctx.paths.installed_headers(platform.as_str());
        if headers.is_dir() {
            found = Some(headers);
        }
    }
    found.ok_or_else(|| {
        ForgeError::package_error(
            "no installed headers found; did every install step run?",
            None,
        )
        .into()
    })
}

fn copy_headers(source: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(source) {
        let entry = entry.context("Failed to walk header tree")?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .context("Header path outside its tree")?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            ensure_dir(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                ensure_dir(parent)?;
            }
            fs::copy(entry.path(), &target).with_context(|| {
                format!("Failed to copy header {}", entry.path().display())
            })?;
        }
    }
    Ok(())
}

/// Point every slice's HeadersPath at the single shared header tree.
/// xcodebuild cannot express a shared header root itself, so the
/// bundle's Info.plist is rewritten after creation.
fn rewrite_header_paths(runner: &dyn Runner, xcframework: &Path) -> Result<()> {
    let plist = xcframework.join("Info.plist");
    let plist_arg = plist.display().to_string();

    let result = runner.run(
        &Invocation::new("plutil").args([
            "-extract",
            "AvailableLibraries",
            "raw",
            plist_arg.as_str(),
        ]),
        false,
    )?;
    if !result.success {
        return Err(ForgeError::package_error(
            format!("plutil could not read {}: {}", plist.display(), result.stderr.trim()),
            None,
        )
        .into());
    }
    let count: usize = result.stdout.trim().parse().map_err(|_| {
        ForgeError::package_error(
            format!("unexpected plutil output '{}'", result.stdout.trim()),
            None,
        )
    })?;

    for index in 0..count {
        let key = format!("AvailableLibraries.{index}.HeadersPath");
        let result = runner.run(
            &Invocation::new("plutil").args([
                "-insert",
                key.as_str(),
                "-string",
                "../Headers",
                plist_arg.as_str(),
            ]),
            false,
        )?;
        if !result.success {
            return Err(ForgeError::package_error(
                format!("plutil -insert {key} failed: {}", result.stderr.trim()),
                None,
            )
            .into());
        }
    }
    Ok(())
}

fn write_manifest(ctx: &PackageContext, slices: Vec<ManifestSlice>) -> Result<()> {
    let manifest = PackageManifest {
        project: "boost".to_string(),
        boost_version: ctx.config.version.to_string(),
        variant: ctx.config.variant.as_str().to_string(),
        created_at: Local::now().to_rfc3339(),
        xcode_version: ctx.toolchain.version_string().to_string(),
        xcode_build: ctx.toolchain.build_version().to_string(),
        tarball_sha256: ctx.tarball_sha256.to_string(),
        headers: "boost.xcframework/Headers".to_string(),
        slices,
    };

    let json = serde_json::to_string_pretty(&manifest).context("Failed to serialize manifest")?;
    fs::write(ctx.paths.manifest_file(), json).context("Failed to write manifest.json")?;
    Ok(())
}

fn package_failure(doing: &str, err: anyhow::Error) -> anyhow::Error {
    ForgeError::package_error(format!("{doing} failed"), Some(err)).into()
}

/// Zip the dist directory for distribution and print its contents
pub fn archive_dist(paths: &ForgePaths, config: &BuildConfig) -> Result<PathBuf> {
    let dist = paths.dist_dir();
    let zip_path = paths.variant_root().join(format!(
        "boost-{}-{}.zip",
        config.version,
        config.variant.as_str()
    ));

    let file = fs::File::create(&zip_path)
        .with_context(|| format!("Failed to create {}", zip_path.display()))?;
    let mut zip = ZipWriter::new(file);
    let options: FileOptions<()> = FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o755);

    for entry in WalkDir::new(&dist) {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = path.strip_prefix(&dist)?;
        zip.start_file(name.to_string_lossy().to_string(), options)?;
        let mut f = fs::File::open(path)?;
        let mut buffer = Vec::new();
        f.read_to_end(&mut buffer)?;
        zip.write_all(&buffer)?;
    }
    zip.finish()?;

    let size_mb = fs::metadata(&zip_path)?.len() as f64 / (1024.0 * 1024.0);
    print_success(&format!(
        "Archived {} ({:.2} MB)",
        zip_path.display(),
        size_mb
    ));
    print_zip_tree(&zip_path)?;
    Ok(zip_path)
}

/// Print contents of a ZIP file
fn print_zip_tree(zip_path: &Path) -> Result<()> {
    let file = fs::File::open(zip_path)?;
    let mut archive = ZipArchive::new(file)?;

    for i in 0..archive.len() {
        let file = archive.by_index(i)?;
        if !file.name().ends_with('/') {
            println!("   ├── {}", file.name());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::mock::MockRunner;
    use crate::matrix::{resolve, MatrixRequest, Pass};
    use crate::merge::SliceArtifact;

    fn xcode() -> XcodeToolchain {
        let runner = MockRunner::new()
            .stdout("xcode-select", "/\n")
            .stdout("xcodebuild", "Xcode 14.2\nBuild version 14C18\n");
        XcodeToolchain::detect(&runner).unwrap()
    }

    fn config_for(root: &Path, platforms: Vec<Platform>) -> BuildConfig {
        resolve(&MatrixRequest {
            platforms,
            libraries: "thread".to_string(),
            threads: Some(1),
            output_root: Some(root.to_path_buf()),
            ..Default::default()
        })
        .unwrap()
    }

    fn slice(paths: &ForgePaths, platform: &str, pass: Pass, archs: &[&str]) -> SliceArtifact {
        let archive = paths.slice_archive(platform, pass.name());
        fs::create_dir_all(archive.parent().unwrap()).unwrap();
        fs::write(&archive, b"!<arch>\n").unwrap();
        SliceArtifact {
            pass,
            architectures: archs.iter().map(|a| a.to_string()).collect(),
            archive,
        }
    }

    fn install_headers(paths: &ForgePaths, platform: &str) {
        let headers = paths.installed_headers(platform);
        fs::create_dir_all(headers.join("thread")).unwrap();
        fs::write(headers.join("version.hpp"), "#define BOOST_VERSION 108100\n").unwrap();
        fs::write(headers.join("thread").join("thread.hpp"), "// thread\n").unwrap();
    }

    /// xcodebuild fakes bundle creation, plutil reports two slices
    fn packaging_runner(slice_count: &str) -> MockRunner {
        MockRunner::new()
            .stdout_when("plutil", "-extract", slice_count)
            .effect("xcodebuild", |inv| {
                let output = inv
                    .args
                    .iter()
                    .skip_while(|a| a.as_str() != "-output")
                    .nth(1)
                    .cloned()
                    .unwrap_or_default();
                fs::create_dir_all(&output)?;
                fs::write(Path::new(&output).join("Info.plist"), "<plist/>")
            })
    }

    #[test]
    fn test_assemble_bundles_slices_headers_and_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_for(tmp.path(), vec![Platform::Ios]);
        let paths = config.paths();
        install_headers(&paths, "ios");
        let merges = vec![PlatformMerge {
            platform: Platform::Ios,
            slices: vec![
                slice(&paths, "ios", Pass::Iphone, &["arm64"]),
                slice(&paths, "ios", Pass::IphoneSim, &["x86_64", "arm64"]),
            ],
            universal_libraries: vec![],
            skipped: vec![],
        }];

        let runner = packaging_runner("2\n");
        let toolchain = xcode();
        let ctx = PackageContext {
            config: &config,
            paths: &paths,
            toolchain: &toolchain,
            tarball_sha256: "deadbeef",
        };
        let bundle = assemble(&ctx, &merges, &runner).unwrap().unwrap();

        let create = &runner.calls_of("xcodebuild")[0];
        assert_eq!(
            create.args.iter().filter(|a| a.as_str() == "-library").count(),
            2
        );

        // Shared headers are copied into the bundle and every slice's
        // HeadersPath is pointed at them
        assert!(bundle.join("Headers/boost/version.hpp").exists());
        assert!(bundle.join("Headers/boost/thread/thread.hpp").exists());
        let inserts: Vec<_> = runner
            .calls_of("plutil")
            .into_iter()
            .filter(|inv| inv.args.first().map(String::as_str) == Some("-insert"))
            .collect();
        assert_eq!(inserts.len(), 2);
        assert!(inserts[0].args.contains(&"AvailableLibraries.0.HeadersPath".to_string()));
        assert!(inserts[1].args.contains(&"AvailableLibraries.1.HeadersPath".to_string()));
        assert!(inserts.iter().all(|inv| inv.args.contains(&"../Headers".to_string())));

        assert_eq!(
            fs::read_to_string(paths.version_marker()).unwrap(),
            "1.81.0\n"
        );
        let manifest: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(paths.manifest_file()).unwrap()).unwrap();
        assert_eq!(manifest["boost_version"], "1.81.0");
        assert_eq!(manifest["tarball_sha256"], "deadbeef");
        assert_eq!(manifest["slices"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_macos_passes_collapse_into_one_slice() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_for(tmp.path(), vec![Platform::Macos]);
        let paths = config.paths();
        install_headers(&paths, "macos");
        let intel = slice(&paths, "macos", Pass::MacOs, &["x86_64"]);
        let silicon = slice(&paths, "macos", Pass::MacOsSilicon, &["arm64"]);
        let merges = vec![PlatformMerge {
            platform: Platform::Macos,
            slices: vec![intel.clone(), silicon.clone()],
            universal_libraries: vec![],
            skipped: vec![],
        }];

        let runner = packaging_runner("1\n");
        let toolchain = xcode();
        let ctx = PackageContext {
            config: &config,
            paths: &paths,
            toolchain: &toolchain,
            tarball_sha256: "deadbeef",
        };
        assemble(&ctx, &merges, &runner).unwrap().unwrap();

        // Both single-arch slices fuse into one desktop archive whose
        // architectures are the union of the inputs
        let fuse = &runner.calls_of("lipo")[0];
        assert_eq!(fuse.args.first().map(String::as_str), Some("-create"));
        assert!(fuse.args.contains(&intel.archive.display().to_string()));
        assert!(fuse.args.contains(&silicon.archive.display().to_string()));

        let create = &runner.calls_of("xcodebuild")[0];
        assert_eq!(
            create.args.iter().filter(|a| a.as_str() == "-library").count(),
            1
        );
        assert!(create
            .args
            .contains(&paths.fused_platform_archive("macos").display().to_string()));

        let manifest: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(paths.manifest_file()).unwrap()).unwrap();
        let slice = &manifest["slices"][0];
        assert_eq!(slice["architectures"][0], "x86_64");
        assert_eq!(slice["architectures"][1], "arm64");
        assert_eq!(slice["passes"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_preexisting_bundle_is_replaced() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_for(tmp.path(), vec![Platform::Ios]);
        let paths = config.paths();
        install_headers(&paths, "ios");
        let stale = paths.xcframework().join("stale.txt");
        fs::create_dir_all(paths.xcframework()).unwrap();
        fs::write(&stale, "old").unwrap();
        let merges = vec![PlatformMerge {
            platform: Platform::Ios,
            slices: vec![slice(&paths, "ios", Pass::Iphone, &["arm64"])],
            universal_libraries: vec![],
            skipped: vec![],
        }];

        let runner = packaging_runner("1\n");
        let toolchain = xcode();
        let ctx = PackageContext {
            config: &config,
            paths: &paths,
            toolchain: &toolchain,
            tarball_sha256: "deadbeef",
        };
        assemble(&ctx, &merges, &runner).unwrap();

        assert!(!stale.exists());
        assert!(paths.xcframework().join("Info.plist").exists());
    }

    #[test]
    fn test_missing_headers_fail_before_xcodebuild() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_for(tmp.path(), vec![Platform::Ios]);
        let paths = config.paths();
        let merges = vec![PlatformMerge {
            platform: Platform::Ios,
            slices: vec![slice(&paths, "ios", Pass::Iphone, &["arm64"])],
            universal_libraries: vec![],
            skipped: vec![],
        }];

        let runner = packaging_runner("1\n");
        let toolchain = xcode();
        let ctx = PackageContext {
            config: &config,
            paths: &paths,
            toolchain: &toolchain,
            tarball_sha256: "deadbeef",
        };
        let err = assemble(&ctx, &merges, &runner).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ForgeError>(),
            Some(ForgeError::Package { .. })
        ));
        assert!(runner.calls_of("xcodebuild").is_empty());
    }

    #[test]
    fn test_packaging_tool_failure_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_for(tmp.path(), vec![Platform::Ios]);
        let paths = config.paths();
        install_headers(&paths, "ios");
        let merges = vec![PlatformMerge {
            platform: Platform::Ios,
            slices: vec![slice(&paths, "ios", Pass::Iphone, &["arm64"])],
            universal_libraries: vec![],
            skipped: vec![],
        }];

        let runner = MockRunner::new().fail("xcodebuild", "error: invalid slice\n");
        let toolchain = xcode();
        let ctx = PackageContext {
            config: &config,
            paths: &paths,
            toolchain: &toolchain,
            tarball_sha256: "deadbeef",
        };
        let err = assemble(&ctx, &merges, &runner).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ForgeError>(),
            Some(ForgeError::Package { .. })
        ));
    }

    #[test]
    fn test_assemble_skips_when_nothing_was_merged() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_for(tmp.path(), vec![Platform::Tvos]);
        let paths = config.paths();
        let merges = vec![PlatformMerge {
            platform: Platform::Tvos,
            slices: vec![],
            universal_libraries: vec![],
            skipped: vec!["test".to_string()],
        }];

        let runner = packaging_runner("0\n");
        let toolchain = xcode();
        let ctx = PackageContext {
            config: &config,
            paths: &paths,
            toolchain: &toolchain,
            tarball_sha256: "deadbeef",
        };
        assert!(assemble(&ctx, &merges, &runner).unwrap().is_none());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_archive_dist_zips_the_dist_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_for(tmp.path(), vec![Platform::Ios]);
        let paths = config.paths();
        let dist = paths.dist_dir();
        fs::create_dir_all(dist.join("boost.xcframework")).unwrap();
        fs::write(dist.join("VERSION"), "1.81.0\n").unwrap();
        fs::write(dist.join("boost.xcframework").join("Info.plist"), "<plist/>").unwrap();

        let zip_path = archive_dist(&paths, &config).unwrap();
        assert!(zip_path.ends_with("boost-1.81.0-release.zip"));

        let mut archive = ZipArchive::new(fs::File::open(&zip_path).unwrap()).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.contains(&"VERSION".to_string()));
        assert!(names.contains(&"boost.xcframework/Info.plist".to_string()));
    }
}
