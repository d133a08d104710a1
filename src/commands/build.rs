//! Build command implementation
//!
//! Runs the whole pipeline: resolve the target matrix, prepare the
//! source tree, compile every platform pass, merge the staged archives
//! into per-platform slices, and assemble the XCFramework.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;

use crate::build::{self, BuildContext, PassResult};
use crate::exec::{ProcessRunner, Runner};
use crate::matrix::{self, BuildConfig, MatrixRequest, Platform};
use crate::merge::{self, MergeContext, PlatformMerge};
use crate::package::{self, PackageContext};
use crate::source;
use crate::toolchain::{self, XcodeToolchain};
use crate::utils::paths::ForgePaths;
use crate::utils::terminal::print_info;

/// Build Boost as static libraries for Apple platforms
#[derive(Args, Debug)]
pub struct BuildCommand {
    /// Build for iOS (device + simulator)
    #[arg(long)]
    pub ios: bool,

    /// Build for tvOS (device + simulator)
    #[arg(long)]
    pub tvos: bool,

    /// Build for macOS (Intel + Apple Silicon)
    #[arg(long)]
    pub macos: bool,

    /// Boost release to build
    #[arg(long, value_name = "X.Y.Z", default_value = matrix::DEFAULT_BOOST_VERSION)]
    pub boost_version: String,

    /// Libraries to build: "all", "none", or a space-separated list
    #[arg(long, value_name = "LIST", default_value = "all")]
    pub libs: String,

    /// iOS device architectures (comma-separated)
    #[arg(long, value_name = "ARCHS")]
    pub ios_archs: Option<String>,

    /// iOS simulator architectures (comma-separated)
    #[arg(long, value_name = "ARCHS")]
    pub ios_sim_archs: Option<String>,

    /// tvOS device architectures (comma-separated)
    #[arg(long, value_name = "ARCHS")]
    pub tvos_archs: Option<String>,

    /// tvOS simulator architectures (comma-separated)
    #[arg(long, value_name = "ARCHS")]
    pub tvos_sim_archs: Option<String>,

    /// macOS Intel architectures (comma-separated)
    #[arg(long, value_name = "ARCHS")]
    pub macos_archs: Option<String>,

    /// macOS Apple Silicon architectures (comma-separated)
    #[arg(long, value_name = "ARCHS")]
    pub macos_silicon_archs: Option<String>,

    /// Minimum iOS deployment version
    #[arg(long, value_name = "VER")]
    pub min_ios_version: Option<String>,

    /// Minimum tvOS deployment version
    #[arg(long, value_name = "VER")]
    pub min_tvos_version: Option<String>,

    /// Minimum macOS deployment version
    #[arg(long, value_name = "VER")]
    pub min_macos_version: Option<String>,

    /// Pin the iOS SDK version instead of using the newest installed
    #[arg(long, value_name = "VER")]
    pub ios_sdk_version: Option<String>,

    /// Pin the tvOS SDK version instead of using the newest installed
    #[arg(long, value_name = "VER")]
    pub tvos_sdk_version: Option<String>,

    /// Pin the macOS SDK version instead of using the newest installed
    #[arg(long, value_name = "VER")]
    pub macos_sdk_version: Option<String>,

    /// Number of parallel b2 jobs (default: all host cores)
    #[arg(short = 'j', long, value_name = "N")]
    pub threads: Option<usize>,

    /// Build the debug variant
    #[arg(long)]
    pub debug: bool,

    /// Skip the per-library universal (fat) archives
    #[arg(long)]
    pub no_universal: bool,

    /// Skip the XCFramework assembly step
    #[arg(long)]
    pub no_framework: bool,

    /// Keep derived trees from a previous run instead of cleaning them
    #[arg(long)]
    pub no_clean: bool,

    /// TOML file overriding the built-in exclusion tables
    #[arg(long, value_name = "FILE")]
    pub exclusions: Option<PathBuf>,

    /// Output root directory
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Tarball cache directory
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Zip the dist directory after assembly
    #[arg(long)]
    pub archive: bool,
}

impl BuildCommand {
    fn to_request(&self) -> MatrixRequest {
        let mut platforms = Vec::new();
        if self.ios {
            platforms.push(Platform::Ios);
        }
        if self.tvos {
            platforms.push(Platform::Tvos);
        }
        if self.macos {
            platforms.push(Platform::Macos);
        }

        MatrixRequest {
            boost_version: self.boost_version.clone(),
            libraries: self.libs.clone(),
            platforms,
            ios_archs: split_archs(&self.ios_archs),
            ios_sim_archs: split_archs(&self.ios_sim_archs),
            tvos_archs: split_archs(&self.tvos_archs),
            tvos_sim_archs: split_archs(&self.tvos_sim_archs),
            macos_archs: split_archs(&self.macos_archs),
            macos_silicon_archs: split_archs(&self.macos_silicon_archs),
            min_ios_version: self.min_ios_version.clone(),
            min_tvos_version: self.min_tvos_version.clone(),
            min_macos_version: self.min_macos_version.clone(),
            ios_sdk_version: self.ios_sdk_version.clone(),
            tvos_sdk_version: self.tvos_sdk_version.clone(),
            macos_sdk_version: self.macos_sdk_version.clone(),
            threads: self.threads,
            debug: self.debug,
            no_universal: self.no_universal,
            no_framework: self.no_framework,
            no_clean: self.no_clean,
            output_root: self.output_dir.clone(),
            cache_dir: self.cache_dir.clone(),
            exclusions_file: self.exclusions.clone(),
        }
    }

    /// Execute the build command
    pub fn execute(self, verbose: bool) -> Result<()> {
        let config = matrix::resolve(&self.to_request())?;
        let runner = ProcessRunner;

        let outcome = run_pipeline(&config, &runner, verbose, self.archive)?;
        print_results(&config, &outcome, verbose);
        Ok(())
    }
}

/// Comma-separated architecture list from the CLI
fn split_archs(input: &Option<String>) -> Option<Vec<String>> {
    input.as_ref().map(|s| {
        s.split(',')
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect()
    })
}

/// Everything the pipeline produced, for the final summary
#[derive(Debug)]
pub struct PipelineOutcome {
    pub passes: Vec<PassResult>,
    pub merges: Vec<PlatformMerge>,
    pub bundle: Option<PathBuf>,
    pub archive: Option<PathBuf>,
    pub total_secs: f64,
}

/// Run every stage against one resolved configuration.
///
/// Stages run strictly in order and the first failure aborts the run;
/// partial artifacts from an aborted run are removed by the next
/// pre-build clean (or `boostforge clean`).
pub fn run_pipeline(
    config: &BuildConfig,
    runner: &dyn Runner,
    verbose: bool,
    archive: bool,
) -> Result<PipelineOutcome> {
    let started = Instant::now();
    let paths = config.paths();

    print_header(config);

    let xcode = XcodeToolchain::detect(runner)?;
    if verbose {
        print_info(&format!(
            "Xcode {} ({}) at {}",
            xcode.version_string(),
            xcode.build_version(),
            xcode.developer_dir().display()
        ));
    }

    if config.clean_first {
        clean_previous(config, &paths)?;
    }

    // The tvOS sysroot lacks headers some Boost libraries include, so
    // the iOS device SDK supplies them during source preparation
    let device_sdk_include = if source::needs_synthesized_headers(config) {
        Some(
            xcode
                .sdk_path(runner, "iphoneos")?
                .join("usr")
                .join("include"),
        )
    } else {
        None
    };

    let tree = source::ensure_source(
        config,
        xcode.version(),
        device_sdk_include.as_deref(),
        verbose,
    )?;

    toolchain::write_user_config(&paths.user_config_jam(), &config.specs, &xcode, runner)?;

    let ctx = BuildContext::new(config, tree.dir.clone(), verbose);
    let passes = build::run_all(&ctx, runner)?;

    let merge_ctx = MergeContext {
        config,
        paths: &paths,
        toolchain: &xcode,
    };
    let merges = merge::merge_all(&merge_ctx, runner)?;

    let bundle = if config.framework {
        let package_ctx = PackageContext {
            config,
            paths: &paths,
            toolchain: &xcode,
            tarball_sha256: &tree.tarball_sha256,
        };
        package::assemble(&package_ctx, &merges, runner)?
    } else {
        None
    };

    let archive_path = if archive && bundle.is_some() {
        Some(package::archive_dist(&paths, config)?)
    } else {
        None
    };

    Ok(PipelineOutcome {
        passes,
        merges,
        bundle,
        archive: archive_path,
        total_secs: started.elapsed().as_secs_f64(),
    })
}

fn print_header(config: &BuildConfig) {
    let platforms: Vec<&str> = config
        .enabled_platforms()
        .iter()
        .map(|p| p.as_str())
        .collect();
    let libraries = if config.libraries.is_empty() {
        "none (headers only)".to_string()
    } else {
        config
            .libraries
            .iter()
            .map(|l| l.name.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    };

    eprintln!("{}", "=".repeat(80));
    eprintln!(
        "Building Boost {} ({}) for {}",
        config.version,
        config.variant.as_str(),
        platforms.join(", ")
    );
    eprintln!("Libraries: {}", libraries);
    eprintln!("Jobs: {}", config.threads);
    eprintln!("{}", "=".repeat(80));
}

/// Drop derived trees of the enabled platforms plus the dist directory.
/// Sources, the tarball cache, and other platforms' trees stay.
fn clean_previous(config: &BuildConfig, paths: &ForgePaths) -> Result<()> {
    let mut targets: Vec<PathBuf> = config
        .enabled_platforms()
        .iter()
        .map(|p| paths.platform_dir(p.as_str()))
        .collect();
    targets.push(paths.dist_dir());

    for dir in targets {
        if dir.is_dir() {
            std::fs::remove_dir_all(&dir)
                .with_context(|| format!("Failed to clean {}", dir.display()))?;
        }
    }
    Ok(())
}

/// Print build results summary
fn print_results(config: &BuildConfig, outcome: &PipelineOutcome, verbose: bool) {
    if verbose {
        eprintln!("\n=== Build Summary ===");
        for result in &outcome.passes {
            eprintln!(
                "  {} ({:.2}s): {} libraries [{}]",
                result.pass,
                result.duration_secs,
                result.libraries_built,
                result.architectures.join(", ")
            );
        }
    }

    eprintln!(
        "\n✓ Boost {} built successfully in {:.2}s",
        config.version, outcome.total_secs
    );

    for merge in &outcome.merges {
        for slice in &merge.slices {
            eprintln!(
                "  {} [{}]: {}",
                slice.pass,
                slice.architectures.join(", "),
                slice.archive.display()
            );
        }
        if !merge.skipped.is_empty() {
            eprintln!(
                "  {}: no archive for {}",
                merge.platform,
                merge.skipped.join(", ")
            );
        }
    }

    if let Some(bundle) = &outcome.bundle {
        eprintln!("  XCFramework: {}", bundle.display());
    }
    if let Some(zip) = &outcome.archive {
        eprintln!("  Archive: {}", zip.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForgeError;
    use crate::exec::mock::MockRunner;
    use crate::source::download::tarball_name;
    use crate::version::Version;
    use std::path::Path;

    /// Seed the cache and an unpacked source tree so the pipeline never
    /// reaches for the network or a bootstrap
    fn seed_source(out: &Path, cache: &Path) {
        let version = Version::parse("1.81.0").unwrap();
        std::fs::create_dir_all(cache).unwrap();
        std::fs::write(cache.join(tarball_name(&version)), b"cached tarball").unwrap();

        let source = out.join("src").join("boost_1_81_0");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("b2"), "#!/bin/sh\n").unwrap();
    }

    fn macos_config(out: &Path, cache: &Path, libs: &str) -> BuildConfig {
        let req = MatrixRequest {
            platforms: vec![Platform::Macos],
            libraries: libs.to_string(),
            threads: Some(1),
            output_root: Some(out.to_path_buf()),
            cache_dir: Some(cache.to_path_buf()),
            ..Default::default()
        };
        matrix::resolve(&req).unwrap()
    }

    fn pipeline_runner(sdk_dir: &Path) -> MockRunner {
        MockRunner::new()
            .stdout("xcode-select", "/\n")
            .stdout("xcodebuild", "Xcode 14.2\nBuild version 14C18\n")
            .stdout_when("xcrun", "--find", "/toolchain/usr/bin/clang++\n")
            .stdout_when("xcrun", "macosx", &format!("{}\n", sdk_dir.display()))
    }

    #[test]
    fn test_install_failure_stops_before_packaging() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out");
        let cache = tmp.path().join("cache");
        seed_source(&out, &cache);
        let sdk = tmp.path().join("MacOSX.sdk");
        std::fs::create_dir_all(&sdk).unwrap();

        let config = macos_config(&out, &cache, "system");
        let runner = pipeline_runner(&sdk).fail_when("b2", "install", "link failed\n");

        let err = run_pipeline(&config, &runner, false, false).unwrap_err();
        match err.downcast_ref::<ForgeError>() {
            Some(ForgeError::BuildFailure { platform, .. }) => assert_eq!(platform, "macos"),
            other => panic!("unexpected error: {other:?}"),
        }

        // Nothing downstream of the failed pass may have run
        assert!(runner.calls_of("lipo").is_empty());
        assert!(runner.calls_of("ar").is_empty());
        assert!(runner
            .calls_of("xcodebuild")
            .iter()
            .all(|inv| !inv.args.iter().any(|a| a == "-create-xcframework")));
    }

    #[test]
    fn test_headers_only_run_skips_compilation_and_packaging() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out");
        let cache = tmp.path().join("cache");
        seed_source(&out, &cache);
        let sdk = tmp.path().join("MacOSX.sdk");
        std::fs::create_dir_all(&sdk).unwrap();

        let config = macos_config(&out, &cache, "none");
        let runner = pipeline_runner(&sdk);

        let outcome = run_pipeline(&config, &runner, false, false).unwrap();

        assert!(outcome.bundle.is_none());
        assert!(outcome.archive.is_none());
        assert_eq!(outcome.passes.len(), 2);
        assert!(outcome.passes.iter().all(|p| p.libraries_built == 0));
        assert!(outcome.merges.iter().all(|m| m.slices.is_empty()));
        assert!(runner.calls_of("b2").is_empty());
        assert!(runner.calls_of("lipo").is_empty());

        // The toolchain descriptor is still written for both passes
        let jam = std::fs::read_to_string(config.paths().user_config_jam()).unwrap();
        assert_eq!(jam.matches("using darwin").count(), 2);
    }

    #[test]
    fn test_pre_build_clean_drops_only_enabled_platform_trees() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out");
        let cache = tmp.path().join("cache");
        seed_source(&out, &cache);
        let sdk = tmp.path().join("MacOSX.sdk");
        std::fs::create_dir_all(&sdk).unwrap();

        let config = macos_config(&out, &cache, "none");
        let paths = config.paths();

        // Leftovers from an earlier run: one enabled, one not
        let stale_macos = paths.platform_dir("macos").join("obj");
        let stale_ios = paths.platform_dir("ios").join("obj");
        std::fs::create_dir_all(&stale_macos).unwrap();
        std::fs::create_dir_all(&stale_ios).unwrap();

        let runner = pipeline_runner(&sdk);
        run_pipeline(&config, &runner, false, false).unwrap();

        assert!(!stale_macos.exists());
        assert!(stale_ios.exists());
    }

    #[test]
    fn test_platform_flags_map_to_request() {
        let cmd = BuildCommand {
            ios: true,
            tvos: false,
            macos: true,
            boost_version: "1.81.0".to_string(),
            libs: "thread system".to_string(),
            ios_archs: Some("arm64, armv7".to_string()),
            ios_sim_archs: None,
            tvos_archs: None,
            tvos_sim_archs: None,
            macos_archs: None,
            macos_silicon_archs: None,
            min_ios_version: Some("11.0".to_string()),
            min_tvos_version: None,
            min_macos_version: None,
            ios_sdk_version: None,
            tvos_sdk_version: None,
            macos_sdk_version: None,
            threads: Some(4),
            debug: true,
            no_universal: false,
            no_framework: false,
            no_clean: true,
            exclusions: None,
            output_dir: Some(PathBuf::from("/tmp/out")),
            cache_dir: None,
            archive: false,
        };

        let req = cmd.to_request();
        assert_eq!(req.platforms, vec![Platform::Ios, Platform::Macos]);
        assert_eq!(
            req.ios_archs,
            Some(vec!["arm64".to_string(), "armv7".to_string()])
        );
        assert_eq!(req.libraries, "thread system");
        assert_eq!(req.threads, Some(4));
        assert!(req.debug);
        assert!(req.no_clean);
        assert_eq!(req.output_root, Some(PathBuf::from("/tmp/out")));
    }
}
