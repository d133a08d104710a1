//! Per-platform build driver
//!
//! Drives b2 over every enabled platform pass, strictly in order: the
//! passes share one source tree and one b2 engine, so nothing here is
//! parallel besides b2's own `-j`. A failing step aborts the whole
//! pipeline; later stages never see a half-built pass.

pub mod b2;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;

use crate::exec::Runner;
use crate::matrix::{BuildConfig, PlatformSpec};
use crate::utils::paths::{ensure_dir, ForgePaths};
use crate::utils::terminal::{print_info, print_stage};

/// Shared state for one build run
#[derive(Debug)]
pub struct BuildContext<'a> {
    pub config: &'a BuildConfig,
    pub paths: ForgePaths,
    pub source_dir: PathBuf,
    pub verbose: bool,
}

impl<'a> BuildContext<'a> {
    pub fn new(config: &'a BuildConfig, source_dir: PathBuf, verbose: bool) -> Self {
        Self {
            paths: config.paths(),
            config,
            source_dir,
            verbose,
        }
    }
}

/// Outcome of one platform pass
#[derive(Debug)]
pub struct PassResult {
    pub pass: crate::matrix::Pass,
    pub architectures: Vec<String>,
    /// Libraries handed to b2 (exclusions already applied)
    pub libraries_built: usize,
    pub duration_secs: f64,
}

/// Compile every enabled pass, in spec order
pub fn run_all(ctx: &BuildContext, runner: &dyn Runner) -> Result<Vec<PassResult>> {
    b2::ensure_engine(runner, &ctx.source_dir, ctx.verbose)?;

    let mut results = Vec::new();
    for spec in &ctx.config.specs {
        results.push(run_pass(ctx, spec, runner)?);
    }
    Ok(results)
}

/// Stage (and for device-class passes install) one platform pass
pub fn run_pass(ctx: &BuildContext, spec: &PlatformSpec, runner: &dyn Runner) -> Result<PassResult> {
    let start = Instant::now();
    let platform = spec.platform().as_str();
    let pass = spec.pass.name();
    let libraries = ctx.config.libraries_for(spec);

    print_stage(&format!(
        "Building {} ({}) for {}",
        pass,
        spec.archs.join(", "),
        platform
    ));

    if libraries.is_empty() {
        // b2 with no --with selector would compile the whole of Boost
        print_info(&format!("no libraries to build for {pass}, skipping"));
        return Ok(PassResult {
            pass: spec.pass,
            architectures: spec.archs.clone(),
            libraries_built: 0,
            duration_secs: start.elapsed().as_secs_f64(),
        });
    }

    let build_dir = ctx.paths.pass_build_dir(platform, pass);
    ensure_dir(&build_dir)?;

    let mut invocation = b2::B2Invocation::new(ctx.source_dir.clone(), pass)
        .build_dir(build_dir)
        .stage_dir(ctx.paths.pass_stage_dir(platform, pass))
        .user_config(ctx.paths.user_config_jam())
        .toolset(spec.b2_toolset())
        .variant(ctx.config.variant)
        .jobs(ctx.config.threads)
        .libraries(libraries.iter().map(|lib| lib.name.clone()))
        .verbose(ctx.verbose);
    if spec.pass.installs() {
        invocation = invocation.prefix(ctx.paths.install_prefix(platform));
    }

    invocation.stage(runner)?;
    if spec.pass.installs() {
        invocation.install(runner)?;
    }

    Ok(PassResult {
        pass: spec.pass,
        architectures: spec.archs.clone(),
        libraries_built: libraries.len(),
        duration_secs: start.elapsed().as_secs_f64(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::mock::MockRunner;
    use crate::matrix::{resolve, MatrixRequest, Platform};

    fn test_config(platforms: Vec<Platform>, libraries: &str) -> BuildConfig {
        let req = MatrixRequest {
            platforms,
            libraries: libraries.to_string(),
            threads: Some(2),
            output_root: Some(PathBuf::from("/tmp/forge-test-out")),
            ..Default::default()
        };
        resolve(&req).unwrap()
    }

    fn context_with_engine<'a>(
        config: &'a BuildConfig,
        tmp: &tempfile::TempDir,
    ) -> BuildContext<'a> {
        let source = tmp.path().join("boost_src");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("b2"), "#!/bin/sh\n").unwrap();
        let mut ctx = BuildContext::new(config, source, false);
        ctx.paths = ForgePaths::new(tmp.path(), &config.version, config.variant.as_str());
        ctx
    }

    #[test]
    fn test_device_pass_stages_then_installs() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(vec![Platform::Ios], "thread system");
        let ctx = context_with_engine(&config, &tmp);
        let runner = MockRunner::new();

        run_all(&ctx, &runner).unwrap();

        let calls = runner.calls_of("b2");
        // iphone: stage + install, iphonesim: stage only
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].args.last().unwrap(), "stage");
        assert_eq!(calls[1].args.last().unwrap(), "install");
        assert!(calls[1]
            .args
            .iter()
            .any(|a| a.starts_with("--prefix=") && a.ends_with("ios/prefix")));
        assert_eq!(calls[2].args.last().unwrap(), "stage");
        assert!(calls[2]
            .args
            .iter()
            .any(|a| a.contains("toolset=darwin-") && a.contains("~iphonesim")));
    }

    #[test]
    fn test_failure_aborts_remaining_passes() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(vec![Platform::Ios], "thread");
        let ctx = context_with_engine(&config, &tmp);
        let runner = MockRunner::new().fail_when("b2", "install", "link error\n");

        assert!(run_all(&ctx, &runner).is_err());

        // iphone stage + failing install; the simulator pass never ran
        assert_eq!(runner.calls_of("b2").len(), 2);
    }

    #[test]
    fn test_fully_excluded_pass_skips_b2() {
        let tmp = tempfile::tempdir().unwrap();
        // "test" is excluded on tvOS, leaving nothing to compile there
        let config = test_config(vec![Platform::Tvos], "test");
        let ctx = context_with_engine(&config, &tmp);
        let runner = MockRunner::new();

        let results = run_all(&ctx, &runner).unwrap();

        assert!(runner.calls_of("b2").is_empty());
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].libraries_built, 0);
    }
}
