//! Architecture decomposition and recomposition
//!
//! Turns the staged per-pass archives into exactly one combined static
//! library per (pass, architecture), then fuses those into the single
//! fat `libboost.a` each pass hands to the packager. Per library:
//! thin (or copy) the staged archive, explode it with `ar x`, prefix
//! every object file with the library name, and append the objects to
//! the combined archive in resolved library-list order. The prefix is
//! what allows merging: different libraries routinely emit objects
//! with identical basenames.
//!
//! Unless `--no-universal` was given, the thinned per-library archives
//! are additionally fused into fat per-library archives under
//! `universal/`, one slice per architecture with the device pass
//! preferred when both device and simulator built it.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::error::{hints, ForgeError};
use crate::exec::{Invocation, Runner};
use crate::matrix::{BuildConfig, LibraryTarget, Pass, Platform, PlatformSpec};
use crate::toolchain::XcodeToolchain;
use crate::utils::paths::{ensure_dir, ForgePaths};
use crate::utils::terminal::{print_info, print_stage};

const RECOMBINE_HINT: &str =
    "Partial output from an interrupted run cannot be merged.\n\
     Run 'boostforge clean' and rebuild.";

/// Outcome of probing for one staged archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchivePresence {
    Present(PathBuf),
    /// Excluded on this pass, or known to stage no binary anywhere
    AbsentUnsupported,
    /// Missing with no recorded reason
    AbsentUnexpected,
}

/// Classify the staged archive for one (pass, library) coordinate
pub fn probe_archive(
    config: &BuildConfig,
    spec: &PlatformSpec,
    library: &LibraryTarget,
    stage_lib: &Path,
) -> ArchivePresence {
    let path = stage_lib.join(library.archive_file());
    if path.is_file() {
        ArchivePresence::Present(path)
    } else if config.archive_is_optional(spec, &library.name) {
        ArchivePresence::AbsentUnsupported
    } else {
        ArchivePresence::AbsentUnexpected
    }
}

/// The fat archive one pass contributes to the package
#[derive(Debug, Clone)]
pub struct SliceArtifact {
    pub pass: Pass,
    pub architectures: Vec<String>,
    pub archive: PathBuf,
}

/// Everything the merge produced for one platform
#[derive(Debug)]
pub struct PlatformMerge {
    pub platform: Platform,
    pub slices: Vec<SliceArtifact>,
    /// Per-library fat archives under universal/
    pub universal_libraries: Vec<PathBuf>,
    /// Libraries that legitimately staged nothing here
    pub skipped: Vec<String>,
}

pub struct MergeContext<'a> {
    pub config: &'a BuildConfig,
    pub paths: &'a ForgePaths,
    pub toolchain: &'a XcodeToolchain,
}

/// Decompose and recombine every enabled platform, in platform order
pub fn merge_all(ctx: &MergeContext, runner: &dyn Runner) -> Result<Vec<PlatformMerge>> {
    let mut merges = Vec::new();
    for platform in ctx.config.enabled_platforms() {
        merges.push(merge_platform(ctx, platform, runner)?);
    }
    Ok(merges)
}

pub fn merge_platform(
    ctx: &MergeContext,
    platform: Platform,
    runner: &dyn Runner,
) -> Result<PlatformMerge> {
    print_stage(&format!("Merging {platform} archives"));

    let platform_name = platform.as_str();
    let mut slices = Vec::new();
    let mut skipped: Vec<String> = Vec::new();
    // Inputs for the optional per-library universal fusion, at most
    // one thin per architecture: device and simulator passes both
    // produce arm64 on current matrices, and lipo -create rejects
    // duplicate architectures. Device passes run first, so the
    // device slice is the one pooled.
    let mut thin_by_library: BTreeMap<String, Vec<(String, PathBuf)>> = BTreeMap::new();

    for spec in ctx.config.specs_for(platform) {
        let pass = spec.pass.name();
        let stage_lib = ctx.paths.stage_lib_dir(platform_name, pass);

        let mut present: Vec<(&LibraryTarget, PathBuf)> = Vec::new();
        for library in &ctx.config.libraries {
            match probe_archive(ctx.config, spec, library, &stage_lib) {
                ArchivePresence::Present(path) => present.push((library, path)),
                ArchivePresence::AbsentUnsupported => {
                    if !skipped.contains(&library.name) {
                        skipped.push(library.name.clone());
                    }
                }
                ArchivePresence::AbsentUnexpected => {
                    return Err(ForgeError::merge_error(
                        &library.name,
                        format!(
                            "staged archive {} not found under {}",
                            library.archive_file(),
                            stage_lib.display()
                        ),
                        hints::missing_archive(&library.name, &format!("{platform_name} ({pass})")),
                    )
                    .into());
                }
            }
        }

        if present.is_empty() {
            continue;
        }

        let multi_arch = spec.archs.len() > 1;
        for arch in &spec.archs {
            let arch_dir = ctx.paths.arch_build_dir(platform_name, pass, arch);
            ensure_dir(&arch_dir)?;

            for (library, staged) in &present {
                let thin = arch_dir.join(library.archive_file());
                thin_slice(ctx, runner, &library.name, staged, multi_arch, arch, &thin)?;
                explode_archive(
                    runner,
                    &thin,
                    &ctx.paths.obj_dir(platform_name, pass, arch, &library.name),
                    &library.name,
                )?;
                let pooled = thin_by_library.entry(library.name.clone()).or_default();
                if !pooled.iter().any(|(pooled_arch, _)| pooled_arch == arch) {
                    pooled.push((arch.clone(), thin));
                }
            }

            combine_arch(ctx, runner, platform_name, pass, arch, &present)?;
        }

        slices.push(fuse_pass_slice(ctx, runner, platform_name, spec)?);
    }

    let mut universal_libraries = Vec::new();
    if ctx.config.universal && !thin_by_library.is_empty() {
        let universal = ctx.paths.universal_dir(platform_name);
        ensure_dir(&universal)?;
        for library in &ctx.config.libraries {
            let Some(pooled) = thin_by_library.get(&library.name) else {
                continue;
            };
            let inputs: Vec<PathBuf> =
                pooled.iter().map(|(_, thin)| thin.clone()).collect();
            let output = universal.join(library.archive_file());
            ctx.toolchain
                .create_universal_binary(runner, &inputs, &output)
                .map_err(|err| merge_failure(&library.name, err))?;
            universal_libraries.push(output);
        }
    }

    if !skipped.is_empty() {
        print_info(&format!(
            "no archive on {platform_name} (expected): {}",
            skipped.join(", ")
        ));
    }

    Ok(PlatformMerge {
        platform,
        slices,
        universal_libraries,
        skipped,
    })
}

/// Extract one architecture slice from a staged archive, or copy it
/// when the pass built a single architecture (lipo -thin rejects
/// already-thin input)
fn thin_slice(
    ctx: &MergeContext,
    runner: &dyn Runner,
    library: &str,
    staged: &Path,
    multi_arch: bool,
    arch: &str,
    output: &Path,
) -> Result<()> {
    if multi_arch {
        ctx.toolchain
            .thin_archive(runner, staged, arch, output)
            .map_err(|err| merge_failure(library, err))?;
    } else {
        fs::copy(staged, output).with_context(|| {
            format!(
                "Failed to copy {} to {}",
                staged.display(),
                output.display()
            )
        })?;
    }
    Ok(())
}

/// Explode a thin archive into its object files and prefix each one
/// with the library name
fn explode_archive(
    runner: &dyn Runner,
    thin: &Path,
    obj_dir: &Path,
    library: &str,
) -> Result<()> {
    ensure_dir(obj_dir)?;
    clear_objects(obj_dir)?;

    let result = runner.run(
        &Invocation::new("ar")
            .arg("x")
            .arg(thin.display().to_string())
            .cwd(obj_dir),
        false,
    )?;
    if !result.success {
        return Err(ForgeError::merge_error(
            library,
            format!("ar x failed for {}: {}", thin.display(), result.stderr.trim()),
            RECOMBINE_HINT,
        )
        .into());
    }

    for object in objects_in(obj_dir)? {
        let name = object
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let renamed = obj_dir.join(format!("{library}_{name}"));
        if renamed.exists() {
            return Err(ForgeError::merge_error(
                library,
                format!("object name collision after prefixing: {name}"),
                RECOMBINE_HINT,
            )
            .into());
        }
        fs::rename(&object, &renamed).with_context(|| {
            format!("Failed to rename {} to {}", object.display(), renamed.display())
        })?;
    }
    Ok(())
}

/// Append every present library's renamed objects into the combined
/// per-architecture archive, in resolved library-list order
fn combine_arch(
    ctx: &MergeContext,
    runner: &dyn Runner,
    platform: &str,
    pass: &str,
    arch: &str,
    present: &[(&LibraryTarget, PathBuf)],
) -> Result<()> {
    let combined = ctx.paths.combined_archive(platform, pass, arch);
    if combined.exists() {
        fs::remove_file(&combined).with_context(|| {
            format!("Failed to remove stale archive {}", combined.display())
        })?;
    }

    for (library, _) in present {
        let obj_dir = ctx.paths.obj_dir(platform, pass, arch, &library.name);
        let objects = objects_in(&obj_dir)?;
        if objects.is_empty() {
            continue;
        }

        // ar runs in the object directory with bare filenames so the
        // archive's member names stay short and predictable
        let mut invocation = Invocation::new("ar")
            .arg("crus")
            .arg(combined.display().to_string())
            .cwd(&obj_dir);
        for object in &objects {
            let name = object
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            invocation = invocation.arg(name);
        }

        let result = runner.run(&invocation, false)?;
        if !result.success {
            return Err(ForgeError::merge_error(
                &library.name,
                format!(
                    "ar crus failed for {}: {}",
                    combined.display(),
                    result.stderr.trim()
                ),
                RECOMBINE_HINT,
            )
            .into());
        }
    }
    Ok(())
}

/// Produce the one fat `libboost.a` a pass contributes to packaging;
/// single-architecture passes copy instead of invoking lipo
fn fuse_pass_slice(
    ctx: &MergeContext,
    runner: &dyn Runner,
    platform: &str,
    spec: &PlatformSpec,
) -> Result<SliceArtifact> {
    let pass = spec.pass.name();
    let slice = ctx.paths.slice_archive(platform, pass);
    let combined: Vec<PathBuf> = spec
        .archs
        .iter()
        .map(|arch| ctx.paths.combined_archive(platform, pass, arch))
        .collect();

    if combined.len() == 1 {
        fs::copy(&combined[0], &slice).with_context(|| {
            format!(
                "Failed to copy {} to {}",
                combined[0].display(),
                slice.display()
            )
        })?;
    } else {
        ctx.toolchain
            .create_universal_binary(runner, &combined, &slice)
            .map_err(|err| merge_failure(&format!("libboost.a ({pass})"), err))?;
    }

    Ok(SliceArtifact {
        pass: spec.pass,
        architectures: spec.archs.clone(),
        archive: slice,
    })
}

fn merge_failure(library: &str, err: anyhow::Error) -> anyhow::Error {
    ForgeError::merge_error(library, err.to_string(), RECOMBINE_HINT).into()
}

/// Object files in a directory, sorted for deterministic ordering
fn objects_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!("{}/*.o", dir.display());
    let mut objects: Vec<PathBuf> = glob::glob(&pattern)
        .with_context(|| format!("Invalid glob pattern: {pattern}"))?
        .filter_map(|entry| entry.ok())
        .collect();
    objects.sort();
    Ok(objects)
}

/// Remove leftover objects from a previous run
fn clear_objects(dir: &Path) -> Result<()> {
    for stale in objects_in(dir)? {
        fs::remove_file(&stale).with_context(|| {
            format!("Failed to remove stale object {}", stale.display())
        })?;
    }
    Ok(())
}
