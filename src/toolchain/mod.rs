//! Xcode toolchain detection and the Boost.Build toolchain descriptor
//!
//! Detection goes through the [`Runner`] abstraction so every probe is
//! testable. The descriptor (user-config.jam) is the one file rewritten
//! unconditionally on every build: one `using darwin` entry per
//! platform pass, addressed later by `toolset=darwin-<name>`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::error::{hints, ForgeError};
use crate::exec::{Invocation, Runner};
use crate::matrix::PlatformSpec;
use crate::utils::paths::ensure_dir;
use crate::version::Version;

/// Compile flags shared by every pass
const COMMON_CXX_FLAGS: &[&str] = &[
    "-std=c++14",
    "-stdlib=libc++",
    "-fvisibility=hidden",
    "-fvisibility-inlines-hidden",
];

/// A detected Xcode installation
#[derive(Debug, Clone)]
pub struct XcodeToolchain {
    developer_dir: PathBuf,
    version: Version,
    version_string: String,
    build_version: String,
}

impl XcodeToolchain {
    /// Detect the active Xcode via xcode-select and xcodebuild
    pub fn detect(runner: &dyn Runner) -> Result<Self> {
        if !runner.tool_exists("xcode-select") {
            return Err(ForgeError::missing_tool(
                "xcode-select",
                "locating the Xcode developer directory",
                hints::xcode(),
            )
            .into());
        }

        let result = runner.run(&Invocation::new("xcode-select").arg("-p"), false)?;
        if !result.success {
            return Err(ForgeError::missing_tool(
                "xcode-select",
                "locating the Xcode developer directory",
                hints::command_line_tools(),
            )
            .into());
        }
        let developer_dir = PathBuf::from(result.stdout.trim());
        if !developer_dir.exists() {
            bail!(
                "Xcode developer directory not found: {}",
                developer_dir.display()
            );
        }

        let result = runner.run(&Invocation::new("xcodebuild").arg("-version"), false)?;
        if !result.success {
            bail!("xcodebuild -version failed. Check the Xcode license agreement.");
        }
        let (version_string, build_version) = parse_xcodebuild_version(&result.stdout)?;
        let version = Version::parse(&version_string)
            .with_context(|| format!("unparseable Xcode version '{version_string}'"))?;

        Ok(Self {
            developer_dir,
            version,
            version_string,
            build_version,
        })
    }

    pub fn developer_dir(&self) -> &Path {
        &self.developer_dir
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn version_string(&self) -> &str {
        &self.version_string
    }

    pub fn build_version(&self) -> &str {
        &self.build_version
    }

    /// SDK root for an `xcrun --sdk` name ("iphoneos", "iphoneos16.2")
    pub fn sdk_path(&self, runner: &dyn Runner, sdk: &str) -> Result<PathBuf> {
        let result = runner.run(
            &Invocation::new("xcrun").args(["--sdk", sdk, "--show-sdk-path"]),
            false,
        )?;
        if !result.success {
            bail!("Failed to find SDK '{}': {}", sdk, result.stderr.trim());
        }

        let path = PathBuf::from(result.stdout.trim());
        if !path.exists() {
            bail!("SDK path does not exist: {}", path.display());
        }
        Ok(path)
    }

    /// SDK version string for an `xcrun --sdk` name
    pub fn sdk_version(&self, runner: &dyn Runner, sdk: &str) -> Result<String> {
        let result = runner.run(
            &Invocation::new("xcrun").args(["--sdk", sdk, "--show-sdk-version"]),
            false,
        )?;
        if !result.success {
            bail!(
                "Failed to get SDK version for '{}': {}",
                sdk,
                result.stderr.trim()
            );
        }
        Ok(result.stdout.trim().to_string())
    }

    /// Full path to a tool inside an SDK's toolchain
    pub fn find_tool(&self, runner: &dyn Runner, sdk: &str, tool: &str) -> Result<PathBuf> {
        let result = runner.run(
            &Invocation::new("xcrun").args(["--sdk", sdk, "--find", tool]),
            false,
        )?;
        if !result.success {
            bail!(
                "xcrun could not find '{}' for SDK '{}': {}",
                tool,
                sdk,
                result.stderr.trim()
            );
        }
        Ok(PathBuf::from(result.stdout.trim()))
    }

    /// Extract one architecture from a fat archive
    pub fn thin_archive(
        &self,
        runner: &dyn Runner,
        archive: &Path,
        arch: &str,
        output: &Path,
    ) -> Result<()> {
        let result = runner.run(
            &Invocation::new("lipo")
                .arg("-thin")
                .arg(arch)
                .arg(archive.display().to_string())
                .arg("-output")
                .arg(output.display().to_string()),
            false,
        )?;
        if !result.success {
            bail!(
                "lipo -thin {} failed for {}: {}",
                arch,
                archive.display(),
                result.stderr.trim()
            );
        }
        Ok(())
    }

    /// Fuse single-architecture archives into one fat archive
    pub fn create_universal_binary(
        &self,
        runner: &dyn Runner,
        inputs: &[PathBuf],
        output: &Path,
    ) -> Result<()> {
        if inputs.is_empty() {
            bail!("No input libraries for {}", output.display());
        }
        if let Some(parent) = output.parent() {
            ensure_dir(parent)?;
        }

        let mut invocation = Invocation::new("lipo").arg("-create");
        for lib in inputs {
            invocation = invocation.arg(lib.display().to_string());
        }
        invocation = invocation.arg("-output").arg(output.display().to_string());

        let result = runner.run(&invocation, false)?;
        if !result.success {
            bail!(
                "lipo -create failed for {}: {}",
                output.display(),
                result.stderr.trim()
            );
        }
        Ok(())
    }

    /// Bundle per-platform slices into an XCFramework
    pub fn create_xcframework(
        &self,
        runner: &dyn Runner,
        libraries: &[PathBuf],
        output: &Path,
    ) -> Result<()> {
        if libraries.is_empty() {
            bail!("No library slices for {}", output.display());
        }

        let mut invocation = Invocation::new("xcodebuild").arg("-create-xcframework");
        for lib in libraries {
            invocation = invocation.arg("-library").arg(lib.display().to_string());
        }
        invocation = invocation.arg("-output").arg(output.display().to_string());

        let result = runner.run(&invocation, false)?;
        if !result.success {
            bail!(
                "xcodebuild -create-xcframework failed: {}",
                result.stderr.trim()
            );
        }
        Ok(())
    }
}

/// Parse `xcodebuild -version` output ("Xcode 14.2\nBuild version 14C18")
fn parse_xcodebuild_version(stdout: &str) -> Result<(String, String)> {
    let version_re = regex::Regex::new(r"Xcode\s+(\d+(?:\.\d+){1,2})")
        .context("invalid Xcode version pattern")?;
    let version = version_re
        .captures(stdout)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| {
            anyhow::anyhow!("could not parse Xcode version from: {}", stdout.trim())
        })?;

    let build_version = stdout
        .lines()
        .find_map(|l| l.strip_prefix("Build version "))
        .unwrap_or("unknown")
        .to_string();

    Ok((version, build_version))
}

/// Write the toolchain descriptor: one `using darwin` entry per pass.
///
/// The file is rewritten from scratch every run, so stale entries from
/// an earlier target matrix cannot survive.
pub fn write_user_config(
    path: &Path,
    specs: &[PlatformSpec],
    xcode: &XcodeToolchain,
    runner: &dyn Runner,
) -> Result<()> {
    let mut jam = String::from("# Generated by boostforge; edits are overwritten on every build.\n");

    for spec in specs {
        let compiler = xcode.find_tool(runner, &spec.sdk, "clang++")?;
        let sdk_path = xcode.sdk_path(runner, &spec.sdk)?;
        // SDKs live at <platform>/Developer/SDKs/<name>.sdk; the darwin
        // module wants the Developer directory as its root
        let platform_root = sdk_path
            .parent()
            .and_then(|p| p.parent())
            .unwrap_or(&sdk_path)
            .to_path_buf();

        let mut flags: Vec<String> = Vec::new();
        for arch in &spec.archs {
            flags.push("-arch".to_string());
            flags.push(arch.clone());
        }
        flags.extend(COMMON_CXX_FLAGS.iter().map(|s| s.to_string()));
        flags.extend(spec.extra_cflags.iter().cloned());
        flags.push(spec.pass.min_version_flag(&spec.min_version));
        flags.push("-isysroot".to_string());
        flags.push(sdk_path.display().to_string());

        jam.push_str(&format!(
            "using darwin : {toolset}\n\
             : {compiler} {flags}\n\
             : <striper> <root>{root}\n\
             : <architecture>{arch_class} <target-os>{target_os}\n\
             ;\n",
            toolset = spec.toolset,
            compiler = compiler.display(),
            flags = flags.join(" "),
            root = platform_root.display(),
            arch_class = spec.pass.arch_class(),
            target_os = spec.pass.target_os(),
        ));
    }

    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    std::fs::write(path, jam)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
