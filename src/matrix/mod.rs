//! Build target resolution
//!
//! Turns the raw request (CLI flags) into one immutable [`BuildConfig`]:
//! the Boost release, the ordered library list, and one [`PlatformSpec`]
//! per platform pass with its architectures, SDK, and toolset identity
//! all pinned down. Everything after this stage reads the config and
//! never re-derives targets.

pub mod catalog;

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::Result;

use crate::error::ForgeError;
use crate::utils::paths::{default_cache_dir, ForgePaths};
use crate::version::Version;

pub use catalog::Exclusions;

/// Boost release built when --boost-version is not given
pub const DEFAULT_BOOST_VERSION: &str = "1.81.0";

/// Architectures dropped when the minimum OS no longer supports 32-bit
const ARCHS_32_BIT: &[&str] = &["armv7", "armv7s", "armv7k", "i386"];

/// An Apple platform family
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Platform {
    Ios,
    Tvos,
    Macos,
}

impl Platform {
    pub fn all() -> [Platform; 3] {
        [Platform::Ios, Platform::Tvos, Platform::Macos]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Tvos => "tvos",
            Platform::Macos => "macos",
        }
    }

    /// Build passes for this platform, device-class first
    pub fn passes(&self) -> &'static [Pass] {
        match self {
            Platform::Ios => &[Pass::Iphone, Pass::IphoneSim],
            Platform::Tvos => &[Pass::AppleTv, Pass::AppleTvSim],
            Platform::Macos => &[Pass::MacOs, Pass::MacOsSilicon],
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One compiler pass: a platform plus its device/simulator/desktop side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pass {
    Iphone,
    IphoneSim,
    AppleTv,
    AppleTvSim,
    MacOs,
    MacOsSilicon,
}

impl Pass {
    pub fn name(&self) -> &'static str {
        match self {
            Pass::Iphone => "iphone",
            Pass::IphoneSim => "iphonesim",
            Pass::AppleTv => "appletv",
            Pass::AppleTvSim => "appletvsim",
            Pass::MacOs => "macos",
            Pass::MacOsSilicon => "macossilicon",
        }
    }

    pub fn platform(&self) -> Platform {
        match self {
            Pass::Iphone | Pass::IphoneSim => Platform::Ios,
            Pass::AppleTv | Pass::AppleTvSim => Platform::Tvos,
            Pass::MacOs | Pass::MacOsSilicon => Platform::Macos,
        }
    }

    pub fn is_simulator(&self) -> bool {
        matches!(self, Pass::IphoneSim | Pass::AppleTvSim)
    }

    /// Device-class passes run b2 install (headers + libs into the
    /// prefix); simulator passes only stage
    pub fn installs(&self) -> bool {
        !self.is_simulator()
    }

    /// SDK name as xcrun knows it
    pub fn sdk_name(&self) -> &'static str {
        match self {
            Pass::Iphone => "iphoneos",
            Pass::IphoneSim => "iphonesimulator",
            Pass::AppleTv => "appletvos",
            Pass::AppleTvSim => "appletvsimulator",
            Pass::MacOs | Pass::MacOsSilicon => "macosx",
        }
    }

    /// `<target-os>` tag in the darwin toolset entry
    pub fn target_os(&self) -> &'static str {
        match self {
            Pass::Iphone | Pass::IphoneSim => "iphone",
            Pass::AppleTv | Pass::AppleTvSim => "appletv",
            Pass::MacOs | Pass::MacOsSilicon => "darwin",
        }
    }

    /// `<architecture>` class in the darwin toolset entry
    pub fn arch_class(&self) -> &'static str {
        match self {
            Pass::Iphone | Pass::AppleTv | Pass::MacOsSilicon => "arm",
            Pass::IphoneSim | Pass::AppleTvSim | Pass::MacOs => "x86",
        }
    }

    fn default_archs(&self) -> &'static [&'static str] {
        match self {
            Pass::Iphone => &["armv7", "arm64"],
            Pass::IphoneSim => &["i386", "x86_64", "arm64"],
            Pass::AppleTv => &["arm64"],
            Pass::AppleTvSim => &["x86_64", "arm64"],
            Pass::MacOs => &["x86_64"],
            Pass::MacOsSilicon => &["arm64"],
        }
    }

    /// Compiler flag pinning the minimum OS for this pass
    pub fn min_version_flag(&self, min: &str) -> String {
        match self {
            Pass::Iphone => format!("-miphoneos-version-min={min}"),
            Pass::IphoneSim => format!("-mios-simulator-version-min={min}"),
            Pass::AppleTv => format!("-mtvos-version-min={min}"),
            Pass::AppleTvSim => format!("-mtvos-simulator-version-min={min}"),
            Pass::MacOs | Pass::MacOsSilicon => format!("-mmacosx-version-min={min}"),
        }
    }
}

impl std::fmt::Display for Pass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One library to build, with the name b2 stages it under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryTarget {
    pub name: String,
    pub output_name: String,
}

impl LibraryTarget {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            output_name: catalog::output_name(name).to_string(),
        }
    }

    /// Staged archive file name, e.g. libboost_unit_test_framework.a
    pub fn archive_file(&self) -> String {
        format!("libboost_{}.a", self.output_name)
    }
}

/// Release or debug compilation, b2's variant axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Release,
    Debug,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Release => "release",
            Variant::Debug => "debug",
        }
    }
}

/// Fully resolved description of one platform pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformSpec {
    pub pass: Pass,
    pub archs: Vec<String>,
    /// Minimum OS string as given ("13.4")
    pub min_version: String,
    /// Argument for `xcrun --sdk`, version-pinned when overridden
    /// ("iphoneos" or "iphoneos16.2")
    pub sdk: String,
    /// Logical toolset name, unique per pass ("1_81_0~iphone")
    pub toolset: String,
    pub excluded: BTreeSet<String>,
    /// Extra compile flags this pass needs beyond arch/min/sysroot
    pub extra_cflags: Vec<String>,
}

impl PlatformSpec {
    pub fn platform(&self) -> Platform {
        self.pass.platform()
    }

    /// "darwin-1_81_0~iphone", the toolset= argument for b2
    pub fn b2_toolset(&self) -> String {
        format!("darwin-{}", self.toolset)
    }

    pub fn excludes(&self, library: &str) -> bool {
        self.excluded.contains(library)
    }
}

/// Raw, unvalidated build request as collected from the CLI
#[derive(Debug, Clone)]
pub struct MatrixRequest {
    pub boost_version: String,
    /// "all", "none", or a space-separated list
    pub libraries: String,
    /// Empty selects every platform
    pub platforms: Vec<Platform>,
    pub ios_archs: Option<Vec<String>>,
    pub ios_sim_archs: Option<Vec<String>>,
    pub tvos_archs: Option<Vec<String>>,
    pub tvos_sim_archs: Option<Vec<String>>,
    pub macos_archs: Option<Vec<String>>,
    pub macos_silicon_archs: Option<Vec<String>>,
    pub min_ios_version: Option<String>,
    pub min_tvos_version: Option<String>,
    pub min_macos_version: Option<String>,
    pub ios_sdk_version: Option<String>,
    pub tvos_sdk_version: Option<String>,
    pub macos_sdk_version: Option<String>,
    pub threads: Option<usize>,
    pub debug: bool,
    pub no_universal: bool,
    pub no_framework: bool,
    pub no_clean: bool,
    pub output_root: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub exclusions_file: Option<PathBuf>,
}

impl Default for MatrixRequest {
    fn default() -> Self {
        Self {
            boost_version: DEFAULT_BOOST_VERSION.to_string(),
            libraries: "all".to_string(),
            platforms: Vec::new(),
            ios_archs: None,
            ios_sim_archs: None,
            tvos_archs: None,
            tvos_sim_archs: None,
            macos_archs: None,
            macos_silicon_archs: None,
            min_ios_version: None,
            min_tvos_version: None,
            min_macos_version: None,
            ios_sdk_version: None,
            tvos_sdk_version: None,
            macos_sdk_version: None,
            threads: None,
            debug: false,
            no_universal: false,
            no_framework: false,
            no_clean: false,
            output_root: None,
            cache_dir: None,
            exclusions_file: None,
        }
    }
}

/// The immutable resolved configuration every later stage reads
#[derive(Debug, Clone, PartialEq)]
pub struct BuildConfig {
    pub version: Version,
    /// Selected libraries in catalog order; merge order follows this
    pub libraries: Vec<LibraryTarget>,
    /// Enabled passes in fixed platform order
    pub specs: Vec<PlatformSpec>,
    /// Libraries that legitimately stage no archive
    pub no_archive: BTreeSet<String>,
    pub threads: usize,
    pub variant: Variant,
    pub output_root: PathBuf,
    pub cache_dir: PathBuf,
    pub universal: bool,
    pub framework: bool,
    pub clean_first: bool,
}

impl BuildConfig {
    pub fn paths(&self) -> ForgePaths {
        ForgePaths::new(&self.output_root, &self.version, self.variant.as_str())
    }

    /// Libraries that actually build in one pass (exclusions applied)
    pub fn libraries_for(&self, spec: &PlatformSpec) -> Vec<&LibraryTarget> {
        self.libraries
            .iter()
            .filter(|lib| !spec.excludes(&lib.name))
            .collect()
    }

    /// Enabled platforms in spec order, deduplicated
    pub fn enabled_platforms(&self) -> Vec<Platform> {
        let mut out = Vec::new();
        for spec in &self.specs {
            if !out.contains(&spec.platform()) {
                out.push(spec.platform());
            }
        }
        out
    }

    pub fn specs_for(&self, platform: Platform) -> Vec<&PlatformSpec> {
        self.specs
            .iter()
            .filter(|s| s.platform() == platform)
            .collect()
    }

    /// True when a missing staged archive is expected, either excluded
    /// on this pass or known to stage nothing anywhere
    pub fn archive_is_optional(&self, spec: &PlatformSpec, library: &str) -> bool {
        spec.excludes(library) || self.no_archive.contains(library)
    }
}

/// Resolve a raw request into the immutable build configuration.
///
/// Fails fast on malformed versions, unknown libraries, and bad
/// exclusion tables; nothing is downloaded or written here.
pub fn resolve(req: &MatrixRequest) -> Result<BuildConfig> {
    let version = Version::parse(&req.boost_version).map_err(|e| {
        ForgeError::version_error(
            format!("invalid Boost version '{}': {}", req.boost_version, e),
            "pass --boost-version a release like 1.81.0",
        )
    })?;

    let exclusions = match &req.exclusions_file {
        Some(path) => Exclusions::from_toml_file(path, &version)?,
        None => Exclusions::defaults(&version),
    };

    let libraries = resolve_libraries(&req.libraries, &version)?;

    let platforms: Vec<Platform> = if req.platforms.is_empty() {
        Platform::all().to_vec()
    } else {
        let mut seen = Vec::new();
        for p in &req.platforms {
            if !seen.contains(p) {
                seen.push(*p);
            }
        }
        seen
    };

    let mut specs = Vec::new();
    for platform in &platforms {
        let min = min_version_for(req, *platform)?;
        for pass in platform.passes() {
            specs.push(resolve_pass(req, *pass, &version, &min, &exclusions)?);
        }
    }

    let threads = match req.threads {
        Some(0) => {
            return Err(ForgeError::config_error_with_hint(
                "--threads must be at least 1",
                "omit --threads to use all host cores",
            )
            .into())
        }
        Some(n) => n,
        None => std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4),
    };

    Ok(BuildConfig {
        no_archive: exclusions.no_archive_set().clone(),
        version,
        libraries,
        specs,
        threads,
        variant: if req.debug {
            Variant::Debug
        } else {
            Variant::Release
        },
        output_root: req
            .output_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("build")),
        cache_dir: req.cache_dir.clone().unwrap_or_else(default_cache_dir),
        universal: !req.no_universal,
        framework: !req.no_framework,
        clean_first: !req.no_clean,
    })
}

fn resolve_libraries(input: &str, version: &Version) -> Result<Vec<LibraryTarget>> {
    let trimmed = input.trim();

    if trimmed.eq_ignore_ascii_case("none") {
        return Ok(Vec::new());
    }

    let catalog = catalog::catalog_for(version);
    if trimmed.eq_ignore_ascii_case("all") {
        return Ok(catalog.iter().map(|name| LibraryTarget::new(name)).collect());
    }

    if trimmed.is_empty() {
        return Err(ForgeError::config_error_with_hint(
            "library list is empty",
            "pass --libs 'all', 'none', or a space-separated list like 'thread system'",
        )
        .into());
    }

    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for name in trimmed.split_whitespace() {
        if !catalog.contains(&name) {
            return Err(ForgeError::config_error_with_hint(
                format!("unknown Boost library '{name}'"),
                format!(
                    "libraries known to Boost {}: {}",
                    version,
                    catalog.join(" ")
                ),
            )
            .into());
        }
        if seen.insert(name) {
            out.push(LibraryTarget::new(name));
        }
    }
    Ok(out)
}

fn min_version_for(req: &MatrixRequest, platform: Platform) -> Result<String> {
    let (given, fallback) = match platform {
        Platform::Ios => (&req.min_ios_version, "13.4"),
        Platform::Tvos => (&req.min_tvos_version, "13.0"),
        Platform::Macos => (&req.min_macos_version, "10.15"),
    };
    let min = given.clone().unwrap_or_else(|| fallback.to_string());

    // Validate now so narrowing and flag text can trust it
    Version::parse(&min).map_err(|e| {
        ForgeError::version_error(
            format!("invalid minimum {platform} version '{min}': {e}"),
            "pass a dotted version like 13.4",
        )
    })?;
    Ok(min)
}

fn resolve_pass(
    req: &MatrixRequest,
    pass: Pass,
    version: &Version,
    min: &str,
    exclusions: &Exclusions,
) -> Result<PlatformSpec> {
    let override_archs = match pass {
        Pass::Iphone => &req.ios_archs,
        Pass::IphoneSim => &req.ios_sim_archs,
        Pass::AppleTv => &req.tvos_archs,
        Pass::AppleTvSim => &req.tvos_sim_archs,
        Pass::MacOs => &req.macos_archs,
        Pass::MacOsSilicon => &req.macos_silicon_archs,
    };

    let archs = match override_archs {
        Some(list) => {
            if list.is_empty() {
                return Err(ForgeError::config_error_with_hint(
                    format!("architecture override for {} is empty", pass.name()),
                    "give at least one architecture, e.g. arm64",
                )
                .into());
            }
            list.clone()
        }
        // An explicit override is taken as-is; defaults narrow to
        // 64-bit once the minimum OS dropped 32-bit support
        None => {
            let min_parsed = Version::parse(min)?;
            pass.default_archs()
                .iter()
                .filter(|arch| min_parsed.major < 11 || !ARCHS_32_BIT.contains(arch))
                .map(|s| s.to_string())
                .collect()
        }
    };

    let sdk_version = match pass.platform() {
        Platform::Ios => &req.ios_sdk_version,
        Platform::Tvos => &req.tvos_sdk_version,
        Platform::Macos => &req.macos_sdk_version,
    };
    let sdk = match sdk_version {
        Some(v) => format!("{}{}", pass.sdk_name(), v),
        None => pass.sdk_name().to_string(),
    };

    let mut extra_cflags = Vec::new();
    if archs.iter().any(|a| a.starts_with("armv7")) {
        // 32-bit ARM has no lock-free 64-bit atomics; force the
        // pthread fallbacks for shared_ptr and atomic counters
        extra_cflags.push("-DBOOST_AC_USE_PTHREADS".to_string());
        extra_cflags.push("-DBOOST_SP_USE_PTHREADS".to_string());
    }

    Ok(PlatformSpec {
        toolset: format!("{}~{}", version.underscored(), pass.name()),
        excluded: exclusions.for_platform(pass.platform()).clone(),
        min_version: min.to_string(),
        archs,
        sdk,
        pass,
        extra_cflags,
    })
}
