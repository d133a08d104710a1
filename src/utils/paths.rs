//! Build-tree layout
//!
//! Everything the pipeline writes lives under one output root, keyed by
//! Boost version and build variant so release and debug trees of
//! different releases never collide:
//!
//! ```text
//! <root>/src/boost_1_81_0/                  unpacked source (shared)
//! <root>/1.81.0/release/user-config.jam     toolchain descriptor
//! <root>/1.81.0/release/<platform>/
//!     <pass>-build/                  b2 build dir, stage/lib under it
//!     prefix/                        b2 install prefix (headers + libs)
//!     obj/<pass>/<arch>/<lib>/       exploded, renamed objects
//!     build/<pass>/<arch>/libboost.a combined single-arch archive
//!     build/<pass>/libboost.a        fat slice handed to the packager
//!     universal/                     lipo-fused per-library archives
//! <root>/1.81.0/release/dist/               xcframework + manifest
//!
//! obj/ and build/ are keyed by pass, not just architecture: an iOS
//! device arm64 build and a simulator arm64 build are distinct
//! artifacts that would otherwise land on the same path.
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::version::Version;

/// Resolved locations for one (version, variant) build tree
#[derive(Debug, Clone)]
pub struct ForgePaths {
    root: PathBuf,
    version: Version,
    variant: &'static str,
}

impl ForgePaths {
    pub fn new(root: impl Into<PathBuf>, version: &Version, variant: &'static str) -> Self {
        Self {
            root: root.into(),
            version: version.clone(),
            variant,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Shared unpacked source tree, e.g. `<root>/src/boost_1_81_0`
    pub fn source_dir(&self) -> PathBuf {
        self.root
            .join("src")
            .join(format!("boost_{}", self.version.underscored()))
    }

    /// Parent of all unpacked source trees
    pub fn sources_root(&self) -> PathBuf {
        self.root.join("src")
    }

    /// Per-version derived tree (all variants)
    pub fn version_root(&self) -> PathBuf {
        self.root.join(self.version.to_string())
    }

    /// Per-variant derived tree
    pub fn variant_root(&self) -> PathBuf {
        self.version_root().join(self.variant)
    }

    /// The single regenerated Boost.Build toolchain descriptor
    pub fn user_config_jam(&self) -> PathBuf {
        self.variant_root().join("user-config.jam")
    }

    pub fn platform_dir(&self, platform: &str) -> PathBuf {
        self.variant_root().join(platform)
    }

    /// b2 --build-dir for one platform pass
    pub fn pass_build_dir(&self, platform: &str, pass: &str) -> PathBuf {
        self.platform_dir(platform).join(format!("{pass}-build"))
    }

    /// b2 --stagedir for one platform pass (b2 appends `lib/`)
    pub fn pass_stage_dir(&self, platform: &str, pass: &str) -> PathBuf {
        self.pass_build_dir(platform, pass).join("stage")
    }

    /// Where staged `libboost_*.a` archives land
    pub fn stage_lib_dir(&self, platform: &str, pass: &str) -> PathBuf {
        self.pass_stage_dir(platform, pass).join("lib")
    }

    /// b2 --prefix for device-class passes (headers end up here)
    pub fn install_prefix(&self, platform: &str) -> PathBuf {
        self.platform_dir(platform).join("prefix")
    }

    pub fn installed_headers(&self, platform: &str) -> PathBuf {
        self.install_prefix(platform).join("include").join("boost")
    }

    /// Exploded object files for one (pass, arch, library)
    pub fn obj_dir(&self, platform: &str, pass: &str, arch: &str, library: &str) -> PathBuf {
        self.platform_dir(platform)
            .join("obj")
            .join(pass)
            .join(arch)
            .join(library)
    }

    /// Thin per-library archives and the combined archive for one
    /// (pass, arch)
    pub fn arch_build_dir(&self, platform: &str, pass: &str, arch: &str) -> PathBuf {
        self.platform_dir(platform)
            .join("build")
            .join(pass)
            .join(arch)
    }

    /// The combined single-architecture `libboost.a`
    pub fn combined_archive(&self, platform: &str, pass: &str, arch: &str) -> PathBuf {
        self.arch_build_dir(platform, pass, arch).join("libboost.a")
    }

    /// The one fat `libboost.a` a pass contributes to the package
    pub fn slice_archive(&self, platform: &str, pass: &str) -> PathBuf {
        self.platform_dir(platform)
            .join("build")
            .join(pass)
            .join("libboost.a")
    }

    /// One fat archive for a whole platform; macOS passes collapse
    /// into this before packaging
    pub fn fused_platform_archive(&self, platform: &str) -> PathBuf {
        self.platform_dir(platform).join("build").join("libboost.a")
    }

    /// lipo-fused per-library outputs for one platform
    pub fn universal_dir(&self, platform: &str) -> PathBuf {
        self.platform_dir(platform).join("universal")
    }

    /// Final deliverables directory
    pub fn dist_dir(&self) -> PathBuf {
        self.variant_root().join("dist")
    }

    pub fn xcframework(&self) -> PathBuf {
        self.dist_dir().join("boost.xcframework")
    }

    pub fn version_marker(&self) -> PathBuf {
        self.dist_dir().join("VERSION")
    }

    pub fn manifest_file(&self) -> PathBuf {
        self.dist_dir().join("manifest.json")
    }
}

/// Default location for downloaded release tarballs
pub fn default_cache_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "boostforge", "boostforge")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".boostforge-cache"))
}

/// Ensure a directory exists
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    }
    Ok(())
}
