//! Versioned library catalogs and platform exclusion tables
//!
//! Boost renamed/retired libraries across releases, so "all libraries"
//! depends on which release is being built. The tables here mirror the
//! upstream source layout: one catalog per era, selected by version,
//! plus the per-platform sets of libraries that cannot build there.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Result;
use serde::Deserialize;

use crate::error::{ForgeError, ResultExt};
use crate::matrix::Platform;
use crate::version::Version;

/// Libraries buildable in releases up to and including 1.68.x
const CATALOG_PRE_1_69: &[&str] = &[
    "atomic",
    "chrono",
    "container",
    "context",
    "coroutine",
    "coroutine2",
    "date_time",
    "exception",
    "fiber",
    "filesystem",
    "graph",
    "graph_parallel",
    "iostreams",
    "locale",
    "log",
    "math",
    "metaparse",
    "mpi",
    "program_options",
    "python",
    "random",
    "regex",
    "serialization",
    "signals",
    "system",
    "test",
    "thread",
    "timer",
    "type_erasure",
    "wave",
];

/// Libraries buildable from 1.69.0 onwards (signals retired in favor of
/// signals2)
const CATALOG_1_69_PLUS: &[&str] = &[
    "atomic",
    "chrono",
    "container",
    "context",
    "coroutine",
    "coroutine2",
    "date_time",
    "exception",
    "fiber",
    "filesystem",
    "graph",
    "graph_parallel",
    "iostreams",
    "locale",
    "log",
    "math",
    "metaparse",
    "mpi",
    "program_options",
    "python",
    "random",
    "regex",
    "serialization",
    "signals2",
    "system",
    "test",
    "thread",
    "timer",
    "type_erasure",
    "wave",
];

/// First release carrying the post-signals catalog
const CATALOG_SWITCH: Version = Version {
    major: 1,
    minor: 69,
    patch: 0,
};

/// The full library catalog for one release
pub fn catalog_for(version: &Version) -> &'static [&'static str] {
    if *version >= CATALOG_SWITCH {
        CATALOG_1_69_PLUS
    } else {
        CATALOG_PRE_1_69
    }
}

/// Libraries whose staged archive carries a different name than the
/// `--with-<lib>` selector ("test" stages as unit_test_framework)
pub fn output_name(library: &str) -> &str {
    match library {
        "test" => "unit_test_framework",
        other => other,
    }
}

/// Per-platform exclusions plus the set of libraries that stage no
/// archive anywhere without extra toolchain setup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exclusions {
    ios: BTreeSet<String>,
    tvos: BTreeSet<String>,
    macos: BTreeSet<String>,
    no_archive: BTreeSet<String>,
}

/// On-disk override format, a flat TOML table of name lists
#[derive(Debug, Deserialize)]
struct ExclusionsFile {
    #[serde(default)]
    ios: Vec<String>,
    #[serde(default)]
    tvos: Vec<String>,
    #[serde(default)]
    macos: Vec<String>,
    #[serde(default)]
    no_archive: Vec<String>,
}

impl Exclusions {
    /// The built-in tables. tvOS has no fork(), which Boost.Test needs;
    /// python/mpi/graph_parallel stage nothing unless the user wires up
    /// a Python or MPI toolchain in user-config.jam.
    pub fn defaults(_version: &Version) -> Self {
        Self {
            ios: BTreeSet::new(),
            tvos: ["test"].iter().map(|s| s.to_string()).collect(),
            macos: BTreeSet::new(),
            no_archive: ["graph_parallel", "mpi", "python"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Load an override table, validating every entry against the
    /// release's catalog so typos fail before any build work starts
    pub fn from_toml_file(path: &Path, version: &Version) -> Result<Self> {
        let text = std::fs::read_to_string(path).context_with_hint(
            format!("cannot read exclusion table {}", path.display()),
            "pass --exclusions a readable TOML file with optional\n\
             ios/tvos/macos/no_archive name lists",
        )?;

        let file: ExclusionsFile = toml::from_str(&text).context_with_hint(
            format!("invalid exclusion table {}", path.display()),
            "expected flat lists, e.g.\n\
             tvos = [\"test\"]\n\
             no_archive = [\"python\", \"mpi\"]",
        )?;

        let catalog = catalog_for(version);
        for name in file
            .ios
            .iter()
            .chain(&file.tvos)
            .chain(&file.macos)
            .chain(&file.no_archive)
        {
            if !catalog.contains(&name.as_str()) {
                return Err(ForgeError::config_error_with_hint(
                    format!(
                        "exclusion table {} names unknown library '{}'",
                        path.display(),
                        name
                    ),
                    format!("libraries known to Boost {}: {}", version, catalog.join(" ")),
                )
                .into());
            }
        }

        Ok(Self {
            ios: file.ios.into_iter().collect(),
            tvos: file.tvos.into_iter().collect(),
            macos: file.macos.into_iter().collect(),
            no_archive: file.no_archive.into_iter().collect(),
        })
    }

    pub fn for_platform(&self, platform: Platform) -> &BTreeSet<String> {
        match platform {
            Platform::Ios => &self.ios,
            Platform::Tvos => &self.tvos,
            Platform::Macos => &self.macos,
        }
    }

    /// True when a missing staged archive for this library is expected
    /// rather than a build defect
    pub fn expects_no_archive(&self, library: &str) -> bool {
        self.no_archive.contains(library)
    }

    pub fn no_archive_set(&self) -> &BTreeSet<String> {
        &self.no_archive
    }
}
