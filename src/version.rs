//! Component-wise version parsing and comparison
//!
//! Covers the three version shapes this tool compares:
//! - Boost releases: "1.81.0"
//! - Xcode releases: "14.2" or "11.4.1"
//! - Minimum OS targets: "13.4"
//!
//! None of these are semver (no pre-release or build metadata, two-part
//! forms are common), so comparison is plain numeric major/minor/patch
//! with absent components reading as zero.

use std::cmp::Ordering;
use std::fmt;

use anyhow::{bail, Context, Result};

/// A dotted numeric version (major.minor[.patch])
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    /// Parse a version string like "1.81.0" or "14.2"
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            bail!("Empty version string");
        }

        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() < 2 || parts.len() > 3 {
            bail!(
                "Invalid version format: '{}'. Expected 'major.minor' or 'major.minor.patch'",
                s
            );
        }

        let major = parts[0]
            .parse::<u64>()
            .with_context(|| format!("Invalid major version: '{}'", parts[0]))?;
        let minor = parts[1]
            .parse::<u64>()
            .with_context(|| format!("Invalid minor version: '{}'", parts[1]))?;
        let patch = if parts.len() > 2 {
            parts[2]
                .parse::<u64>()
                .with_context(|| format!("Invalid patch version: '{}'", parts[2]))?
        } else {
            0
        };

        Ok(Version {
            major,
            minor,
            patch,
        })
    }

    /// Shorthand for literal versions used as comparison gates
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Version {
            major,
            minor,
            patch,
        }
    }

    /// The underscore form Boost uses in directory and tarball names
    /// ("1.81.0" → "1_81_0")
    pub fn underscored(&self) -> String {
        format!("{}_{}_{}", self.major, self.minor, self.patch)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.major.cmp(&other.major) {
            Ordering::Equal => {}
            ord => return ord,
        }
        match self.minor.cmp(&other.minor) {
            Ordering::Equal => {}
            ord => return ord,
        }
        self.patch.cmp(&other.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse() {
        let v = Version::parse("1.81.0").unwrap();
        assert_eq!(v.major, 1);
        assert_eq!(v.minor, 81);
        assert_eq!(v.patch, 0);

        let v = Version::parse("14.2").unwrap();
        assert_eq!(v.major, 14);
        assert_eq!(v.minor, 2);
        assert_eq!(v.patch, 0);
    }

    #[test]
    fn test_version_parse_rejects_garbage() {
        assert!(Version::parse("").is_err());
        assert!(Version::parse("14").is_err());
        assert!(Version::parse("1.2.3.4").is_err());
        assert!(Version::parse("1.x.0").is_err());
        assert!(Version::parse("boost-1.81.0").is_err());
    }

    #[test]
    fn test_version_comparison() {
        let v1 = Version::parse("1.68.0").unwrap();
        let v2 = Version::parse("1.69.0").unwrap();
        let v3 = Version::parse("1.73.0").unwrap();

        assert!(v1 < v2);
        assert!(v2 < v3);
        assert!(v3 <= Version::new(1, 73, 0));
        assert!(Version::parse("1.74.0").unwrap() > Version::new(1, 73, 0));
    }

    #[test]
    fn test_two_part_comparison() {
        // Xcode gate used by the darwin.jam patch
        assert!(Version::parse("14.2").unwrap() >= Version::new(11, 4, 0));
        assert!(Version::parse("11.4").unwrap() >= Version::new(11, 4, 0));
        assert!(Version::parse("11.3.1").unwrap() < Version::new(11, 4, 0));
    }

    #[test]
    fn test_underscored() {
        assert_eq!(Version::parse("1.81.0").unwrap().underscored(), "1_81_0");
    }
}
