//! Error types and helpers for user-friendly error messages
//!
//! This module provides custom error types with actionable hints and suggestions
//! to help users quickly resolve common issues.

use thiserror::Error;

/// Custom error types with helpful context and suggestions
#[derive(Error, Debug)]
pub enum ForgeError {
    /// Configuration / argument errors, raised before any I/O
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
        hint: Option<String>,
    },

    /// Version string parsing or comparison errors
    #[error("Version error: {message}")]
    Version { message: String, hint: String },

    /// Release tarball download errors
    #[error("Download failed for {url}: {message}")]
    Download {
        url: String,
        message: String,
        #[source]
        source: Option<anyhow::Error>,
        hint: Option<String>,
    },

    /// Source patching errors
    #[error("Patch failed for {file}: {message}")]
    Patch {
        file: String,
        message: String,
        hint: String,
    },

    /// Tool/executable not found or misconfigured
    #[error("Missing tool: {tool}")]
    MissingTool {
        tool: String,
        required_for: String,
        hint: String,
    },

    /// Compilation failure in one platform pass
    #[error("Build failed for {platform}: {message}")]
    BuildFailure {
        platform: String,
        message: String,
        #[source]
        source: Option<anyhow::Error>,
        diagnostics: Vec<String>,
        hint: Option<String>,
    },

    /// Archive decomposition / recomposition errors
    #[error("Merge failed for '{library}': {message}")]
    Merge {
        library: String,
        message: String,
        hint: String,
    },

    /// Final package assembly errors
    #[error("Packaging failed: {message}")]
    Package {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
        hint: Option<String>,
    },
}

impl ForgeError {
    /// Create a configuration error with a hint
    pub fn config_error_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
            hint: Some(hint.into()),
        }
    }

    /// Create a version error
    pub fn version_error(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Version {
            message: message.into(),
            hint: hint.into(),
        }
    }

    /// Create a download error
    pub fn download_error(
        url: impl Into<String>,
        message: impl Into<String>,
        source: Option<anyhow::Error>,
    ) -> Self {
        Self::Download {
            url: url.into(),
            message: message.into(),
            source,
            hint: Some(hints::network().to_string()),
        }
    }

    /// Create a patch error
    pub fn patch_error(
        file: impl Into<String>,
        message: impl Into<String>,
        hint: impl Into<String>,
    ) -> Self {
        Self::Patch {
            file: file.into(),
            message: message.into(),
            hint: hint.into(),
        }
    }

    /// Create a missing tool error
    pub fn missing_tool(
        tool: impl Into<String>,
        required_for: impl Into<String>,
        hint: impl Into<String>,
    ) -> Self {
        Self::MissingTool {
            tool: tool.into(),
            required_for: required_for.into(),
            hint: hint.into(),
        }
    }

    /// Create a build failure error with diagnostics
    pub fn build_failure_with_diagnostics(
        platform: impl Into<String>,
        message: impl Into<String>,
        diagnostics: Vec<String>,
        hint: Option<String>,
    ) -> Self {
        Self::BuildFailure {
            platform: platform.into(),
            message: message.into(),
            source: None,
            diagnostics,
            hint,
        }
    }

    /// Create a merge error
    pub fn merge_error(
        library: impl Into<String>,
        message: impl Into<String>,
        hint: impl Into<String>,
    ) -> Self {
        Self::Merge {
            library: library.into(),
            message: message.into(),
            hint: hint.into(),
        }
    }

    /// Create a packaging error
    pub fn package_error(message: impl Into<String>, source: Option<anyhow::Error>) -> Self {
        Self::Package {
            message: message.into(),
            source,
            hint: None,
        }
    }

    /// Display error with formatting and hints
    pub fn display_with_hints(&self) {
        use console::style;

        eprintln!("\n{} {}", style("ERROR:").red().bold(), self);

        match self {
            ForgeError::Config { hint, .. }
            | ForgeError::Download { hint, .. }
            | ForgeError::BuildFailure { hint, .. }
            | ForgeError::Package { hint, .. } => {
                if let Some(h) = hint {
                    eprintln!("\n{} {}", style("HINT:").yellow().bold(), h);
                }
            }
            ForgeError::Version { hint, .. }
            | ForgeError::Patch { hint, .. }
            | ForgeError::MissingTool { hint, .. }
            | ForgeError::Merge { hint, .. } => {
                eprintln!("\n{} {}", style("HINT:").yellow().bold(), hint);
            }
        }

        // Display diagnostics for build failures
        if let ForgeError::BuildFailure { diagnostics, .. } = self {
            if !diagnostics.is_empty() {
                eprintln!("\n{}", style("DIAGNOSTICS:").cyan().bold());
                for diag in diagnostics {
                    eprintln!("  • {}", diag);
                }
            }
        }

        eprintln!();
    }
}

/// Helper trait for adding hints to Result types
pub trait ResultExt<T> {
    /// Add context with a hint
    fn context_with_hint(
        self,
        context: impl Into<String>,
        hint: impl Into<String>,
    ) -> Result<T, ForgeError>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context_with_hint(
        self,
        context: impl Into<String>,
        hint: impl Into<String>,
    ) -> Result<T, ForgeError> {
        self.map_err(|e| ForgeError::Config {
            message: format!("{}: {}", context.into(), e),
            source: Some(e.into()),
            hint: Some(hint.into()),
        })
    }
}

/// Common error hints
pub mod hints {
    /// Get hint for missing Xcode
    pub fn xcode() -> &'static str {
        "Install Xcode from the App Store:\n\
         1. Open App Store\n\
         2. Search for 'Xcode'\n\
         3. Click Install\n\
         4. Run: sudo xcode-select --install"
    }

    /// Get hint for missing command-line tools (lipo, ar, plutil, xcrun)
    pub fn command_line_tools() -> &'static str {
        "Install the Xcode command line tools:\n\
         • Run: xcode-select --install\n\
         • Or point xcode-select at a full Xcode: sudo xcode-select -s /Applications/Xcode.app"
    }

    /// Get hint for a missing b2 engine
    pub fn b2() -> &'static str {
        "b2 is built by Boost's own bootstrap step. Inside the unpacked source tree:\n\
         • Run: ./bootstrap.sh\n\
         \n\
         A 'command not found: ./bootstrap.sh' usually means the source tree is\n\
         incomplete; run 'boostforge clean --purge' and build again."
    }

    /// Get hint for network / download issues
    pub fn network() -> &'static str {
        "Check your network connection and proxy settings.\n\
         Boost releases are served from archives.boost.io (1.63.0 and newer)\n\
         and downloads.sourceforge.net (older releases). If a release was\n\
         yanked, pick a neighboring patch version."
    }

    /// Get hint for an archive the build did not produce
    pub fn missing_archive(library: &str, platform: &str) -> String {
        format!(
            "b2 finished without staging '{}' for {}. If this library is known\n\
             to produce no binary on this platform, add it to the exclusion\n\
             table (see --exclusions <file>). Otherwise inspect the b2 output\n\
             with --verbose.",
            library, platform
        )
    }

    /// Get hint for the darwin.jam patch failing to apply
    pub fn darwin_jam() -> &'static str {
        "tools/build/src/tools/darwin.jam no longer contains the\n\
         '-fcoalesce-templates' flag this Boost/Xcode pairing needs removed.\n\
         The source tree may be from an unexpected release; run\n\
         'boostforge clean --purge' to force a fresh unpack, or build with a\n\
         Boost version newer than 1.73.0."
    }
}
