//! CLI argument parsing using clap derive macros

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands::{build::BuildCommand, check::CheckCommand, clean::CleanCommand};

/// boostforge - Boost XCFramework build tool
///
/// Builds the Boost C++ libraries as static archives for iOS, tvOS and
/// macOS and bundles them into a single XCFramework.
#[derive(Parser, Debug)]
#[command(name = "boostforge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build Boost for Apple platforms
    Build(BuildCommand),

    /// Check build environment dependencies
    Check(CheckCommand),

    /// Clean build artifacts
    Clean(CleanCommand),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        // Set up terminal colors
        if self.no_color {
            console::set_colors_enabled(false);
            console::set_colors_enabled_stderr(false);
        }

        // Execute the subcommand
        match self.command {
            Commands::Build(cmd) => cmd.execute(self.verbose),
            Commands::Check(cmd) => cmd.execute(self.verbose),
            Commands::Clean(cmd) => cmd.execute(self.verbose),
        }
    }
}
