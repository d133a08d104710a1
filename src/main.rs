//! boostforge - builds the Boost C++ libraries into an XCFramework
//! for iOS, tvOS and macOS.
//!
//! ## Architecture
//!
//! ```text
//! CLI → matrix → source → build (b2) → merge (lipo/ar) → package (xcodebuild)
//! ```

mod build;
mod cli;
mod commands;
mod error;
mod exec;
mod matrix;
mod merge;
mod package;
mod source;
mod toolchain;
mod utils;
mod version;

use clap::Parser;

use cli::Cli;
use error::ForgeError;
use utils::terminal::print_error;

fn main() {
    let cli = Cli::parse();

    if let Err(err) = cli.execute() {
        match err.downcast_ref::<ForgeError>() {
            Some(forge) => forge.display_with_hints(),
            None => print_error(&format!("{err:#}")),
        }
        std::process::exit(1);
    }
}
