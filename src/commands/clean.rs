//! Clean command implementation
//!
//! Removes derived build trees under the output root. `--purge` also
//! drops the unpacked source trees and the tarball cache, forcing the
//! next build to download and unpack from scratch.

use anyhow::Result;
use clap::Args;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::utils::paths::default_cache_dir;

/// Clean build artifacts
#[derive(Args, Debug)]
pub struct CleanCommand {
    /// Also remove unpacked sources and the download cache
    #[arg(long)]
    pub purge: bool,

    /// Show what would be deleted
    #[arg(long)]
    pub dry_run: bool,

    /// Skip confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Output root the build wrote into
    #[arg(long, value_name = "DIR", default_value = "build")]
    pub output_dir: PathBuf,

    /// Tarball cache directory
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,
}

impl CleanCommand {
    /// Execute the clean command
    pub fn execute(self, _verbose: bool) -> Result<()> {
        let cache_dir = self.cache_dir.clone().unwrap_or_else(default_cache_dir);
        let mut cleaner = ArtifactCleaner::new(
            self.output_dir.clone(),
            cache_dir,
            self.dry_run,
            self.yes,
        );

        if self.purge {
            cleaner.purge()?;
        } else {
            cleaner.clean()?;
        }

        cleaner.print_summary();
        Ok(())
    }
}

/// Removes build output directories and tracks what went away
struct ArtifactCleaner {
    output_root: PathBuf,
    cache_dir: PathBuf,
    dry_run: bool,
    skip_confirm: bool,
    cleaned_dirs: Vec<String>,
    cleaned_size: u64,
    failed_dirs: Vec<(String, String)>,
}

impl ArtifactCleaner {
    fn new(output_root: PathBuf, cache_dir: PathBuf, dry_run: bool, skip_confirm: bool) -> Self {
        Self {
            output_root,
            cache_dir,
            dry_run,
            skip_confirm,
            cleaned_dirs: Vec::new(),
            cleaned_size: 0,
            failed_dirs: Vec::new(),
        }
    }

    /// Remove every derived per-version tree, keeping sources and cache
    fn clean(&mut self) -> Result<()> {
        self.print_section("Cleaning derived build trees");

        let targets = self.derived_trees()?;
        if targets.is_empty() {
            println!("  Nothing to clean in {}", self.output_root.display());
            return Ok(());
        }

        if !self.confirm_clean(&format!(
            "Remove {} derived tree(s) under {}?",
            targets.len(),
            self.output_root.display()
        )) {
            println!("  Aborted");
            return Ok(());
        }

        for dir in targets {
            self.remove_directory(&dir, None);
        }
        Ok(())
    }

    /// `clean` plus unpacked sources and the tarball cache
    fn purge(&mut self) -> Result<()> {
        self.clean()?;

        self.print_section("Purging sources and cache");

        let sources = self.output_root.join("src");
        let cache = self.cache_dir.clone();

        if !sources.is_dir() && !cache.is_dir() {
            println!("  Nothing to purge");
            return Ok(());
        }

        if !self.confirm_clean("Remove unpacked sources and downloaded tarballs?") {
            println!("  Aborted");
            return Ok(());
        }

        self.remove_directory(&sources, Some("unpacked sources"));
        self.remove_directory(&cache, Some("tarball cache"));
        Ok(())
    }

    /// Per-version output trees: everything under the root except src/
    fn derived_trees(&self) -> Result<Vec<PathBuf>> {
        if !self.output_root.is_dir() {
            return Ok(Vec::new());
        }

        let mut dirs = Vec::new();
        for entry in fs::read_dir(&self.output_root)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() && entry.file_name() != "src" {
                dirs.push(path);
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    /// Calculate total size of a directory
    fn get_dir_size(dir: &Path) -> u64 {
        WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }

    /// Format size in human-readable form
    fn format_size(size: u64) -> String {
        const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
        let mut size = size as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_index])
    }

    /// Remove a directory, tracking size and outcome. Returns true when
    /// something was actually removed (or would be, in dry-run mode).
    fn remove_directory(&mut self, dir_path: &Path, display_name: Option<&str>) -> bool {
        if !dir_path.exists() || !dir_path.is_dir() {
            return false;
        }

        let name = display_name
            .map(String::from)
            .unwrap_or_else(|| dir_path.display().to_string());
        let size = Self::get_dir_size(dir_path);

        if self.dry_run {
            println!(
                "  [DRY RUN] Would remove: {} ({})",
                name,
                Self::format_size(size)
            );
            self.cleaned_dirs.push(name);
            self.cleaned_size += size;
            return true;
        }

        match fs::remove_dir_all(dir_path) {
            Ok(()) => {
                println!("  ✅ Removed: {} ({})", name, Self::format_size(size));
                self.cleaned_dirs.push(name);
                self.cleaned_size += size;
                true
            }
            Err(e) => {
                println!("  ❌ Failed to remove: {}", name);
                self.failed_dirs.push((name, e.to_string()));
                false
            }
        }
    }

    /// Ask for confirmation before deleting
    fn confirm_clean(&self, message: &str) -> bool {
        if self.skip_confirm || self.dry_run {
            return true;
        }

        print!("{} (y/N): ", message);
        io::stdout().flush().ok();

        let mut input = String::new();
        if io::stdin().read_line(&mut input).is_err() {
            return false;
        }

        let input = input.trim().to_lowercase();
        input == "y" || input == "yes"
    }

    fn print_section(&self, title: &str) {
        println!("\n{}", "=".repeat(60));
        println!("  {}", title);
        println!("{}", "=".repeat(60));
    }

    /// Print summary of cleaning results
    fn print_summary(&self) {
        println!("\n{}", "=".repeat(60));
        println!("  Clean Summary");
        println!("{}", "=".repeat(60));

        if self.dry_run {
            println!("  [DRY RUN MODE - No files were actually deleted]");
        }

        if self.cleaned_dirs.is_empty() && self.failed_dirs.is_empty() {
            println!("  Nothing was removed");
            return;
        }

        if !self.cleaned_dirs.is_empty() {
            println!(
                "  ✅ Successfully cleaned {} director{}:",
                self.cleaned_dirs.len(),
                if self.cleaned_dirs.len() == 1 { "y" } else { "ies" }
            );
            for dir in &self.cleaned_dirs {
                println!("     - {}", dir);
            }
            println!(
                "  💾 Total space freed: {}",
                Self::format_size(self.cleaned_size)
            );
        }

        if !self.failed_dirs.is_empty() {
            println!("  ❌ Failed to clean {} director(ies):", self.failed_dirs.len());
            for (dir, err) in &self.failed_dirs {
                println!("     - {}: {}", dir, err);
            }
        }

        if self.dry_run {
            println!("\n  💡 Tip: Run without --dry-run to actually delete the files");
        }
    }
}
