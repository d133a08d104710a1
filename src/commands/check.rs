//! Check command implementation
//!
//! Validates the host toolchain before a build: Xcode, the command
//! line tools the merge stage drives, and the SDKs each enabled
//! platform compiles against.

use std::collections::BTreeMap;

use anyhow::Result;
use clap::Args;

use crate::exec::{Invocation, ProcessRunner, Runner};
use crate::matrix::Platform;

/// Tools the merge and packaging stages invoke directly
const MERGE_TOOLS: &[&str] = &["lipo", "ar", "xcodebuild", "plutil", "xcrun"];

/// Check build environment dependencies
#[derive(Args, Debug)]
pub struct CheckCommand {
    /// Platform to check (all, ios, tvos, macos)
    #[arg(default_value = "all")]
    pub platform: String,

    /// Show detailed information
    #[arg(long)]
    pub verbose: bool,
}

impl CheckCommand {
    /// Execute the check command
    pub fn execute(self, _verbose: bool) -> Result<()> {
        println!("🔍 Checking {} build environment...\n", self.platform);

        let runner = ProcessRunner;
        let mut checker = EnvironmentChecker::new(self.verbose, &runner);

        match self.platform.as_str() {
            "all" => checker.check_all(),
            "ios" => {
                checker.check_host();
                checker.check_platform(Platform::Ios);
            }
            "tvos" => {
                checker.check_host();
                checker.check_platform(Platform::Tvos);
            }
            "macos" => {
                checker.check_host();
                checker.check_platform(Platform::Macos);
            }
            _ => {
                eprintln!("Unknown platform: {}", self.platform);
                eprintln!("Valid platforms: all, ios, tvos, macos");
                std::process::exit(1);
            }
        }

        checker.print_summary();

        // Exit with error if there are errors
        if !checker.errors.is_empty() {
            std::process::exit(1);
        }

        Ok(())
    }
}

/// Build environment checker
struct EnvironmentChecker<'a> {
    verbose: bool,
    runner: &'a dyn Runner,
    results: BTreeMap<String, BTreeMap<String, bool>>,
    warnings: Vec<String>,
    errors: Vec<String>,
}

impl<'a> EnvironmentChecker<'a> {
    fn new(verbose: bool, runner: &'a dyn Runner) -> Self {
        Self {
            verbose,
            runner,
            results: BTreeMap::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Run a tool and return its trimmed stdout on success
    fn run_tool(&self, program: &str, args: &[&str]) -> Option<String> {
        let invocation = Invocation::new(program).args(args.iter().copied());
        match self.runner.run(&invocation, false) {
            Ok(result) if result.success => Some(result.stdout.trim().to_string()),
            _ => None,
        }
    }

    /// Check if a tool can be resolved in PATH
    fn check_tool(&mut self, program: &str, friendly_name: &str) -> bool {
        if self.runner.tool_exists(program) {
            self.print_ok(&format!("{}: Found", friendly_name));
            true
        } else {
            self.print_error(&format!("{}: Not found", friendly_name));
            false
        }
    }

    fn print_ok(&self, msg: &str) {
        println!("  ✅ {}", msg);
    }

    fn print_error(&mut self, msg: &str) {
        println!("  ❌ {}", msg);
        self.errors.push(msg.to_string());
    }

    fn print_warning(&mut self, msg: &str) {
        println!("  ⚠️  {}", msg);
        self.warnings.push(msg.to_string());
    }

    fn print_info(&self, msg: &str) {
        println!("  ℹ️  {}", msg);
    }

    fn print_section(&self, title: &str) {
        println!("\n{}", "=".repeat(60));
        println!("  {}", title);
        println!("{}", "=".repeat(60));
    }

    /// Check the host toolchain shared by every platform pass
    fn check_host(&mut self) {
        self.print_section("Host Toolchain");

        if !cfg!(target_os = "macos") {
            self.print_warning("Building Apple platforms requires macOS");
        }

        // Check Xcode
        let xcode_path = self.run_tool("xcode-select", &["-p"]);
        let xcode_exists = match &xcode_path {
            Some(path) => {
                self.print_ok(&format!("Xcode: Installed at {}", path));

                // Get Xcode version
                if let Some(version) = self.run_tool("xcodebuild", &["-version"]) {
                    let first_line = version.lines().next().unwrap_or("");
                    self.print_info(&format!("Version: {}", first_line));
                }
                true
            }
            None => {
                self.print_error("Xcode: Not installed");
                self.print_info("Install from App Store, then run: sudo xcode-select -s /Applications/Xcode.app");
                false
            }
        };

        let mut checks = BTreeMap::new();
        checks.insert("xcode".to_string(), xcode_exists);

        // The merge stage shells out to these directly
        for tool in MERGE_TOOLS {
            let exists = self.check_tool(tool, tool);
            checks.insert(tool.to_string(), exists);
        }

        self.results.insert("host".to_string(), checks);

        if !xcode_exists {
            self.print_info("A full Xcode install is required; the bare command line tools ship no iOS/tvOS SDKs");
        }
    }

    /// Check the SDKs one platform's passes compile against
    fn check_platform(&mut self, platform: Platform) {
        let title = match platform {
            Platform::Ios => "iOS Platform",
            Platform::Tvos => "tvOS Platform",
            Platform::Macos => "macOS Platform",
        };
        self.print_section(title);

        let mut checks = BTreeMap::new();
        let mut seen = Vec::new();

        for pass in platform.passes() {
            let sdk = pass.sdk_name();
            if seen.contains(&sdk) {
                continue;
            }
            seen.push(sdk);

            match self.run_tool("xcrun", &["--sdk", sdk, "--show-sdk-path"]) {
                Some(path) => {
                    self.print_ok(&format!("{} SDK: {}", sdk, path));
                    if self.verbose {
                        if let Some(version) =
                            self.run_tool("xcrun", &["--sdk", sdk, "--show-sdk-version"])
                        {
                            self.print_info(&format!("  SDK version: {}", version));
                        }
                    }
                    checks.insert(sdk.to_string(), true);
                }
                None => {
                    self.print_error(&format!("{} SDK: Not found", sdk));
                    checks.insert(sdk.to_string(), false);
                }
            }
        }

        if checks.values().any(|ok| !ok) {
            self.print_info("Missing SDKs usually mean xcode-select points at the command line tools;");
            self.print_info("run: sudo xcode-select -s /Applications/Xcode.app");
        }

        self.results.insert(platform.as_str().to_string(), checks);
    }

    /// Check the host plus every platform
    fn check_all(&mut self) {
        self.check_host();
        for platform in Platform::all() {
            self.check_platform(platform);
        }
    }

    /// Print summary of check results
    fn print_summary(&self) {
        self.print_section("Summary");

        let total_checks = self.results.len();
        if total_checks == 0 {
            self.print_info("No checks performed");
            return;
        }

        let mut sections_ok = 0;
        let mut sections_partial = 0;
        let mut sections_failed = 0;

        for (section, checks) in &self.results {
            let all_ok = checks.values().all(|&v| v);
            let any_ok = checks.values().any(|&v| v);

            let status = if all_ok {
                sections_ok += 1;
                "✅ READY"
            } else if any_ok {
                sections_partial += 1;
                "⚠️  PARTIAL"
            } else {
                sections_failed += 1;
                "❌ NOT READY"
            };

            println!("  {}: {}", section.to_uppercase(), status);

            if self.verbose {
                for (check, result) in checks {
                    let symbol = if *result { "✅" } else { "❌" };
                    println!("    {} {}", symbol, check);
                }
            }
        }

        println!("\n{}", "=".repeat(60));
        println!("  Sections Checked: {}", total_checks);
        println!("  ✅ Ready: {}", sections_ok);
        println!("  ⚠️  Partial: {}", sections_partial);
        println!("  ❌ Not Ready: {}", sections_failed);

        if !self.errors.is_empty() {
            println!("\n  Total Errors: {}", self.errors.len());
        }
        if !self.warnings.is_empty() {
            println!("  Total Warnings: {}", self.warnings.len());
        }

        println!("{}\n", "=".repeat(60));

        if sections_ok == total_checks {
            println!("🎉 Environment is ready to build!");
        } else {
            println!("💡 Some checks need attention. See details above.");
        }
    }
}
