//! Boost.Build (b2) configuration and execution
//!
//! This module handles invoking `./b2` for the stage and install steps
//! of one platform pass, and bootstrapping the engine when absent.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::error::{hints, ForgeError};
use crate::exec::{CommandResult, Invocation, Runner};
use crate::matrix::Variant;

/// How many trailing lines of each stream are kept as failure
/// diagnostics
const DIAGNOSTIC_LINES: usize = 20;

/// b2 invocation builder for one platform pass
#[derive(Debug)]
pub struct B2Invocation {
    /// Source tree root (b2 and its Jamroot live here)
    source_dir: PathBuf,
    /// Pass label for error reporting ("iphone", "appletvsim")
    pass_label: String,
    /// --build-dir
    build_dir: PathBuf,
    /// --stagedir
    stage_dir: PathBuf,
    /// --user-config
    user_config: PathBuf,
    /// toolset=<name>
    toolset: String,
    variant: Variant,
    jobs: usize,
    /// --with-<lib> selectors, in merge order
    libraries: Vec<String>,
    /// --prefix for the install step
    prefix: Option<PathBuf>,
    verbose: bool,
}

impl B2Invocation {
    pub fn new(source_dir: PathBuf, pass_label: impl Into<String>) -> Self {
        Self {
            source_dir,
            pass_label: pass_label.into(),
            build_dir: PathBuf::new(),
            stage_dir: PathBuf::new(),
            user_config: PathBuf::new(),
            toolset: String::new(),
            variant: Variant::Release,
            jobs: 1,
            libraries: Vec::new(),
            prefix: None,
            verbose: false,
        }
    }

    pub fn build_dir(mut self, dir: PathBuf) -> Self {
        self.build_dir = dir;
        self
    }

    pub fn stage_dir(mut self, dir: PathBuf) -> Self {
        self.stage_dir = dir;
        self
    }

    pub fn user_config(mut self, path: PathBuf) -> Self {
        self.user_config = path;
        self
    }

    pub fn toolset(mut self, toolset: impl Into<String>) -> Self {
        self.toolset = toolset.into();
        self
    }

    pub fn variant(mut self, variant: Variant) -> Self {
        self.variant = variant;
        self
    }

    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn libraries<I, S>(mut self, libraries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.libraries = libraries.into_iter().map(Into::into).collect();
        self
    }

    pub fn prefix(mut self, prefix: PathBuf) -> Self {
        self.prefix = Some(prefix);
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Arguments shared by stage and install
    fn common_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("-j{}", self.jobs),
            format!("--build-dir={}", self.build_dir.display()),
            format!("--stagedir={}", self.stage_dir.display()),
            format!("--user-config={}", self.user_config.display()),
        ];
        for lib in &self.libraries {
            args.push(format!("--with-{lib}"));
        }
        args.push(format!("toolset={}", self.toolset));
        args.push("link=static".to_string());
        args.push(format!("variant={}", self.variant.as_str()));
        args
    }

    fn run_step(&self, runner: &dyn Runner, step: &str, extra: &[String]) -> Result<()> {
        let invocation = Invocation::new("./b2")
            .args(self.common_args())
            .args(extra.iter().cloned())
            .arg(step)
            .cwd(&self.source_dir);

        if self.verbose {
            eprintln!("Running: {}", invocation.render());
        }

        let result = runner.run(&invocation, self.verbose)?;
        if !result.success {
            return Err(ForgeError::build_failure_with_diagnostics(
                self.pass_label.clone(),
                format!("b2 {} exited with code {}", step, result.exit_code),
                failure_tail(&result),
                Some(format!(
                    "rerun with --verbose to stream the full b2 output for the {} pass",
                    self.pass_label
                )),
            )
            .into());
        }
        Ok(())
    }

    /// Compile and stage the selected libraries
    pub fn stage(&self, runner: &dyn Runner) -> Result<()> {
        self.run_step(runner, "stage", &[])
    }

    /// Install headers and libraries into the prefix
    pub fn install(&self, runner: &dyn Runner) -> Result<()> {
        let extra = match &self.prefix {
            Some(prefix) => vec![format!("--prefix={}", prefix.display())],
            None => Vec::new(),
        };
        self.run_step(runner, "install", &extra)
    }
}

/// Make sure `./b2` exists in the source tree, running bootstrap.sh on
/// first use
pub fn ensure_engine(runner: &dyn Runner, source_dir: &Path, verbose: bool) -> Result<()> {
    let b2 = source_dir.join("b2");
    if b2.exists() {
        return Ok(());
    }

    let invocation = Invocation::new("./bootstrap.sh").cwd(source_dir);
    if verbose {
        eprintln!("Running: {}", invocation.render());
    }
    let result = runner.run(&invocation, verbose)?;
    if !result.success {
        return Err(ForgeError::build_failure_with_diagnostics(
            "bootstrap".to_string(),
            format!("bootstrap.sh exited with code {}", result.exit_code),
            failure_tail(&result),
            Some(hints::b2().to_string()),
        )
        .into());
    }

    if !b2.exists() {
        return Err(ForgeError::build_failure_with_diagnostics(
            "bootstrap".to_string(),
            "bootstrap.sh succeeded but produced no b2 binary".to_string(),
            Vec::new(),
            Some(hints::b2().to_string()),
        )
        .into());
    }
    Ok(())
}

/// Trailing lines of both streams; b2 reports compile errors on
/// stderr but prints its "...failed updating N targets..." verdict
/// on stdout
fn failure_tail(result: &CommandResult) -> Vec<String> {
    let mut tail = tail_lines(&result.stderr, DIAGNOSTIC_LINES);
    tail.extend(tail_lines(&result.stdout, DIAGNOSTIC_LINES));
    tail
}

fn tail_lines(text: &str, count: usize) -> Vec<String> {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].iter().map(|l| l.to_string()).collect()
}
