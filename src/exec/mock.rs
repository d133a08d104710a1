//! Scripted runner for exercising pipeline stages in tests

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;

use super::subprocess::{CommandResult, Invocation, Runner};

type Effect = Box<dyn Fn(&Invocation) -> std::io::Result<()>>;

struct Rule {
    program: String,
    arg_contains: Option<String>,
    exit_code: i32,
    stdout: String,
    stderr: String,
    effect: Option<Effect>,
}

/// Records every invocation and answers from scripted rules.
///
/// Rules match on the program's file name (so "./b2" matches "b2") plus
/// an optional argument substring; first match wins, anything unmatched
/// succeeds with empty output.
#[derive(Default)]
pub struct MockRunner {
    rules: Vec<Rule>,
    missing: BTreeSet<String>,
    calls: RefCell<Vec<Invocation>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Succeed with canned stdout
    pub fn stdout(mut self, program: &str, stdout: &str) -> Self {
        self.rules.push(Rule {
            program: program.to_string(),
            arg_contains: None,
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
            effect: None,
        });
        self
    }

    /// Succeed with canned stdout when an argument contains `needle`
    pub fn stdout_when(mut self, program: &str, needle: &str, stdout: &str) -> Self {
        self.rules.push(Rule {
            program: program.to_string(),
            arg_contains: Some(needle.to_string()),
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
            effect: None,
        });
        self
    }

    /// Fail with exit code 1 and the given stderr
    pub fn fail(mut self, program: &str, stderr: &str) -> Self {
        self.rules.push(Rule {
            program: program.to_string(),
            arg_contains: None,
            exit_code: 1,
            stdout: String::new(),
            stderr: stderr.to_string(),
            effect: None,
        });
        self
    }

    /// Fail only when an argument contains `needle`
    pub fn fail_when(mut self, program: &str, needle: &str, stderr: &str) -> Self {
        self.rules.push(Rule {
            program: program.to_string(),
            arg_contains: Some(needle.to_string()),
            exit_code: 1,
            stdout: String::new(),
            stderr: stderr.to_string(),
            effect: None,
        });
        self
    }

    /// Fail with exit code 1 and output on both streams
    pub fn fail_with_output(mut self, program: &str, stdout: &str, stderr: &str) -> Self {
        self.rules.push(Rule {
            program: program.to_string(),
            arg_contains: None,
            exit_code: 1,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            effect: None,
        });
        self
    }

    /// Succeed and run a filesystem side effect (fake what the tool
    /// would have produced)
    pub fn effect<F>(mut self, program: &str, effect: F) -> Self
    where
        F: Fn(&Invocation) -> std::io::Result<()> + 'static,
    {
        self.rules.push(Rule {
            program: program.to_string(),
            arg_contains: None,
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            effect: Some(Box::new(effect)),
        });
        self
    }

    /// Make `tool_exists` report this program as absent
    pub fn missing_tool(mut self, program: &str) -> Self {
        self.missing.insert(program.to_string());
        self
    }

    /// All invocations seen so far, in order
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.borrow().clone()
    }

    /// Invocations of one program (file-name match), in order
    pub fn calls_of(&self, program: &str) -> Vec<Invocation> {
        self.calls
            .borrow()
            .iter()
            .filter(|inv| file_name(&inv.program) == program)
            .cloned()
            .collect()
    }

    fn find_rule(&self, invocation: &Invocation) -> Option<&Rule> {
        self.rules.iter().find(|rule| {
            if file_name(&invocation.program) != rule.program {
                return false;
            }
            match &rule.arg_contains {
                Some(needle) => invocation.args.iter().any(|a| a.contains(needle)),
                None => true,
            }
        })
    }
}

fn file_name(program: &str) -> &str {
    Path::new(program)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(program)
}

impl Runner for MockRunner {
    fn run(&self, invocation: &Invocation, _inherit_io: bool) -> Result<CommandResult> {
        self.calls.borrow_mut().push(invocation.clone());

        let (exit_code, stdout, stderr) = match self.find_rule(invocation) {
            Some(rule) => {
                if let Some(effect) = &rule.effect {
                    effect(invocation)?;
                }
                (rule.exit_code, rule.stdout.clone(), rule.stderr.clone())
            }
            None => (0, String::new(), String::new()),
        };

        Ok(CommandResult {
            success: exit_code == 0,
            exit_code,
            stdout,
            stderr,
            duration: Duration::from_millis(0),
        })
    }

    fn tool_exists(&self, program: &str) -> bool {
        !self.missing.contains(file_name(program))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rules_match_on_file_name() {
        let runner = MockRunner::new().stdout("b2", "...updated 1 target...");
        let result = runner
            .run(&Invocation::new("./b2").arg("stage"), false)
            .unwrap();
        assert!(result.success);
        assert_eq!(result.stdout, "...updated 1 target...");
        assert_eq!(runner.calls_of("b2").len(), 1);
    }

    #[test]
    fn test_arg_scoped_failure() {
        let runner = MockRunner::new().fail_when("b2", "install", "error: ...");
        let ok = runner
            .run(&Invocation::new("./b2").arg("stage"), false)
            .unwrap();
        let err = runner
            .run(&Invocation::new("./b2").arg("install"), false)
            .unwrap();
        assert!(ok.success);
        assert!(!err.success);
        assert_eq!(err.exit_code, 1);
    }

    #[test]
    fn test_unmatched_invocations_succeed() {
        let runner = MockRunner::new();
        let result = runner
            .run(&Invocation::new("lipo").arg("-create"), false)
            .unwrap();
        assert!(result.success);
        assert!(result.stdout.is_empty());
    }
}
