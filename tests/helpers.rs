//! Shared test utilities for rpi4-builder tests.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use tempfile::TempDir;

use rpi4_builder::config::{Config, RetryPolicy};
use rpi4_builder::error::Interrupted;
use rpi4_builder::process::{ExecutionResult, RunOptions, Shell};

/// What a scripted command does when it runs.
#[derive(Debug, Clone)]
pub enum Reply {
    Done(ExecutionResult),
    Interrupt,
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Done(ExecutionResult::ok(""))
    }

    pub fn stdout(text: &str) -> Self {
        Reply::Done(ExecutionResult::ok(text))
    }

    pub fn fail(stderr: &str) -> Self {
        Reply::Done(ExecutionResult::failed(stderr))
    }
}

struct Rule {
    needle: String,
    replies: VecDeque<Reply>,
}

/// A [`Shell`] that records every command and answers from a script.
///
/// Each rule matches commands containing its needle; the first matching
/// rule wins. Replies are consumed in order and the last one repeats.
/// Commands no rule matches succeed with empty output.
#[derive(Default)]
pub struct ScriptedShell {
    rules: RefCell<Vec<Rule>>,
    calls: RefCell<Vec<(String, RunOptions)>>,
    pauses: RefCell<Vec<Duration>>,
    /// Commands that leave Ctrl-C pressed once they finish.
    interrupt_after: RefCell<Vec<String>>,
    interrupted: Cell<bool>,
}

impl ScriptedShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands containing `needle` with `replies`.
    pub fn on(self, needle: &str, replies: Vec<Reply>) -> Self {
        assert!(!replies.is_empty(), "a rule needs at least one reply");
        self.rules.borrow_mut().push(Rule {
            needle: needle.to_string(),
            replies: replies.into(),
        });
        self
    }

    /// Latch an interrupt after a command containing `needle` finishes, as
    /// if Ctrl-C arrived while no command was running.
    pub fn interrupt_after(self, needle: &str) -> Self {
        self.interrupt_after.borrow_mut().push(needle.to_string());
        self
    }

    /// Every command run so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|(c, _)| c.clone()).collect()
    }

    /// Options of the first command containing `needle`.
    pub fn options_for(&self, needle: &str) -> Option<RunOptions> {
        self.calls
            .borrow()
            .iter()
            .find(|(c, _)| c.contains(needle))
            .map(|(_, o)| o.clone())
    }

    /// How many commands contained `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|(c, _)| c.contains(needle))
            .count()
    }

    pub fn ran(&self, needle: &str) -> bool {
        self.count(needle) > 0
    }

    /// Index of the first command containing `needle`.
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.calls.borrow().iter().position(|(c, _)| c.contains(needle))
    }

    pub fn pauses(&self) -> Vec<Duration> {
        self.pauses.borrow().clone()
    }
}

impl Shell for ScriptedShell {
    fn run(&self, command: &str, opts: &RunOptions) -> Result<ExecutionResult> {
        self.checkpoint()?;
        if self
            .interrupt_after
            .borrow()
            .iter()
            .any(|needle| command.contains(needle))
        {
            self.interrupted.set(true);
        }
        self.calls
            .borrow_mut()
            .push((command.to_string(), opts.clone()));

        let mut rules = self.rules.borrow_mut();
        let reply = match rules.iter_mut().find(|r| command.contains(&r.needle)) {
            Some(rule) if rule.replies.len() > 1 => rule.replies.pop_front(),
            Some(rule) => rule.replies.front().cloned(),
            None => None,
        };

        match reply {
            Some(Reply::Done(result)) => Ok(result),
            Some(Reply::Interrupt) => Err(Interrupted.into()),
            None => Ok(ExecutionResult::ok("")),
        }
    }

    fn pause(&self, delay: Duration) -> Result<()> {
        self.checkpoint()?;
        self.pauses.borrow_mut().push(delay);
        Ok(())
    }

    fn checkpoint(&self) -> Result<()> {
        if self.interrupted.replace(false) {
            return Err(Interrupted.into());
        }
        Ok(())
    }
}

/// Temporary project directory with a Dockerfile and auto_build.sh.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    pub base_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base_dir = temp_dir.path().to_path_buf();
        let output_dir = base_dir.join("out");

        fs::create_dir_all(&output_dir).expect("Failed to create output dir");
        fs::write(base_dir.join("Dockerfile"), "FROM debian:bookworm\n")
            .expect("Failed to write Dockerfile");
        fs::write(base_dir.join("auto_build.sh"), "#!/bin/bash\nexit 0\n")
            .expect("Failed to write auto_build.sh");

        Self {
            _temp_dir: temp_dir,
            base_dir,
            output_dir,
        }
    }

    /// Configuration pointing at this directory, with no retry delays.
    pub fn config(&self) -> Config {
        self.config_with(&[])
    }

    pub fn config_with(&self, vars: &[(&str, &str)]) -> Config {
        let output = self.output_dir.to_string_lossy().into_owned();
        let mut config = Config::from_lookup(&self.base_dir, |key| {
            if key == "RPI4_OUTPUT_DIR" {
                return Some(output.clone());
            }
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        })
        .expect("config should load");
        config.policy = RetryPolicy::immediate();
        config
    }
}

/// Create a sparse file of `size` bytes.
pub fn create_sparse_file(path: &Path, size: u64) {
    let file = fs::File::create(path).expect("Failed to create file");
    file.set_len(size).expect("Failed to size file");
}

pub const MIB: u64 = 1024 * 1024;
