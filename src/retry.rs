//! Build steps and the per-step retry loop.
//!
//! A step runs, and on failure its output is classified and handed to the
//! [`Remediator`]. Remediable failures are retried up to `max_retries`
//! executions; failures nothing can fix (docker, unknown) end the step
//! after the first execution.

use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{error, info, warn};

use crate::classify::{ErrorCategory, PatternTable};
use crate::config::RetryPolicy;
use crate::process::{RunOptions, Shell};
use crate::remedy::Remediator;
use crate::timing::Timer;

/// One named build command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStep {
    pub name: String,
    pub command: String,
    /// Total executions allowed, at least 1.
    pub max_retries: u32,
    /// Stream output to the terminal while running.
    pub show_output: bool,
    /// Per-execution limit, on top of any pipeline deadline.
    pub timeout: Option<Duration>,
}

impl BuildStep {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            max_retries: 3,
            show_output: true,
            timeout: None,
        }
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn show_output(mut self, show: bool) -> Self {
        self.show_output = show;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Terminal state of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Success,
    Failed,
}

/// What happened while running a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub name: String,
    pub status: StepStatus,
    /// How many times the command ran.
    pub executions: u32,
    /// Categories whose fix was applied, one entry per retry-worthy failure.
    pub remediations: Vec<ErrorCategory>,
    /// Category of the most recent failure.
    pub last_category: Option<ErrorCategory>,
}

impl StepReport {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: StepStatus::Failed,
            executions: 0,
            remediations: Vec::new(),
            last_category: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == StepStatus::Success
    }
}

/// A fixed point in time that bounds every remaining execution.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    /// Time left, or None once the deadline has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .checked_duration_since(Instant::now())
            .filter(|left| !left.is_zero())
    }
}

/// Time available to the next command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Budget {
    Unbounded,
    Limit(Duration),
    Expired,
}

/// Runs steps through execute → classify → remediate → retry.
pub struct StepRunner<'a> {
    shell: &'a dyn Shell,
    patterns: &'a PatternTable,
    remediator: &'a Remediator<'a>,
    policy: &'a RetryPolicy,
    deadline: Option<Deadline>,
}

impl<'a> StepRunner<'a> {
    pub fn new(
        shell: &'a dyn Shell,
        patterns: &'a PatternTable,
        remediator: &'a Remediator<'a>,
        policy: &'a RetryPolicy,
    ) -> Self {
        Self {
            shell,
            patterns,
            remediator,
            policy,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// What is left for the next command: the tighter of `limit` and the
    /// time before the deadline.
    fn budget(&self, limit: Option<Duration>) -> Budget {
        let left = match self.deadline {
            Some(deadline) => match deadline.remaining() {
                Some(left) => Some(left),
                None => return Budget::Expired,
            },
            None => None,
        };
        match (limit, left) {
            (Some(a), Some(b)) => Budget::Limit(a.min(b)),
            (Some(d), None) | (None, Some(d)) => Budget::Limit(d),
            (None, None) => Budget::Unbounded,
        }
    }

    /// Run `step` until it succeeds, runs out of attempts, or hits a failure
    /// with no fix. Only interrupts and shell breakage are errors.
    pub fn run(&self, step: &BuildStep) -> Result<StepReport> {
        info!("{} started", step.name);
        let timer = Timer::start(&step.name);
        let mut report = StepReport::new(&step.name);

        for attempt in 0..step.max_retries {
            if attempt > 0 {
                warn!("retry {}/{}", attempt, step.max_retries - 1);
            }

            let timeout = match self.budget(step.timeout) {
                Budget::Expired => {
                    error!("{} not attempted: build time limit reached", step.name);
                    break;
                }
                Budget::Limit(limit) => Some(limit),
                Budget::Unbounded => None,
            };
            let mut opts = if step.show_output {
                RunOptions::streamed()
            } else {
                RunOptions::buffered()
            };
            opts.timeout = timeout;

            let result = self.shell.run(&step.command, &opts)?;
            report.executions += 1;

            if result.success {
                report.status = StepStatus::Success;
                info!("{} finished", step.name);
                timer.finish();
                return Ok(report);
            }

            let text = result.failure_text();
            let category = self.patterns.classify(text);
            report.last_category = Some(category);
            error!("{} failed: {} error", step.name, category);

            let fix_timeout = match self.budget(None) {
                Budget::Expired => {
                    error!("{} not remediated: build time limit reached", step.name);
                    break;
                }
                Budget::Limit(limit) => Some(limit),
                Budget::Unbounded => None,
            };
            if !self.remediator.remediate(category, text, fix_timeout)? {
                break;
            }
            report.remediations.push(category);
            self.shell.pause(self.policy.retry_delay)?;
        }

        error!("{} failed for good", step.name);
        Ok(report)
    }
}
