//! Ordered build steps that stop at the first unresolved failure.

use anyhow::Result;
use tracing::error;

use crate::retry::{BuildStep, StepReport, StepRunner};

/// A fixed sequence of build steps.
#[derive(Debug, Clone)]
pub struct Pipeline {
    steps: Vec<BuildStep>,
}

/// Reports for every step that ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub steps: Vec<StepReport>,
    /// Number of steps in the pipeline, run or not.
    pub planned: usize,
}

impl PipelineReport {
    /// True if every planned step ran and succeeded.
    pub fn succeeded(&self) -> bool {
        self.steps.len() == self.planned && self.steps.iter().all(StepReport::succeeded)
    }

    /// The step that halted the pipeline.
    pub fn failed_step(&self) -> Option<&StepReport> {
        self.steps.iter().find(|s| !s.succeeded())
    }

    /// Total command executions across all steps.
    pub fn executions(&self) -> u32 {
        self.steps.iter().map(|s| s.executions).sum()
    }
}

impl Pipeline {
    pub fn new(steps: Vec<BuildStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[BuildStep] {
        &self.steps
    }

    pub fn run(&self, runner: &StepRunner<'_>) -> Result<PipelineReport> {
        let mut report = PipelineReport {
            steps: Vec::with_capacity(self.steps.len()),
            planned: self.steps.len(),
        };

        for step in &self.steps {
            let step_report = runner.run(step)?;
            let ok = step_report.succeeded();
            report.steps.push(step_report);
            if !ok {
                let skipped = self.steps.len() - report.steps.len();
                if skipped > 0 {
                    error!("pipeline halted at {}; {} step(s) skipped", step.name, skipped);
                }
                break;
            }
        }

        Ok(report)
    }
}
