//! Fixed-order run of all configuration steps.
//!
//! The plan is a static list of step descriptors; each step is a plain
//! function over the context, the capability set, and the runner. Order
//! matters: keyring population gates every package mutation, subvolume
//! teardown precedes recreation, remount precedes default selection. One
//! criticality policy per step decides whether a failure aborts the run or
//! is logged and swallowed.

use anyhow::Result;

use crate::config::TargetContext;
use crate::probe::Capabilities;
use crate::process::Runner;
use crate::{bootloader, keyring, microcode, orphans, snapshots};

/// Whether a step's failure ends the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criticality {
    /// Failure aborts the run; later steps never execute.
    Critical,
    /// Failure is logged and the run continues.
    BestEffort,
}

/// What a step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step ran to completion.
    Done,
    /// The step's precondition didn't hold; nothing was touched.
    Skipped,
}

type StepAction = fn(&TargetContext, &Capabilities, &dyn Runner) -> Result<StepOutcome>;

/// Stateless descriptor for one configuration step.
pub struct Step {
    /// Step name used in logs and the report.
    pub name: &'static str,
    pub criticality: Criticality,
    action: StepAction,
}

/// Terminal status of a step in the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Completed,
    Skipped,
    Failed(String),
    /// Never reached because an earlier Critical step failed.
    NotRun,
}

/// Per-step record in the run report.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub name: &'static str,
    pub status: StepStatus,
}

/// Single terminal outcome of a run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub steps: Vec<StepReport>,
    /// Name and error of the Critical step that aborted the run, if any.
    pub critical_failure: Option<(&'static str, String)>,
}

impl RunReport {
    /// True unless a Critical step failed.
    pub fn success(&self) -> bool {
        self.critical_failure.is_none()
    }

    /// Count of steps with the given terminal status kind.
    pub fn count(&self, matches: impl Fn(&StepStatus) -> bool) -> usize {
        self.steps.iter().filter(|s| matches(&s.status)).count()
    }

    /// Print the report to stdout.
    pub fn print(&self) {
        println!("\n=== Post-install Configuration Results ===\n");
        for step in &self.steps {
            let (icon, detail) = match &step.status {
                StepStatus::Completed => ("✓", String::new()),
                StepStatus::Skipped => ("○", " (skipped)".to_string()),
                StepStatus::Failed(err) => ("✗", format!(": {}", err)),
                StepStatus::NotRun => ("○", " (not run)".to_string()),
            };
            println!("  {} {}{}", icon, step.name, detail);
        }
        println!();
        match &self.critical_failure {
            Some((name, err)) => println!("FAILED at {}: {}", name, err),
            None => println!(
                "Configuration complete: {} done, {} skipped, {} degraded",
                self.count(|s| *s == StepStatus::Completed),
                self.count(|s| matches!(*s, StepStatus::Skipped | StepStatus::NotRun)),
                self.count(|s| matches!(*s, StepStatus::Failed(_))),
            ),
        }
    }
}

/// The fixed, ordered step plan.
pub fn plan() -> Vec<Step> {
    vec![
        Step {
            name: "keyring bootstrap",
            criticality: Criticality::Critical,
            action: |ctx, _caps, runner| {
                keyring::bootstrap(ctx, runner)?;
                Ok(StepOutcome::Done)
            },
        },
        Step {
            name: "package database refresh",
            criticality: Criticality::BestEffort,
            action: |ctx, _caps, runner| {
                if !ctx.has_network {
                    return Ok(StepOutcome::Skipped);
                }
                keyring::refresh_databases(ctx, runner)?;
                Ok(StepOutcome::Done)
            },
        },
        Step {
            name: "gpg-agent termination",
            criticality: Criticality::BestEffort,
            action: |_ctx, _caps, runner| {
                keyring::kill_gpg_agent(runner)?;
                Ok(StepOutcome::Done)
            },
        },
        Step {
            name: "microcode pruning",
            criticality: Criticality::BestEffort,
            action: |_ctx, caps, runner| {
                microcode::apply(microcode::detect_vendor(), caps, runner)?;
                Ok(StepOutcome::Done)
            },
        },
        Step {
            name: "orphan reconciliation",
            criticality: Criticality::BestEffort,
            action: |_ctx, _caps, runner| {
                orphans::reconcile(runner)?;
                Ok(StepOutcome::Done)
            },
        },
        Step {
            name: "snapshot subsystem",
            criticality: Criticality::BestEffort,
            action: |ctx, caps, runner| {
                match snapshots::configure(ctx, caps, runner)? {
                    snapshots::SnapshotOutcome::Skipped => Ok(StepOutcome::Skipped),
                    snapshots::SnapshotOutcome::Configured => Ok(StepOutcome::Done),
                    snapshots::SnapshotOutcome::AbortedAtPurge => Err(anyhow::anyhow!(
                        "stale snapshot subvolume could not be deleted; \
                         remaining snapshot steps were skipped"
                    )),
                }
            },
        },
        Step {
            name: "bootloader regeneration",
            criticality: Criticality::BestEffort,
            action: |ctx, caps, runner| {
                bootloader::regenerate(ctx, caps, runner)?;
                Ok(StepOutcome::Done)
            },
        },
    ]
}

/// Run the full plan and produce the terminal report.
pub fn run(ctx: &TargetContext, caps: &Capabilities, runner: &dyn Runner) -> RunReport {
    let plan = plan();
    let mut steps = Vec::with_capacity(plan.len());
    let mut critical_failure = None;

    for (idx, step) in plan.iter().enumerate() {
        println!("[postcfg] Step: {}", step.name);
        match (step.action)(ctx, caps, runner) {
            Ok(StepOutcome::Done) => steps.push(StepReport {
                name: step.name,
                status: StepStatus::Completed,
            }),
            Ok(StepOutcome::Skipped) => steps.push(StepReport {
                name: step.name,
                status: StepStatus::Skipped,
            }),
            Err(err) => {
                let rendered = format!("{:#}", err);
                steps.push(StepReport {
                    name: step.name,
                    status: StepStatus::Failed(rendered.clone()),
                });
                match step.criticality {
                    Criticality::Critical => {
                        eprintln!("[postcfg] FATAL: {}: {}", step.name, rendered);
                        critical_failure = Some((step.name, rendered));
                        for later in &plan[idx + 1..] {
                            steps.push(StepReport {
                                name: later.name,
                                status: StepStatus::NotRun,
                            });
                        }
                        break;
                    }
                    Criticality::BestEffort => {
                        eprintln!("[postcfg] WARN: {}: {}", step.name, rendered);
                    }
                }
            }
        }
    }

    RunReport {
        steps,
        critical_failure,
    }
}
