//! Provisioning driver
//!
//! Applies a [`RulePlan`] through an [`Executor`]: always clear first, then
//! the mandatory rules, then the best-effort optional rules, then the
//! interface jumps. No provisioning state is kept in memory; what exists is
//! whatever the kernel tables hold, addressed by chain name.
//!
//! Callers must serialize [`Provisioner::setup`] and [`Provisioner::cleanup`];
//! chain names are global and two interleaved sequences would corrupt each
//! other's ordering.

use crate::core::error::{Error, Result};
use crate::core::executor::Executor;
use crate::core::rules::{
    RulePlan, RuntimeParameters, Stage, Substitutions, cleanup_rules, format_command,
};
use std::fmt;
use tracing::{debug, error, info, warn};

/// Identifies one rule of a provisioning run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub stage: Stage,
    /// Zero-based position within the stage
    pub index: usize,
    /// Rendered command line
    pub command: String,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} step {} (`{}`)", self.stage, self.index + 1, self.command)
    }
}

/// Summary of a successful setup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupReport {
    /// Rules installed, across all stages
    pub applied: usize,
    /// Optional rules the kernel or ip6tables build refused
    pub skipped: Vec<Step>,
}

/// Installs and removes the FakeHTTP ip6tables chains.
pub struct Provisioner<E> {
    executor: E,
}

impl<E: Executor> Provisioner<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Clears any previous state and installs the full rule set.
    ///
    /// All values are rendered before the kernel is touched. On error the
    /// tables may be partially provisioned; call [`cleanup`](Self::cleanup)
    /// before retrying or exiting.
    ///
    /// # Errors
    ///
    /// - [`Error::Format`] if a parameter cannot be rendered (nothing is executed)
    /// - [`Error::Step`] for the first failing mandatory or interface rule
    pub async fn setup(&self, params: &RuntimeParameters) -> Result<SetupReport> {
        let plan = RulePlan::build(params).inspect_err(|e| error!("Cannot build rule set: {e}"))?;

        info!(
            "Provisioning ip6tables rules (mark {}, queue {})",
            plan.substitutions().xmark,
            plan.substitutions().queue_num
        );

        self.cleanup().await;

        let mut report = SetupReport {
            applied: self.apply_required(&plan, Stage::Mandatory).await?,
            skipped: Vec::new(),
        };

        for (index, spec) in plan.stage(Stage::Optional).iter().enumerate() {
            let args = plan.render(spec);
            let command = format_command(self.executor.program(), &args);

            let reason = match self.executor.execute(&args, true).await {
                Ok(status) if status.success => {
                    report.applied += 1;
                    continue;
                }
                Ok(status) => status.stderr,
                Err(e) => e.to_string(),
            };

            warn!("Optional rule unavailable, skipping `{command}`: {}", reason.trim());
            report.skipped.push(Step {
                stage: Stage::Optional,
                index,
                command,
            });
        }

        report.applied += self.apply_required(&plan, Stage::Interface).await?;

        info!(
            "ip6tables rules provisioned: {} applied, {} optional skipped",
            report.applied,
            report.skipped.len()
        );
        Ok(report)
    }

    /// Applies every rule of `stage` in order, stopping at the first failure.
    async fn apply_required(&self, plan: &RulePlan, stage: Stage) -> Result<usize> {
        let specs = plan.stage(stage);

        for (index, spec) in specs.iter().enumerate() {
            let args = plan.render(spec);
            let command = format_command(self.executor.program(), &args);

            // An unsuccessful status counts as a failure even if the executor returned Ok
            let outcome = self
                .executor
                .execute(&args, false)
                .await
                .and_then(|status| status.settle(command.clone(), false));

            if let Err(source) = outcome {
                let step = Step {
                    stage,
                    index,
                    command,
                };
                error!("{step} failed: {source}");
                return Err(Error::Step {
                    step,
                    source: Box::new(source),
                });
            }
        }

        debug!("Applied {} {stage} rule(s)", specs.len());
        Ok(specs.len())
    }

    /// Removes the FakeHTTP chains, whatever state they are in.
    ///
    /// Every failure is ignored, so this is safe to call when nothing was
    /// ever provisioned or a previous setup stopped halfway.
    pub async fn cleanup(&self) {
        debug!("Clearing ip6tables rules");

        let subst = Substitutions::default();
        let mut removed = 0;

        for spec in cleanup_rules() {
            let args = spec.render(&subst);
            match self.executor.execute(&args, true).await {
                Ok(status) if status.success => removed += 1,
                Ok(_) => {}
                Err(e) => debug!("Ignoring cleanup failure: {e}"),
            }
        }

        debug!("Cleanup finished ({removed} command(s) took effect)");
    }
}
