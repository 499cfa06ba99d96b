// =============================================================================
// Worker Loop — single-threaded cooperative driver of the whole pipeline
// =============================================================================
//
// One iteration, in order:
//   1. kill-switch check — when active, pop-and-drop one signal (bounds
//      outbox growth) and go back to sleep;
//   2. reconcile sweep — its errors never block the entry path;
//   3. optional decision-engine invocation appending a fresh signal;
//   4. pop one signal from the outbox;
//   5. execute it.
//
// Any error escaping an iteration is audited as WORKER_LOOP_ERROR and the
// loop continues. All state transitions are serialized by this loop; there is
// no intra-process parallelism.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::context::AppContext;
use crate::decision::DecisionEngine;
use crate::engine::{ExecutionController, ExecutionOutcome};
use crate::exchange::ExchangeApi;
use crate::reconcile::OcoReconciler;

pub struct Worker {
    ctx: AppContext,
    controller: ExecutionController,
    reconciler: OcoReconciler,
    generator: Option<Arc<dyn DecisionEngine>>,
}

impl Worker {
    pub fn new(
        ctx: AppContext,
        exchange: Arc<dyn ExchangeApi>,
        generator: Option<Arc<dyn DecisionEngine>>,
    ) -> Self {
        let controller = ExecutionController::new(&ctx, exchange.clone());
        let reconciler = OcoReconciler::new(ctx.config.clone(), ctx.store.clone(), exchange);
        Self {
            ctx,
            controller,
            reconciler,
            generator,
        }
    }

    /// Run forever. The caller decides when to stop (ctrl-c in the binary).
    pub async fn run(&self) {
        let sleep = Duration::from_secs_f64(self.ctx.config.loop_sleep_seconds);
        info!(sleep_seconds = self.ctx.config.loop_sleep_seconds, "worker loop started");

        loop {
            if let Err(e) = self.tick().await {
                error!(error = %e, "worker iteration failed");
                if let Err(audit_err) = self
                    .ctx
                    .store
                    .log_event("WORKER_LOOP_ERROR", &format!("err={e}"))
                    .await
                {
                    error!(error = %audit_err, "failed to audit worker loop error");
                }
            }
            tokio::time::sleep(sleep).await;
        }
    }

    /// One loop iteration. Public so tests can drive the cadence manually.
    pub async fn tick(&self) -> Result<()> {
        // 1. Back-pressure under the kill-switch: drop one queued signal per
        //    iteration so the outbox cannot grow without bound.
        if self.ctx.kill_switch.is_active().await {
            match self.ctx.outbox.pop_next() {
                Ok(Some(dropped)) => {
                    warn!(signal_id = %dropped.signal_id, "kill-switch active — signal dropped");
                    self.ctx
                        .store
                        .log_event(
                            "WORKER_KILL_SWITCH_DROP",
                            &format!("id={}", dropped.signal_id),
                        )
                        .await?;
                }
                Ok(None) => debug!("kill-switch active — outbox empty"),
                Err(e) => warn!(error = %e, "outbox pop failed under kill-switch"),
            }
            return Ok(());
        }

        // 2. Reconcile. Failures log only; the entry path still runs.
        if let Err(e) = self.reconciler.reconcile_once().await {
            warn!(error = %e, "reconcile sweep failed");
        }

        // 3. Generator (optional).
        if let Some(generator) = &self.generator {
            match generator.generate().await {
                Ok(Some(signal)) => match self.ctx.outbox.append(signal) {
                    Ok(true) => debug!("generated signal appended to outbox"),
                    Ok(false) => debug!("generated signal deduped at outbox"),
                    Err(e) => warn!(error = %e, "failed to append generated signal"),
                },
                Ok(None) => {}
                Err(e) => warn!(error = %e, "decision engine failed"),
            }
        }

        // 4 + 5. Pop one signal and execute it.
        let signal = self.ctx.outbox.pop_next()?;
        if let Some(signal) = signal {
            let outcome = self.controller.execute_signal(&signal).await;
            match &outcome {
                ExecutionOutcome::Done | ExecutionOutcome::Deduped => {
                    info!(signal_id = %signal.signal_id, outcome = %outcome, "signal processed");
                }
                ExecutionOutcome::Blocked(_) | ExecutionOutcome::Rejected(_) => {
                    warn!(signal_id = %signal.signal_id, outcome = %outcome, "signal refused");
                }
                ExecutionOutcome::Failsafe(_) | ExecutionOutcome::Error(_) => {
                    error!(signal_id = %signal.signal_id, outcome = %outcome, "signal failed");
                }
            }
        } else {
            debug!("outbox empty");
        }

        Ok(())
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("generator", &self.generator.is_some())
            .finish_non_exhaustive()
    }
}
