//! Run state machine transitions.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use engine_db::models::RunStatus;
use engine_db::queries::runs as db;

/// The run state machine.
///
/// Enforces the valid transition graph:
///
/// ```text
/// created   -> planning | cancelled
/// planning  -> running  | failed  | cancelled
/// running   -> completed| failed  | cancelled | paused
/// paused    -> running  | cancelled
/// completed -> (none)
/// failed    -> running            (operator-initiated retry)
/// cancelled -> created            (operator-initiated restart)
/// ```
pub struct RunStateMachine;

impl RunStateMachine {
    /// Check whether a transition from `from` to `to` is a valid edge in the
    /// state graph.
    pub fn is_valid_transition(from: RunStatus, to: RunStatus) -> bool {
        matches!(
            (from, to),
            (RunStatus::Created, RunStatus::Planning)
                | (RunStatus::Created, RunStatus::Cancelled)
                | (RunStatus::Planning, RunStatus::Running)
                | (RunStatus::Planning, RunStatus::Failed)
                | (RunStatus::Planning, RunStatus::Cancelled)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Failed)
                | (RunStatus::Running, RunStatus::Cancelled)
                | (RunStatus::Running, RunStatus::Paused)
                | (RunStatus::Paused, RunStatus::Running)
                | (RunStatus::Paused, RunStatus::Cancelled)
                | (RunStatus::Failed, RunStatus::Running)
                | (RunStatus::Cancelled, RunStatus::Created)
        )
    }

    /// Execute a state transition with optimistic locking.
    ///
    /// - Stamps `started_at` on entry to `running`.
    /// - Stamps `completed_at` on entry to any terminal state
    ///   (`completed`/`failed`/`cancelled`).
    /// - Any transition to `failed` stamps `error` -- the spec resolves the
    ///   source's inconsistency here by requiring this unconditionally, not
    ///   only on the scheduler's own failure path.
    /// - A transition to `cancelled` records `cancellation_reason` when one
    ///   is supplied.
    pub async fn transition(
        pool: &PgPool,
        run_id: Uuid,
        from: RunStatus,
        to: RunStatus,
        error: Option<&str>,
        cancellation_reason: Option<&str>,
    ) -> Result<()> {
        if !Self::is_valid_transition(from, to) {
            bail!(
                "invalid state transition: {} -> {} for run {}",
                from,
                to,
                run_id
            );
        }

        let started_at = (to == RunStatus::Running).then(Utc::now);
        let completed_at = to.is_terminal().then(Utc::now);

        let error = if to == RunStatus::Failed {
            Some(error.unwrap_or("run failed"))
        } else {
            error
        };

        let rows = db::transition_run_status(
            pool,
            run_id,
            from,
            to,
            started_at,
            completed_at,
            error,
            cancellation_reason,
        )
        .await
        .with_context(|| format!("failed to transition run {run_id} from {from} to {to}"))?;

        if rows == 0 {
            let run = db::get_run(pool, run_id).await?;
            match run {
                None => bail!("run {run_id} not found"),
                Some(r) => bail!(
                    "optimistic lock failed: run {run_id} has status {}, expected {from}",
                    r.status
                ),
            }
        }

        Ok(())
    }
}
