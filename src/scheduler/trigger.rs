//! Runtime triggers.
//!
//! Each enabled task owns one spawned trigger loop. The loop holds a weak
//! reference to the scheduler so a dropped scheduler ends it, and a
//! [`CancellationToken`] so stopping it interrupts the pending sleep.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use super::engine::Inner;
use crate::core::schedule::Schedule;
use crate::core::types::TaskId;
use crate::storage::Storage;

/// Registry entry for a live trigger.
pub(crate) struct Trigger {
    pub(crate) generation: u64,
    token: CancellationToken,
}

impl Trigger {
    /// Cancel the trigger loop. Executions it already started keep running.
    pub(crate) fn stop(&self) {
        self.token.cancel();
    }
}

/// Spawn the loop for a validated schedule.
pub(crate) fn spawn<S: Storage + 'static>(
    inner: &Arc<Inner<S>>,
    task_id: TaskId,
    schedule: Schedule,
    generation: u64,
) -> Trigger {
    let token = CancellationToken::new();
    let weak = Arc::downgrade(inner);
    let child = token.clone();

    tokio::spawn(async move {
        match schedule {
            Schedule::Cron(_) => run_cron(weak, task_id, schedule, child).await,
            Schedule::Once(at) => run_once(weak, task_id, at, generation, child).await,
            Schedule::Interval(period) => run_interval(weak, task_id, period, child).await,
        }
    });

    Trigger { generation, token }
}

fn until(target: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (target - now).to_std().unwrap_or(Duration::ZERO)
}

/// Fire at every matching tick. Ticks that pass while the process is not
/// waiting are not replayed.
async fn run_cron<S: Storage + 'static>(
    weak: Weak<Inner<S>>,
    task_id: TaskId,
    schedule: Schedule,
    token: CancellationToken,
) {
    let mut last_tick: Option<DateTime<Utc>> = None;

    loop {
        let wait = {
            let Some(inner) = weak.upgrade() else { return };
            let now = inner.clock.now();
            let after = last_tick.map_or(now, |tick| tick.max(now));
            let Some(next) = schedule.next_after(after) else {
                tracing::warn!(task_id = %task_id, "Cron schedule has no further occurrences");
                return;
            };
            inner.record_next_run(&task_id, Some(next), &token).await;
            tracing::debug!(task_id = %task_id, next_run = %next, "Cron trigger armed");
            last_tick = Some(next);
            until(next, now)
        };

        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }

        let (Some(inner), Some(tick)) = (weak.upgrade(), last_tick) else {
            return;
        };
        inner.fire(&task_id, tick).await;
    }
}

/// Fire once at `at`, then disable the task.
async fn run_once<S: Storage + 'static>(
    weak: Weak<Inner<S>>,
    task_id: TaskId,
    at: DateTime<Utc>,
    generation: u64,
    token: CancellationToken,
) {
    let wait = {
        let Some(inner) = weak.upgrade() else { return };
        inner.record_next_run(&task_id, Some(at), &token).await;
        until(at, inner.clock.now())
    };

    tokio::select! {
        _ = token.cancelled() => return,
        _ = tokio::time::sleep(wait) => {}
    }

    let Some(inner) = weak.upgrade() else { return };
    if let Some(outcome) = inner.fire(&task_id, at).await {
        // Retries of this firing must still see the task enabled
        let _ = outcome.await;
    }
    inner.complete_once(&task_id, generation).await;
}

/// Fire every `period`, measured from registration. A late tick delays the
/// following ones instead of bursting.
async fn run_interval<S: Storage + 'static>(
    weak: Weak<Inner<S>>,
    task_id: TaskId,
    period: Duration,
    token: CancellationToken,
) {
    let Ok(step) = chrono::Duration::from_std(period) else {
        return;
    };
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        {
            let Some(inner) = weak.upgrade() else { return };
            let next = inner.clock.now().checked_add_signed(step);
            inner.record_next_run(&task_id, next, &token).await;
        }

        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let Some(inner) = weak.upgrade() else { return };
        let fired_at = inner.clock.now();
        tracing::debug!(task_id = %task_id, "Interval trigger fired");
        inner.fire(&task_id, fired_at).await;
    }
}
