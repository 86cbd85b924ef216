//! Background repair of ledger entries whose increment never completed.
//!
//! A vote can be admitted and then lose its increment to a crash or an outage that outlasts
//! the live retry budget. Such entries stay `tallied = false`; once older than the grace
//! period they are replayed here. Increments are receipt-guarded, so replaying an entry whose
//! increment did land is a no-op.
//!
//! Receipts are the only thing stopping a late write from counting twice, so they are kept
//! until the entry is tallied and older than [`AppConfig::receipt_release_horizon`]. By then
//! every live or replayed increment for it has been abandoned. A second sweep drops them.
//!
//! [`AppConfig::receipt_release_horizon`]: crate::config::AppConfig::receipt_release_horizon

use std::{
    collections::BTreeSet,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        poll_store::PollStore,
        storage::{StorageError, StorageResult},
    },
    services::{retry::RetryPolicy, tally},
    state::{AppState, SharedState},
};

const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Difference between an option's count and the ledger entries choosing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TallyDrift {
    pub option_id: Uuid,
    /// Votes applied to the option.
    pub counted: u64,
    /// Ledger entries that chose the option.
    pub recorded: u64,
}

/// Periodically replay stale pending ledger entries and release old receipts while storage
/// is available.
pub async fn run(state: SharedState) {
    let period = state.config().reconciler.interval.max(MIN_INTERVAL);
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Ok(store) = state.require_poll_store().await else {
            continue;
        };
        match reconcile_pending(&state, store.as_ref()).await {
            Ok(0) => {}
            Ok(repaired) => info!(repaired, "reconciled pending votes"),
            Err(err) => warn!(error = %err, "failed to list pending votes"),
        }
        match release_receipts(&state, store.as_ref()).await {
            Ok(0) => {}
            Ok(released) => info!(released, "released tally receipts"),
            Err(err) => warn!(error = %err, "failed to list settled votes"),
        }
    }
}

/// Replay one batch of pending entries older than the grace period and publish the
/// refreshed snapshots of every poll touched. Returns how many entries were marked tallied.
///
/// Each replayed increment is abandoned after the live retry deadline, like a live one.
pub async fn reconcile_pending(state: &AppState, store: &dyn PollStore) -> StorageResult<usize> {
    let settings = &state.config().reconciler;
    let attempt_limit = state.config().live_retry_deadline();
    let cutoff = SystemTime::now()
        .checked_sub(settings.grace)
        .unwrap_or(UNIX_EPOCH);
    let pending = store
        .pending_vote_records(cutoff, settings.batch_size)
        .await?;
    if pending.is_empty() {
        return Ok(0);
    }

    // Single attempt per step; the next sweep is the retry.
    let retry = RetryPolicy::new(1, Duration::ZERO, Duration::ZERO, Duration::ZERO);
    let mut repaired = 0;
    let mut touched = BTreeSet::new();

    for record in pending {
        let increment = timeout(
            attempt_limit,
            store.increment_option(record.poll_id, record.option_id, record.id),
        )
        .await
        .unwrap_or_else(|elapsed| {
            Err(StorageError::unavailable(
                "replayed increment timed out".into(),
                elapsed,
            ))
        });
        match increment {
            Ok(votes) => {
                touched.insert(record.poll_id);
                if tally::mark_tallied(store, &retry, &record).await {
                    repaired += 1;
                    info!(
                        poll_id = %record.poll_id,
                        option_id = %record.option_id,
                        vote_id = %record.id,
                        votes,
                        "pending vote applied"
                    );
                }
            }
            Err(err) => warn!(
                poll_id = %record.poll_id,
                option_id = %record.option_id,
                vote_id = %record.id,
                error = %err,
                "pending vote still cannot be applied"
            ),
        }
    }

    for poll_id in touched {
        match tally::get_snapshot(store, poll_id).await {
            Ok(snapshot) => {
                state.fanout().publish(snapshot);
            }
            Err(err) => warn!(%poll_id, error = %err, "failed to refresh snapshot after repair"),
        }
        match audit_poll(store, poll_id).await {
            Ok(drift) if drift.is_empty() => {}
            Ok(drift) => error!(%poll_id, ?drift, "option counts disagree with the vote ledger"),
            Err(err) => warn!(%poll_id, error = %err, "failed to audit poll counts"),
        }
    }

    Ok(repaired)
}

/// Drop the tally receipts of one batch of tallied entries older than the release horizon.
/// Returns how many receipts were released.
pub async fn release_receipts(state: &AppState, store: &dyn PollStore) -> StorageResult<usize> {
    let cutoff = SystemTime::now()
        .checked_sub(state.config().receipt_release_horizon())
        .unwrap_or(UNIX_EPOCH);
    let settled = store
        .settled_vote_records(cutoff, state.config().reconciler.batch_size)
        .await?;

    let mut released = 0;
    for record in settled {
        match tally::release_receipt(store, &record).await {
            Ok(()) => released += 1,
            Err(err) => warn!(
                poll_id = %record.poll_id,
                vote_id = %record.id,
                error = %err,
                "failed to release tally receipt"
            ),
        }
    }
    Ok(released)
}

/// Compare every option count of a poll with the ledger. Entries still pending show up as
/// drift until they are reconciled.
pub async fn audit_poll(store: &dyn PollStore, poll_id: Uuid) -> StorageResult<Vec<TallyDrift>> {
    let recorded = store.count_vote_records(poll_id).await?;
    let options = store.list_options(poll_id).await?;

    Ok(options
        .into_iter()
        .filter_map(|option| {
            let recorded = recorded.get(&option.id).copied().unwrap_or(0);
            (recorded != option.votes).then_some(TallyDrift {
                option_id: option.id,
                counted: option.votes,
                recorded,
            })
        })
        .collect())
}
