//! Vote ingestion: validate, admit through the dedup guard, count, then publish.

use tokio::time::{Instant, timeout_at};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    dao::storage::StorageError,
    dto::poll::PollSnapshot,
    error::ServiceError,
    services::{
        dedup_guard::{self, Registration},
        retry::RetryPolicy,
        tally,
    },
    state::AppState,
};

/// Outcome of an admitted and counted vote.
#[derive(Debug, Clone)]
pub struct AcceptedVote {
    pub vote_id: Uuid,
    pub poll_id: Uuid,
    pub option_id: Uuid,
    /// Count of the chosen option right after the increment.
    pub votes: u64,
    /// Post-vote snapshot, `None` if it could not be read after the vote committed.
    pub snapshot: Option<PollSnapshot>,
}

/// Cast one vote for `identity` on `poll_id`.
///
/// The ledger entry commits before the option count moves. Registration, increment and
/// tallying share one hard deadline (half the reconciler grace), so no live write is still in
/// flight once the reconciler may pick the entry up. If the increment misses it the vote
/// stays pending for the reconciler and [`ServiceError::InconsistentState`] is returned.
pub async fn submit_vote(
    state: &AppState,
    poll_id: Uuid,
    option_id: Uuid,
    identity: &str,
) -> Result<AcceptedVote, ServiceError> {
    let store = state.require_poll_store().await?;
    let retry = RetryPolicy::for_vote(state.config());

    if retry
        .run("load poll", || store.find_poll(poll_id))
        .await?
        .is_none()
    {
        return Err(ServiceError::InvalidPoll(poll_id));
    }
    if retry
        .run("load option", || store.find_option(poll_id, option_id))
        .await?
        .is_none()
    {
        return Err(ServiceError::InvalidOption { poll_id, option_id });
    }

    let deadline = Instant::now() + state.config().live_retry_deadline();

    let registration = timeout_at(
        deadline,
        dedup_guard::try_register(store.as_ref(), &retry, poll_id, identity, option_id),
    )
    .await
    .map_err(|elapsed| {
        StorageError::unavailable("vote registration timed out".into(), elapsed)
    })??;
    let record = match registration {
        Registration::Admitted(record) => record,
        Registration::AlreadyVoted(existing) => {
            info!(
                %poll_id,
                existing_vote_id = %existing.id,
                "duplicate vote rejected"
            );
            return Err(ServiceError::DuplicateVote { poll_id });
        }
    };
    let vote_id = record.id;

    let increment = timeout_at(
        deadline,
        tally::increment(store.as_ref(), &retry, poll_id, option_id, vote_id),
    )
    .await
    .unwrap_or_else(|elapsed| {
        Err(StorageError::unavailable(
            "increment deadline exceeded".into(),
            elapsed,
        ))
    });
    let votes = match increment {
        Ok(votes) => votes,
        Err(err) => {
            error!(
                %poll_id,
                %option_id,
                %vote_id,
                error = %err,
                "InconsistentState: vote recorded but increment failed; left pending for the reconciler"
            );
            return Err(ServiceError::InconsistentState {
                poll_id,
                option_id,
                vote_id,
            });
        }
    };

    if timeout_at(deadline, tally::mark_tallied(store.as_ref(), &retry, &record))
        .await
        .is_err()
    {
        warn!(%poll_id, %vote_id, "marking vote tallied timed out; reconciler will finish it");
    }

    let snapshot = match tally::get_snapshot(store.as_ref(), poll_id).await {
        Ok(snapshot) => {
            state.fanout().publish(snapshot.clone());
            Some(snapshot)
        }
        Err(err) => {
            warn!(%poll_id, %vote_id, error = %err, "vote counted but snapshot read failed");
            None
        }
    };

    info!(%poll_id, %option_id, %vote_id, votes, "vote accepted");
    Ok(AcceptedVote {
        vote_id,
        poll_id,
        option_id,
        votes,
        snapshot,
    })
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, atomic::Ordering},
        time::Duration,
    };

    use super::*;
    use crate::{
        config::AppConfig,
        dao::poll_store::{MemoryPollStore, PollStore},
        dto::poll::{CreatePollRequest, PollResponse},
        services::{provisioning_service, testing::FaultyStore},
        state::SharedState,
    };

    fn fast_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.vote_retry.max_attempts = 3;
        config.vote_retry.initial_delay = Duration::from_millis(1);
        config.vote_retry.max_delay = Duration::from_millis(2);
        config
    }

    async fn setup(store: Arc<dyn PollStore>, options: &[&str]) -> (SharedState, PollResponse) {
        let state = AppState::with_store(fast_config(), store).await;
        let poll = provisioning_service::create_poll(
            &state,
            CreatePollRequest {
                question: "Favourite colour?".into(),
                options: options.iter().map(|text| text.to_string()).collect(),
            },
        )
        .await
        .unwrap();
        (state, poll)
    }

    fn option_id(poll: &PollResponse, index: usize) -> Uuid {
        poll.snapshot.options[index].option_id
    }

    #[tokio::test]
    async fn second_vote_from_same_identity_is_a_duplicate() {
        let (state, poll) = setup(Arc::new(MemoryPollStore::new()), &["Red", "Blue"]).await;
        let red = option_id(&poll, 0);
        let blue = option_id(&poll, 1);

        let accepted = submit_vote(&state, poll.id, red, "203.0.113.7").await.unwrap();
        assert_eq!(accepted.votes, 1);
        let snapshot = accepted.snapshot.unwrap();
        assert_eq!(snapshot.votes_for(red), Some(1));
        assert_eq!(snapshot.votes_for(blue), Some(0));

        let err = submit_vote(&state, poll.id, blue, "203.0.113.7")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateVote { .. }));

        let store = state.require_poll_store().await.unwrap();
        let after = tally::get_snapshot(store.as_ref(), poll.id).await.unwrap();
        assert_eq!(after, snapshot);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn distinct_identities_all_count() {
        let (state, poll) = setup(Arc::new(MemoryPollStore::new()), &["Red", "Blue"]).await;
        let red = option_id(&poll, 0);
        let poll_id = poll.id;

        let tasks: Vec<_> = (0..100)
            .map(|voter| {
                let state = state.clone();
                tokio::spawn(async move {
                    submit_vote(&state, poll_id, red, &format!("10.0.0.{voter}")).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let store = state.require_poll_store().await.unwrap();
        let snapshot = tally::get_snapshot(store.as_ref(), poll.id).await.unwrap();
        assert_eq!(snapshot.votes_for(red), Some(100));
        assert_eq!(snapshot.total_votes, 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_votes_from_one_identity_admit_exactly_one() {
        let (state, poll) = setup(Arc::new(MemoryPollStore::new()), &["Red", "Blue"]).await;
        let poll_id = poll.id;

        let tasks: Vec<_> = (0..20)
            .map(|attempt| {
                let state = state.clone();
                let option = option_id(&poll, attempt % 2);
                tokio::spawn(async move { submit_vote(&state, poll_id, option, "198.51.100.1").await })
            })
            .collect();

        let mut accepted = 0;
        let mut duplicates = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(ServiceError::DuplicateVote { .. }) => duplicates += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(accepted, 1);
        assert_eq!(duplicates, 19);

        let store = state.require_poll_store().await.unwrap();
        let snapshot = tally::get_snapshot(store.as_ref(), poll.id).await.unwrap();
        assert_eq!(snapshot.total_votes, 1);
    }

    #[tokio::test]
    async fn option_from_another_poll_is_rejected_without_side_effects() {
        let store = Arc::new(MemoryPollStore::new());
        let (state, poll) = setup(store.clone(), &["Red", "Blue"]).await;
        let other = provisioning_service::create_poll(
            &state,
            CreatePollRequest {
                question: "Tea or coffee?".into(),
                options: vec!["Tea".into(), "Coffee".into()],
            },
        )
        .await
        .unwrap();

        let err = submit_vote(&state, poll.id, option_id(&other, 0), "10.1.1.1")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidOption { .. }));

        assert!(store.count_vote_records(poll.id).await.unwrap().is_empty());
        let snapshot = tally::get_snapshot(store.as_ref(), poll.id).await.unwrap();
        assert_eq!(snapshot.total_votes, 0);

        // The rejected identity can still vote properly.
        submit_vote(&state, poll.id, option_id(&poll, 1), "10.1.1.1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_poll_is_rejected() {
        let (state, poll) = setup(Arc::new(MemoryPollStore::new()), &["Red", "Blue"]).await;
        let err = submit_vote(&state, Uuid::new_v4(), option_id(&poll, 0), "10.1.1.1")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidPoll(_)));
    }

    #[tokio::test]
    async fn counts_match_the_ledger_after_mixed_traffic() {
        let store = Arc::new(MemoryPollStore::new());
        let (state, poll) = setup(store.clone(), &["Red", "Blue", "Green"]).await;

        for voter in 0..30 {
            let option = option_id(&poll, voter % 3);
            submit_vote(&state, poll.id, option, &format!("voter-{voter}"))
                .await
                .unwrap();
            // Every voter tries a second time.
            let _ = submit_vote(&state, poll.id, option_id(&poll, 0), &format!("voter-{voter}")).await;
        }

        let ledger = store.count_vote_records(poll.id).await.unwrap();
        for option in store.list_options(poll.id).await.unwrap() {
            assert_eq!(ledger.get(&option.id).copied().unwrap_or(0), option.votes);
            assert_eq!(option.votes, 10);
        }
    }

    #[tokio::test]
    async fn lost_register_response_is_recognised_as_own_admission() {
        let store = FaultyStore::default();
        store.faults.lose_register_responses.store(1, Ordering::SeqCst);
        let (state, poll) = setup(Arc::new(store.clone()), &["Red", "Blue"]).await;
        let red = option_id(&poll, 0);

        let accepted = submit_vote(&state, poll.id, red, "10.9.9.9").await.unwrap();
        assert_eq!(accepted.votes, 1);

        let err = submit_vote(&state, poll.id, red, "10.9.9.9").await.unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateVote { .. }));
        let snapshot = tally::get_snapshot(&store, poll.id).await.unwrap();
        assert_eq!(snapshot.votes_for(red), Some(1));
    }

    #[tokio::test]
    async fn transient_increment_failures_are_retried() {
        let store = FaultyStore::default();
        store.faults.fail_increments.store(2, Ordering::SeqCst);
        let (state, poll) = setup(Arc::new(store.clone()), &["Red", "Blue"]).await;

        let accepted = submit_vote(&state, poll.id, option_id(&poll, 0), "10.2.2.2")
            .await
            .unwrap();
        assert_eq!(accepted.votes, 1);
        assert_eq!(store.faults.increments_seen.load(Ordering::SeqCst), 3);

        let later = std::time::SystemTime::now() + Duration::from_secs(1);
        assert!(store.pending_vote_records(later, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn exhausted_increment_retries_leave_the_vote_pending() {
        let store = FaultyStore::default();
        store.faults.fail_increments.store(10, Ordering::SeqCst);
        let (state, poll) = setup(Arc::new(store.clone()), &["Red", "Blue"]).await;
        let red = option_id(&poll, 0);

        let err = submit_vote(&state, poll.id, red, "10.3.3.3").await.unwrap_err();
        let ServiceError::InconsistentState { vote_id, .. } = err else {
            panic!("expected inconsistent state");
        };

        let later = std::time::SystemTime::now() + Duration::from_secs(1);
        let pending = store.pending_vote_records(later, 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, vote_id);

        // The identity is already recorded, so a client retry cannot add a second vote.
        let retry = submit_vote(&state, poll.id, red, "10.3.3.3").await.unwrap_err();
        assert!(matches!(retry, ServiceError::DuplicateVote { .. }));
    }

    #[tokio::test]
    async fn snapshot_failure_after_commit_still_accepts() {
        let store = FaultyStore::default();
        let (state, poll) = setup(Arc::new(store.clone()), &["Red", "Blue"]).await;
        store.faults.fail_snapshots.store(true, Ordering::SeqCst);

        let accepted = submit_vote(&state, poll.id, option_id(&poll, 1), "10.4.4.4")
            .await
            .unwrap();
        assert_eq!(accepted.votes, 1);
        assert!(accepted.snapshot.is_none());
    }

    #[tokio::test]
    async fn accepted_votes_reach_live_subscribers() {
        let (state, poll) = setup(Arc::new(MemoryPollStore::new()), &["Red", "Blue"]).await;
        let red = option_id(&poll, 0);
        let mut subscription = state.fanout().subscribe(poll.id);

        submit_vote(&state, poll.id, red, "10.5.5.5").await.unwrap();

        let update = subscription.recv().await.unwrap();
        assert_eq!(update.votes_for(red), Some(1));
    }
}
