//! Per-poll broadcast topics carrying tally snapshots to live viewers.
//!
//! Every poll with at least one subscriber owns its own topic; there is no global channel.
//! Topics only exist while someone listens: publishing to a poll without a topic returns
//! immediately and the last [`Subscription`] to drop removes its topic.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use dashmap::DashMap;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;
use uuid::Uuid;

use crate::dto::poll::PollSnapshot;

/// Registry of per-poll topics. Cloning shares the same registry.
#[derive(Clone)]
pub struct FanoutBroker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    topics: DashMap<Uuid, PollTopic>,
    capacity: usize,
}

struct PollTopic {
    sender: broadcast::Sender<PollSnapshot>,
    /// Highest count sent so far per option. Sends happen while holding this lock so the
    /// channel order matches the merge order.
    high_water: Mutex<HashMap<Uuid, u64>>,
}

impl PollTopic {
    fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self {
            sender,
            high_water: Mutex::new(HashMap::new()),
        }
    }
}

impl FanoutBroker {
    /// Create a broker whose topics buffer up to `capacity` snapshots per subscriber.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                topics: DashMap::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Join the live stream of a poll. Only snapshots published after this call are received.
    pub fn subscribe(&self, poll_id: Uuid) -> Subscription {
        // The entry guard holds the shard lock, which keeps this atomic with topic removal.
        let receiver = self
            .inner
            .topics
            .entry(poll_id)
            .or_insert_with(|| PollTopic::new(self.inner.capacity))
            .sender
            .subscribe();

        debug!(%poll_id, "live subscriber joined");
        Subscription {
            poll_id,
            receiver: Some(receiver),
            broker: self.clone(),
        }
    }

    /// Deliver a snapshot to every current subscriber of its poll.
    ///
    /// Counts are merged against the topic's high-water marks first, so a stale snapshot
    /// from a slower publisher can never roll a count back. Returns the number of
    /// subscribers that were handed the snapshot.
    pub fn publish(&self, snapshot: PollSnapshot) -> usize {
        let Some(topic) = self.inner.topics.get(&snapshot.poll_id) else {
            return 0;
        };

        let mut high_water = topic
            .high_water
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let merged = merge_high_water(&mut high_water, snapshot);
        topic.sender.send(merged).unwrap_or(0)
    }

    /// Number of polls that currently have a topic.
    pub fn topic_count(&self) -> usize {
        self.inner.topics.len()
    }

    /// Number of live subscribers of a poll.
    pub fn subscriber_count(&self, poll_id: Uuid) -> usize {
        self.inner
            .topics
            .get(&poll_id)
            .map(|topic| topic.sender.receiver_count())
            .unwrap_or(0)
    }

    fn release(&self, poll_id: Uuid) {
        let removed = self
            .inner
            .topics
            .remove_if(&poll_id, |_, topic| topic.sender.receiver_count() == 0);
        if removed.is_some() {
            debug!(%poll_id, "last live subscriber left; topic removed");
        }
    }
}

/// Raise every option count to at least its recorded high-water mark and record the result.
fn merge_high_water(high_water: &mut HashMap<Uuid, u64>, mut snapshot: PollSnapshot) -> PollSnapshot {
    for option in &mut snapshot.options {
        let mark = high_water.entry(option.option_id).or_insert(0);
        option.votes = option.votes.max(*mark);
        *mark = option.votes;
    }
    snapshot.recompute_total();
    snapshot
}

/// Handle on a poll's live stream. Dropping it unsubscribes.
pub struct Subscription {
    poll_id: Uuid,
    receiver: Option<broadcast::Receiver<PollSnapshot>>,
    broker: FanoutBroker,
}

impl Subscription {
    pub fn poll_id(&self) -> Uuid {
        self.poll_id
    }

    /// Wait for the next published snapshot. Snapshots missed by a lagging receiver are
    /// skipped. Returns `None` once the topic is gone.
    pub async fn recv(&mut self) -> Option<PollSnapshot> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(snapshot) => return Some(snapshot),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(poll_id = %self.poll_id, skipped, "live subscriber lagged; skipping");
                    continue;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Receiver first, so the topic sees its receiver count drop before the removal check.
        drop(self.receiver.take());
        self.broker.release(self.poll_id);
    }
}

/// Per-subscriber guard that only lets counts move forward.
///
/// Seeded from the snapshot a subscriber was given on connect; snapshots published between
/// subscribing and that read may be older and are raised to the seen counts.
#[derive(Debug, Clone, Default)]
pub struct MonotonicFilter {
    seen: HashMap<Uuid, u64>,
}

impl MonotonicFilter {
    pub fn seeded(initial: &PollSnapshot) -> Self {
        Self {
            seen: initial
                .options
                .iter()
                .map(|option| (option.option_id, option.votes))
                .collect(),
        }
    }

    /// Merge `snapshot` into the seen counts. Returns the merged snapshot when at least one
    /// count moved forward, `None` when it carries nothing new.
    pub fn apply(&mut self, mut snapshot: PollSnapshot) -> Option<PollSnapshot> {
        let mut advanced = false;
        for option in &mut snapshot.options {
            let seen = self.seen.entry(option.option_id).or_insert(0);
            if option.votes > *seen {
                *seen = option.votes;
                advanced = true;
            } else {
                option.votes = *seen;
            }
        }
        if !advanced {
            return None;
        }
        snapshot.recompute_total();
        Some(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::dto::poll::OptionTally;

    fn snapshot(poll_id: Uuid, counts: &[(Uuid, u64)]) -> PollSnapshot {
        let mut snapshot = PollSnapshot {
            poll_id,
            options: counts
                .iter()
                .map(|(option_id, votes)| OptionTally {
                    option_id: *option_id,
                    text: option_id.to_string(),
                    votes: *votes,
                })
                .collect(),
            total_votes: 0,
        };
        snapshot.recompute_total();
        snapshot
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_no_op() {
        let broker = FanoutBroker::new(8);
        let poll_id = Uuid::new_v4();
        assert_eq!(broker.publish(snapshot(poll_id, &[(Uuid::new_v4(), 1)])), 0);
        assert_eq!(broker.topic_count(), 0);
    }

    #[tokio::test]
    async fn stale_snapshot_never_rolls_back_a_count() {
        let broker = FanoutBroker::new(8);
        let poll_id = Uuid::new_v4();
        let red = Uuid::new_v4();
        let blue = Uuid::new_v4();
        let mut subscription = broker.subscribe(poll_id);

        broker.publish(snapshot(poll_id, &[(red, 4), (blue, 1)]));
        broker.publish(snapshot(poll_id, &[(red, 3), (blue, 2)]));

        let first = subscription.recv().await.unwrap();
        let second = subscription.recv().await.unwrap();
        assert_eq!(first.votes_for(red), Some(4));
        assert_eq!(second.votes_for(red), Some(4));
        assert_eq!(second.votes_for(blue), Some(2));
        assert_eq!(second.total_votes, 6);
    }

    #[tokio::test]
    async fn last_subscriber_leaving_removes_the_topic() {
        let broker = FanoutBroker::new(8);
        let poll_id = Uuid::new_v4();

        let first = broker.subscribe(poll_id);
        let second = broker.subscribe(poll_id);
        assert_eq!(broker.subscriber_count(poll_id), 2);

        drop(first);
        assert_eq!(broker.topic_count(), 1);
        drop(second);
        assert_eq!(broker.topic_count(), 0);
    }

    #[tokio::test]
    async fn topics_are_independent() {
        let broker = FanoutBroker::new(8);
        let poll_a = Uuid::new_v4();
        let poll_b = Uuid::new_v4();
        let mut sub_a = broker.subscribe(poll_a);
        let _sub_b = broker.subscribe(poll_b);

        assert_eq!(broker.publish(snapshot(poll_b, &[(Uuid::new_v4(), 1)])), 1);
        let option = Uuid::new_v4();
        broker.publish(snapshot(poll_a, &[(option, 7)]));

        let received = sub_a.recv().await.unwrap();
        assert_eq!(received.poll_id, poll_a);
        assert_eq!(received.votes_for(option), Some(7));
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_to_recent_snapshots() {
        let broker = FanoutBroker::new(2);
        let poll_id = Uuid::new_v4();
        let option = Uuid::new_v4();
        let mut subscription = broker.subscribe(poll_id);

        for votes in 1..=5 {
            broker.publish(snapshot(poll_id, &[(option, votes)]));
        }

        let received = subscription.recv().await.unwrap();
        assert!(received.votes_for(option).unwrap() >= 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_publishers_never_roll_counts_back() {
        const PUBLISHERS: u64 = 8;
        const ROUNDS: u64 = 100;

        let broker = FanoutBroker::new(4096);
        let poll_id = Uuid::new_v4();
        let red = Uuid::new_v4();
        let blue = Uuid::new_v4();
        let mut subscription = broker.subscribe(poll_id);

        let publishers: Vec<_> = (0..PUBLISHERS)
            .map(|publisher| {
                let broker = broker.clone();
                tokio::spawn(async move {
                    for round in 0..ROUNDS {
                        // Every other snapshot is a stale read from a slow publisher.
                        let lag = if round % 2 == 0 { 0 } else { publisher + 3 };
                        let red_votes = round.saturating_sub(lag);
                        let blue_votes = (round * PUBLISHERS + publisher).saturating_sub(lag * 2);
                        let counts = [(red, red_votes), (blue, blue_votes)];
                        broker.publish(snapshot(poll_id, &counts));
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for publisher in publishers {
            publisher.await.unwrap();
        }

        let mut last_red = 0;
        let mut last_blue = 0;
        let mut received = 0;
        while let Ok(Some(update)) =
            timeout(Duration::from_millis(200), subscription.recv()).await
        {
            let red_votes = update.votes_for(red).unwrap();
            let blue_votes = update.votes_for(blue).unwrap();
            assert!(red_votes >= last_red, "red went from {last_red} to {red_votes}");
            assert!(blue_votes >= last_blue, "blue went from {last_blue} to {blue_votes}");
            assert_eq!(update.total_votes, red_votes + blue_votes);
            last_red = red_votes;
            last_blue = blue_votes;
            received += 1;
        }

        assert_eq!(received, PUBLISHERS * ROUNDS);
        assert_eq!(last_red, ROUNDS - 2);
        assert_eq!(last_blue, (ROUNDS - 2) * PUBLISHERS + PUBLISHERS - 1);
    }

    #[test]
    fn filter_holds_seeded_counts() {
        let poll_id = Uuid::new_v4();
        let option = Uuid::new_v4();
        let mut filter = MonotonicFilter::seeded(&snapshot(poll_id, &[(option, 3)]));

        assert!(filter.apply(snapshot(poll_id, &[(option, 2)])).is_none());
        assert!(filter.apply(snapshot(poll_id, &[(option, 3)])).is_none());
        let next = filter.apply(snapshot(poll_id, &[(option, 4)])).unwrap();
        assert_eq!(next.votes_for(option), Some(4));
    }
}
