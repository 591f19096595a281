use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use dashmap::{mapref::entry::Entry, DashMap};
use metrics::counter;
use parking_lot::Mutex;
use slab::Slab;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_CHANNEL: &str = "default";
pub const MAX_CHANNEL_LEN: usize = 128;
const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    #[error("channel name must not be empty")]
    EmptyChannel,
    #[error("channel name exceeds 128 bytes")]
    ChannelTooLong,
    #[error("channel name contains control or whitespace characters")]
    InvalidChannel,
}

/// Checks that `channel` is usable as a channel key.
pub fn validate_channel(channel: &str) -> Result<&str, HubError> {
    if channel.is_empty() {
        return Err(HubError::EmptyChannel);
    }
    if channel.len() > MAX_CHANNEL_LEN {
        return Err(HubError::ChannelTooLong);
    }
    if channel
        .chars()
        .any(|c| c.is_control() || c.is_whitespace())
    {
        return Err(HubError::InvalidChannel);
    }
    Ok(channel)
}

pub type SubscriberId = Uuid;

/// One published line, shared by every subscriber it is queued for.
pub type LogLine = Arc<str>;

/// Channel-scoped fan-out of log lines.
///
/// Cheap to clone; every clone addresses the same registry. Channels spring
/// into existence on first subscribe and are dropped once their last
/// subscriber leaves.
#[derive(Clone)]
pub struct ChannelHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    channels: DashMap<String, Arc<ChannelState>>,
    memberships: DashMap<SubscriberId, String>,
    config: HubConfig,
    next_seq: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Lines queued per subscriber before further lines are dropped for it.
    pub per_subscriber_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            per_subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
        }
    }
}

pub struct Subscription {
    pub receiver: mpsc::Receiver<LogLine>,
    pub channel_subscribers: usize,
    pub active_channels: usize,
}

pub struct Removal {
    /// Channel the subscriber was removed from, if it was registered at all.
    pub channel: Option<String>,
    pub channel_subscribers: usize,
    pub active_channels: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub bytes: usize,
    pub dropped: usize,
    pub closed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub channel: String,
    pub subscribers: usize,
}

impl ChannelHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            inner: Arc::new(HubInner {
                channels: DashMap::new(),
                memberships: DashMap::new(),
                config,
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Registers `subscriber` on `channel` and hands back the receiving end
    /// of its queue. Subscribing an id that is already registered replaces
    /// its previous registration, so an id is never delivered to twice.
    pub fn subscribe(&self, channel: &str, subscriber: SubscriberId) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.config.per_subscriber_buffer.max(1));

        let previous = self
            .inner
            .memberships
            .get(&subscriber)
            .map(|entry| entry.value().clone());
        if let Some(previous) = previous {
            if previous != channel {
                self.unsubscribe(subscriber);
            }
        }

        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let channel_subscribers = loop {
            let state = match self.inner.channels.entry(channel.to_string()) {
                Entry::Occupied(entry) => Arc::clone(entry.get()),
                Entry::Vacant(entry) => {
                    let state = Arc::new(ChannelState::new(channel));
                    entry.insert(Arc::clone(&state));
                    debug!(channel, "channel created");
                    state
                }
            };

            if let Some(count) = state.add_subscriber(subscriber, seq, tx.clone()) {
                break count;
            }
            // Emptied by a concurrent unsubscribe; clear it out and start over.
            self.inner
                .channels
                .remove_if(channel, |_, current| Arc::ptr_eq(current, &state));
        };
        self.inner
            .memberships
            .insert(subscriber, channel.to_string());

        Subscription {
            receiver: rx,
            channel_subscribers,
            active_channels: self.inner.channels.len(),
        }
    }

    /// Removes `subscriber` from whatever channel it joined. Unknown ids are
    /// ignored.
    pub fn unsubscribe(&self, subscriber: SubscriberId) -> Removal {
        let Some((_, channel)) = self.inner.memberships.remove(&subscriber) else {
            return Removal {
                channel: None,
                channel_subscribers: 0,
                active_channels: self.inner.channels.len(),
            };
        };

        let channel_subscribers = self.detach(&channel, subscriber, None, || {});
        Removal {
            channel: Some(channel),
            channel_subscribers,
            active_channels: self.inner.channels.len(),
        }
    }

    /// Queues `line` for every current subscriber of `channel`, in the order
    /// they subscribed. Publishing to a channel nobody listens on is a no-op.
    pub fn publish(&self, channel: &str, line: &str) -> PublishReport {
        let Some(state) = self
            .inner
            .channels
            .get(channel)
            .map(|entry| Arc::clone(entry.value()))
        else {
            return PublishReport::default();
        };

        let line: LogLine = Arc::from(line);
        let mut report = PublishReport::default();
        for target in state.targets() {
            match target.sender.try_send(Arc::clone(&line)) {
                Ok(()) => {
                    report.delivered += 1;
                    report.bytes += line.len();
                }
                Err(TrySendError::Full(_)) => {
                    report.dropped += 1;
                    counter!(
                        "beach_logbook_subscriber_drops_total",
                        1,
                        "channel" => channel.to_string()
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    report.closed += 1;
                    self.evict(channel, &target);
                }
            }
        }

        report
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .channels
            .get(channel)
            .map(|entry| Arc::clone(entry.value()))
            .map(|state| state.len())
            .unwrap_or(0)
    }

    pub fn channel_of(&self, subscriber: SubscriberId) -> Option<String> {
        self.inner
            .memberships
            .get(&subscriber)
            .map(|entry| entry.value().clone())
    }

    pub fn snapshot(&self) -> Vec<ChannelSnapshot> {
        let states: Vec<Arc<ChannelState>> = self
            .inner
            .channels
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut snapshots: Vec<ChannelSnapshot> = states
            .into_iter()
            .map(|state| ChannelSnapshot {
                channel: state.name.clone(),
                subscribers: state.len(),
            })
            .filter(|snapshot| snapshot.subscribers > 0)
            .collect();
        snapshots.sort_by(|a, b| a.channel.cmp(&b.channel));
        snapshots
    }

    /// Drops a registration whose queue was found closed. A subscriber that
    /// re-subscribed since `target` was taken keeps both its queue and its
    /// membership.
    fn evict(&self, channel: &str, target: &Target) {
        let memberships = &self.inner.memberships;
        let mut evicted = false;
        self.detach(channel, target.id, Some(&target.sender), || {
            memberships.remove_if(&target.id, |_, joined| joined == channel);
            evicted = true;
        });
        if evicted {
            debug!(channel, subscriber = %target.id, "evicted closed subscriber");
            counter!(
                "beach_logbook_subscribers_evicted_total",
                1,
                "channel" => channel.to_string()
            );
        }
    }

    /// Drops `subscriber` from `channel` and retires the channel if that
    /// emptied it. With `sender`, only a registration still using that queue
    /// is removed. `on_removed` runs under the channel lock, and only if an
    /// entry was actually removed.
    fn detach(
        &self,
        channel: &str,
        subscriber: SubscriberId,
        sender: Option<&mpsc::Sender<LogLine>>,
        on_removed: impl FnOnce(),
    ) -> usize {
        let Some(state) = self
            .inner
            .channels
            .get(channel)
            .map(|entry| Arc::clone(entry.value()))
        else {
            return 0;
        };

        let (remaining, retired) = state.remove_subscriber(subscriber, sender, on_removed);
        if retired {
            self.inner
                .channels
                .remove_if(channel, |_, current| Arc::ptr_eq(current, &state));
            debug!(channel, "channel emptied");
        }
        remaining
    }
}

impl Default for ChannelHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

struct ChannelState {
    name: String,
    inner: Mutex<ChannelStateInner>,
}

struct ChannelStateInner {
    slab: Slab<SubscriberEntry>,
    index_map: HashMap<SubscriberId, usize>,
    retired: bool,
}

struct SubscriberEntry {
    id: SubscriberId,
    seq: u64,
    sender: mpsc::Sender<LogLine>,
}

struct Target {
    id: SubscriberId,
    sender: mpsc::Sender<LogLine>,
}

impl ChannelState {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inner: Mutex::new(ChannelStateInner {
                slab: Slab::new(),
                index_map: HashMap::new(),
                retired: false,
            }),
        }
    }

    /// Returns the subscriber count, or `None` if the channel was retired.
    fn add_subscriber(
        &self,
        id: SubscriberId,
        seq: u64,
        sender: mpsc::Sender<LogLine>,
    ) -> Option<usize> {
        let mut guard = self.inner.lock();
        if guard.retired {
            return None;
        }
        if let Some(index) = guard.index_map.get(&id).copied() {
            // Same subscriber again: swap the queue, keep its position.
            if let Some(entry) = guard.slab.get_mut(index) {
                entry.sender = sender;
                return Some(guard.slab.len());
            }
        }
        let key = guard.slab.insert(SubscriberEntry { id, seq, sender });
        guard.index_map.insert(id, key);
        Some(guard.slab.len())
    }

    fn remove_subscriber(
        &self,
        id: SubscriberId,
        sender: Option<&mpsc::Sender<LogLine>>,
        on_removed: impl FnOnce(),
    ) -> (usize, bool) {
        let mut guard = self.inner.lock();
        if let Some(index) = guard.index_map.get(&id).copied() {
            let matches = sender.map_or(true, |sender| {
                guard
                    .slab
                    .get(index)
                    .is_some_and(|entry| entry.sender.same_channel(sender))
            });
            if matches {
                guard.index_map.remove(&id);
                guard.slab.remove(index);
                on_removed();
            }
        }
        let remaining = guard.slab.len();
        if remaining == 0 {
            guard.retired = true;
        }
        (remaining, guard.retired)
    }

    fn targets(&self) -> Vec<Target> {
        let guard = self.inner.lock();
        let mut ordered: Vec<(u64, Target)> = guard
            .slab
            .iter()
            .map(|(_, entry)| {
                (
                    entry.seq,
                    Target {
                        id: entry.id,
                        sender: entry.sender.clone(),
                    },
                )
            })
            .collect();
        drop(guard);
        // Slab slots get reused, so slot order is not subscription order.
        ordered.sort_by_key(|(seq, _)| *seq);
        ordered.into_iter().map(|(_, target)| target).collect()
    }

    fn len(&self) -> usize {
        self.inner.lock().slab.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(sub: &mut Subscription) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = sub.receiver.try_recv() {
            lines.push(line.to_string());
        }
        lines
    }

    #[test_timeout::timeout]
    fn channel_names_are_validated() {
        assert_eq!(validate_channel("dimr_15"), Ok("dimr_15"));
        assert_eq!(validate_channel(""), Err(HubError::EmptyChannel));
        assert_eq!(validate_channel("a b"), Err(HubError::InvalidChannel));
        assert_eq!(
            validate_channel(&"x".repeat(MAX_CHANNEL_LEN + 1)),
            Err(HubError::ChannelTooLong)
        );
    }

    #[test_timeout::timeout]
    fn publish_reaches_only_its_channel() {
        let hub = ChannelHub::default();
        let mut a1 = hub.subscribe("dimr_15", Uuid::new_v4());
        let mut a2 = hub.subscribe("dimr_15", Uuid::new_v4());
        let mut b = hub.subscribe("dimr_16", Uuid::new_v4());

        let report = hub.publish("dimr_15", "[t] [Validating] hello");
        assert_eq!(report.delivered, 2);
        assert_eq!(report.bytes, 2 * "[t] [Validating] hello".len());

        assert_eq!(drain(&mut a1), vec!["[t] [Validating] hello"]);
        assert_eq!(drain(&mut a2), vec!["[t] [Validating] hello"]);
        assert!(drain(&mut b).is_empty());
    }

    #[test_timeout::timeout]
    fn publish_without_subscribers_is_silent() {
        let hub = ChannelHub::default();
        assert_eq!(hub.publish("nobody", "lost"), PublishReport::default());
        assert!(hub.snapshot().is_empty());

        // Lines published before a subscriber joins are not replayed.
        let mut late = hub.subscribe("nobody", Uuid::new_v4());
        assert!(drain(&mut late).is_empty());
    }

    #[test_timeout::timeout]
    fn unsubscribe_stops_delivery_and_is_idempotent() {
        let hub = ChannelHub::default();
        let id = Uuid::new_v4();
        let mut sub = hub.subscribe("dimr_15", id);
        let _other = hub.subscribe("dimr_15", Uuid::new_v4());

        let removal = hub.unsubscribe(id);
        assert_eq!(removal.channel.as_deref(), Some("dimr_15"));
        assert_eq!(removal.channel_subscribers, 1);

        assert_eq!(hub.publish("dimr_15", "after").delivered, 1);
        assert!(drain(&mut sub).is_empty());

        let again = hub.unsubscribe(id);
        assert_eq!(again.channel, None);
        let never = hub.unsubscribe(Uuid::new_v4());
        assert_eq!(never.channel, None);
    }

    #[test_timeout::timeout]
    fn resubscribing_same_id_does_not_duplicate() {
        let hub = ChannelHub::default();
        let id = Uuid::new_v4();
        let _first = hub.subscribe("dimr_15", id);
        let mut second = hub.subscribe("dimr_15", id);

        assert_eq!(hub.subscriber_count("dimr_15"), 1);
        assert_eq!(hub.publish("dimr_15", "once").delivered, 1);
        assert_eq!(drain(&mut second), vec!["once"]);

        let mut moved = hub.subscribe("dimr_16", id);
        assert_eq!(hub.subscriber_count("dimr_15"), 0);
        assert_eq!(hub.channel_of(id).as_deref(), Some("dimr_16"));
        assert_eq!(hub.publish("dimr_15", "stale").delivered, 0);
        hub.publish("dimr_16", "fresh");
        assert_eq!(drain(&mut moved), vec!["fresh"]);
    }

    #[test_timeout::timeout]
    fn stale_closed_queue_keeps_resubscribed_membership() {
        let hub = ChannelHub::default();
        let id = Uuid::new_v4();
        let first = hub.subscribe("dimr_15", id);

        // A publish that snapshotted the first queue, racing a resubscribe.
        let state = hub.inner.channels.get("dimr_15").map(|e| Arc::clone(e.value()));
        let stale = state.unwrap().targets();
        let mut second = hub.subscribe("dimr_15", id);
        drop(first);
        assert!(stale[0].sender.is_closed());
        hub.evict("dimr_15", &stale[0]);

        assert_eq!(hub.channel_of(id).as_deref(), Some("dimr_15"));
        assert_eq!(hub.subscriber_count("dimr_15"), 1);
        assert_eq!(hub.publish("dimr_15", "live").delivered, 1);
        assert_eq!(drain(&mut second), vec!["live"]);

        let removal = hub.unsubscribe(id);
        assert_eq!(removal.channel.as_deref(), Some("dimr_15"));
        assert_eq!(hub.publish("dimr_15", "after").delivered, 0);
        assert!(drain(&mut second).is_empty());
    }

    #[test_timeout::timeout]
    fn closed_subscriber_is_evicted_without_affecting_others() {
        let hub = ChannelHub::default();
        let gone = hub.subscribe("dimr_15", Uuid::new_v4());
        let mut alive = hub.subscribe("dimr_15", Uuid::new_v4());
        drop(gone);

        let report = hub.publish("dimr_15", "line");
        assert_eq!(report.closed, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(hub.subscriber_count("dimr_15"), 1);
        assert_eq!(drain(&mut alive), vec!["line"]);
    }

    #[test_timeout::timeout]
    fn full_queue_drops_for_that_subscriber_only() {
        let hub = ChannelHub::new(HubConfig {
            per_subscriber_buffer: 1,
        });
        let mut slow = hub.subscribe("dimr_15", Uuid::new_v4());
        let fast_id = Uuid::new_v4();
        let mut fast = hub.subscribe("dimr_15", fast_id);

        hub.publish("dimr_15", "one");
        drain(&mut fast);
        let report = hub.publish("dimr_15", "two");
        assert_eq!(report.dropped, 1);
        assert_eq!(report.delivered, 1);

        assert_eq!(drain(&mut slow), vec!["one"]);
        assert_eq!(drain(&mut fast), vec!["two"]);
    }

    #[test_timeout::timeout]
    fn empty_channels_are_removed() {
        let hub = ChannelHub::default();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        hub.subscribe("dimr_15", a);
        hub.subscribe("dimr_16", b);
        assert_eq!(
            hub.snapshot(),
            vec![
                ChannelSnapshot {
                    channel: "dimr_15".into(),
                    subscribers: 1
                },
                ChannelSnapshot {
                    channel: "dimr_16".into(),
                    subscribers: 1
                },
            ]
        );

        let removal = hub.unsubscribe(a);
        assert_eq!(removal.active_channels, 1);
        assert_eq!(hub.snapshot().len(), 1);

        // A retired channel comes back on the next subscribe.
        hub.subscribe("dimr_15", a);
        assert_eq!(hub.subscriber_count("dimr_15"), 1);
    }

    #[test_timeout::timeout(20)]
    fn concurrent_churn_keeps_unrelated_channels_intact() {
        let hub = ChannelHub::new(HubConfig {
            per_subscriber_buffer: 4096,
        });
        let mut steady = hub.subscribe("steady", Uuid::new_v4());

        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let hub = hub.clone();
                std::thread::spawn(move || {
                    for round in 0..200 {
                        let id = Uuid::new_v4();
                        let channel = format!("churn-{}", (worker + round) % 3);
                        let _sub = hub.subscribe(&channel, id);
                        hub.publish(&channel, "noise");
                        hub.unsubscribe(id);
                    }
                })
            })
            .collect();

        for n in 0..500 {
            hub.publish("steady", &format!("line {n}"));
        }
        for worker in workers {
            worker.join().expect("worker panicked");
        }

        let lines = drain(&mut steady);
        assert_eq!(lines.len(), 500);
        assert_eq!(lines[0], "line 0");
        assert_eq!(lines[499], "line 499");
        assert_eq!(hub.snapshot().len(), 1);
    }
}
