//! Channel membership and bounded history.
//!
//! Plain data guarded by the registry's lock; nothing here sends anything.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use super::message::NotificationMessage;
use super::registry::ConnectionId;

#[derive(Debug, Default)]
struct ChannelState {
    subscribers: HashSet<ConnectionId>,
    history: VecDeque<Arc<NotificationMessage>>,
}

/// Channel name to subscribers and recent messages.
///
/// A channel exists while it has at least one subscriber. Its history goes
/// with it.
#[derive(Debug)]
pub(crate) struct ChannelBroker {
    history_capacity: usize,
    channels: HashMap<String, ChannelState>,
}

impl ChannelBroker {
    pub(crate) fn new(history_capacity: usize) -> Self {
        Self {
            history_capacity,
            channels: HashMap::new(),
        }
    }

    /// Returns `false` if `id` was already subscribed.
    pub(crate) fn add_subscriber(&mut self, channel: &str, id: &ConnectionId) -> bool {
        self.channels
            .entry(channel.to_string())
            .or_default()
            .subscribers
            .insert(id.clone())
    }

    pub(crate) fn remove_subscriber(&mut self, channel: &str, id: &ConnectionId) -> bool {
        let Some(state) = self.channels.get_mut(channel) else {
            return false;
        };
        let removed = state.subscribers.remove(id);
        if state.subscribers.is_empty() {
            self.channels.remove(channel);
        }
        removed
    }

    pub(crate) fn subscribers(&self, channel: &str) -> Vec<ConnectionId> {
        self.channels
            .get(channel)
            .map(|state| state.subscribers.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn has_subscribers(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    /// Append to the channel history, trimming the oldest entries.
    pub(crate) fn record(&mut self, channel: &str, message: Arc<NotificationMessage>) {
        let Some(state) = self.channels.get_mut(channel) else {
            return;
        };
        state.history.push_back(message);
        while state.history.len() > self.history_capacity {
            state.history.pop_front();
        }
    }

    /// Up to `limit` most recent messages, oldest first.
    pub(crate) fn recent(&self, channel: &str, limit: usize) -> Vec<Arc<NotificationMessage>> {
        let Some(state) = self.channels.get(channel) else {
            return Vec::new();
        };
        let skip = state.history.len().saturating_sub(limit);
        state.history.iter().skip(skip).cloned().collect()
    }

    pub(crate) fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub(crate) fn subscriber_counts(&self) -> HashMap<String, usize> {
        self.channels
            .iter()
            .map(|(name, state)| (name.clone(), state.subscribers.len()))
            .collect()
    }

    pub(crate) fn history_size(&self) -> usize {
        self.channels.values().map(|state| state.history.len()).sum()
    }

    pub(crate) fn clear(&mut self) {
        self.channels.clear();
    }
}
