//! Topic ↔ connection subscription index.
//!
//! Both directions live in one struct so a single lock covers every mutation: a
//! `(connection, topic)` pair is in the forward map iff it is in the reverse map.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::streams::Topic;

#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    /// topic -> subscribed connections
    by_topic: HashMap<Topic, HashSet<Uuid>>,
    /// connection -> subscribed topics
    by_connection: HashMap<Uuid, HashSet<Topic>>,
}

impl SubscriptionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the subscription is new
    pub fn subscribe(&mut self, connection_id: Uuid, topic: Topic) -> bool {
        let added = self
            .by_connection
            .entry(connection_id)
            .or_default()
            .insert(topic);
        self.by_topic.entry(topic).or_default().insert(connection_id);
        added
    }

    /// Returns `true` if a subscription was removed
    pub fn unsubscribe(&mut self, connection_id: Uuid, topic: Topic) -> bool {
        let removed = match self.by_connection.get_mut(&connection_id) {
            Some(topics) => {
                let removed = topics.remove(&topic);
                if topics.is_empty() {
                    self.by_connection.remove(&connection_id);
                }
                removed
            }
            None => false,
        };

        if let Some(conns) = self.by_topic.get_mut(&topic) {
            conns.remove(&connection_id);
            if conns.is_empty() {
                self.by_topic.remove(&topic);
            }
        }

        removed
    }

    /// Drop every subscription held by a connection, returning the topics it had
    pub fn remove_connection(&mut self, connection_id: Uuid) -> Vec<Topic> {
        let topics: Vec<Topic> = self
            .by_connection
            .remove(&connection_id)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();

        for topic in &topics {
            if let Some(conns) = self.by_topic.get_mut(topic) {
                conns.remove(&connection_id);
                if conns.is_empty() {
                    self.by_topic.remove(topic);
                }
            }
        }

        topics
    }

    pub fn subscribers_of(&self, topic: Topic) -> impl Iterator<Item = &Uuid> + '_ {
        self.by_topic.get(&topic).into_iter().flatten()
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.by_topic.get(&topic).map_or(0, HashSet::len)
    }

    pub fn topics_of(&self, connection_id: Uuid) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self
            .by_connection
            .get(&connection_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        topics.sort();
        topics
    }

    /// Total number of (connection, topic) pairs
    pub fn len(&self) -> usize {
        self.by_connection.values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_connection.is_empty()
    }

    pub fn connections(&self) -> impl Iterator<Item = &Uuid> + '_ {
        self.by_connection.keys()
    }

    /// Forward and reverse maps agree and hold no empty sets
    pub fn is_consistent(&self) -> bool {
        let forward_ok = self.by_topic.iter().all(|(topic, conns)| {
            !conns.is_empty()
                && conns.iter().all(|id| {
                    self.by_connection
                        .get(id)
                        .is_some_and(|topics| topics.contains(topic))
                })
        });

        let reverse_ok = self.by_connection.iter().all(|(id, topics)| {
            !topics.is_empty()
                && topics.iter().all(|topic| {
                    self.by_topic
                        .get(topic)
                        .is_some_and(|conns| conns.contains(id))
                })
        });

        forward_ok && reverse_ok
    }
}
