use std::{
    collections::{HashMap, HashSet},
    sync::RwLock,
};

/// In-process presence subscription tracker.
///
/// A subscription means "subscriber wants to hear about target's presence
/// changes". Kept as a two-way map so both lookups are O(1): fan-out needs
/// subscribers-of-target, disconnect cleanup needs targets-of-subscriber.
#[derive(Default)]
pub struct PresenceTracker {
    inner: RwLock<Maps>,
}

#[derive(Default)]
struct Maps {
    subscribers_of: HashMap<String, HashSet<String>>,
    targets_of: HashMap<String, HashSet<String>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register that `subscriber` watches each of `targets`.
    pub fn subscribe(&self, subscriber: &str, targets: &[String]) {
        let mut maps = self.inner.write().unwrap_or_else(|p| p.into_inner());
        for target in targets {
            maps.subscribers_of
                .entry(target.clone())
                .or_default()
                .insert(subscriber.to_string());
            maps.targets_of
                .entry(subscriber.to_string())
                .or_default()
                .insert(target.clone());
        }
    }

    /// Everyone watching `target`.
    pub fn subscribers_of(&self, target: &str) -> Vec<String> {
        let maps = self.inner.read().unwrap_or_else(|p| p.into_inner());
        maps.subscribers_of
            .get(target)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop every subscription held by `subscriber` (disconnect cleanup).
    pub fn remove_subscriber(&self, subscriber: &str) {
        let mut maps = self.inner.write().unwrap_or_else(|p| p.into_inner());
        let Some(targets) = maps.targets_of.remove(subscriber) else {
            return;
        };
        for target in targets {
            if let Some(subs) = maps.subscribers_of.get_mut(&target) {
                subs.remove(subscriber);
                if subs.is_empty() {
                    maps.subscribers_of.remove(&target);
                }
            }
        }
    }
}
