//! In-process stores backed by `tokio::sync::broadcast` feeds.
//!
//! Used for `STORE_BACKEND=memory` and by the test suite. An outage can be
//! simulated with `set_available(false)`: every call then fails with
//! `UpstreamUnavailable` and open subscriptions are interrupted.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{StreamExt, stream};
use tokio::sync::RwLock;
use tokio::sync::broadcast::{self, error::RecvError};

use super::{EmergencyScope, EmergencyStore, PresenceStore, Subscription};
use crate::error::CoordError;
use crate::models::{Emergency, UserPresence};

const FEED_CAPACITY: usize = 64;

// `None` on a feed means the upstream dropped the subscription.
type Feed<T> = broadcast::Sender<Option<Vec<T>>>;

fn feed_stream<T>(initial: Vec<T>, rx: broadcast::Receiver<Option<Vec<T>>>) -> Subscription<T>
where
    T: Clone + Send + 'static,
{
    let updates = stream::unfold(Some(rx), |rx| async move {
        let mut rx = rx?;
        loop {
            match rx.recv().await {
                Ok(Some(list)) => return Some((Ok(list), Some(rx))),
                Ok(None) => {
                    let err = CoordError::UpstreamUnavailable("subscription interrupted".into());
                    return Some((Err(err), None));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "subscriber lagged behind feed");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });
    stream::once(async move { Ok(initial) }).chain(updates).boxed()
}

fn unavailable() -> CoordError {
    CoordError::UpstreamUnavailable("store offline".into())
}

#[derive(Default)]
struct PresenceState {
    partitions: BTreeMap<String, BTreeMap<String, UserPresence>>,
    group_of: HashMap<String, String>,
}

impl PresenceState {
    fn members(&self, group_id: &str) -> Vec<UserPresence> {
        self.partitions
            .get(group_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    fn group_ids(&self) -> Vec<String> {
        self.partitions.keys().cloned().collect()
    }
}

pub struct MemoryPresenceStore {
    state: RwLock<PresenceState>,
    feeds: DashMap<String, Feed<UserPresence>>,
    groups_feed: Feed<String>,
    available: AtomicBool,
}

impl Default for MemoryPresenceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPresenceStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(PresenceState::default()),
            feeds: DashMap::new(),
            groups_feed: broadcast::channel(FEED_CAPACITY).0,
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        if !available {
            for feed in self.feeds.iter() {
                let _ = feed.send(None);
            }
            let _ = self.groups_feed.send(None);
        }
    }

    fn check(&self) -> Result<(), CoordError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(unavailable())
        }
    }

    fn publish(&self, group_id: &str, state: &PresenceState) {
        if let Some(feed) = self.feeds.get(group_id) {
            let _ = feed.send(Some(state.members(group_id)));
        }
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn get(&self, group_id: &str) -> Result<Vec<UserPresence>, CoordError> {
        self.check()?;
        Ok(self.state.read().await.members(group_id))
    }

    async fn put(&self, presence: UserPresence) -> Result<(), CoordError> {
        self.check()?;
        let mut state = self.state.write().await;
        let user_id = presence.user_id.clone();
        let group_id = presence.group_id.clone();

        let previous = state.group_of.insert(user_id.clone(), group_id.clone());
        if let Some(previous) = previous.filter(|g| *g != group_id) {
            if let Some(members) = state.partitions.get_mut(&previous) {
                members.remove(&user_id);
            }
            self.publish(&previous, &state);
        }

        let new_group = !state.partitions.contains_key(&group_id);
        state
            .partitions
            .entry(group_id.clone())
            .or_default()
            .insert(user_id, presence);
        self.publish(&group_id, &state);
        if new_group {
            let _ = self.groups_feed.send(Some(state.group_ids()));
        }
        Ok(())
    }

    async fn find(&self, user_id: &str) -> Result<Option<UserPresence>, CoordError> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state
            .group_of
            .get(user_id)
            .and_then(|g| state.partitions.get(g))
            .and_then(|members| members.get(user_id))
            .cloned())
    }

    async fn groups(&self) -> Result<Vec<String>, CoordError> {
        self.check()?;
        Ok(self.state.read().await.group_ids())
    }

    async fn subscribe(&self, group_id: &str) -> Result<Subscription<UserPresence>, CoordError> {
        self.check()?;
        let rx = self
            .feeds
            .entry(group_id.to_string())
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
            .subscribe();
        let initial = self.state.read().await.members(group_id);
        Ok(feed_stream(initial, rx))
    }

    async fn subscribe_groups(&self) -> Result<Subscription<String>, CoordError> {
        self.check()?;
        let rx = self.groups_feed.subscribe();
        let initial = self.state.read().await.group_ids();
        Ok(feed_stream(initial, rx))
    }
}

pub struct MemoryEmergencyStore {
    docs: RwLock<BTreeMap<String, Emergency>>,
    feeds: DashMap<EmergencyScope, Feed<Emergency>>,
    available: AtomicBool,
}

impl Default for MemoryEmergencyStore {
    fn default() -> Self {
        Self::new()
    }
}

fn open_in_scope(docs: &BTreeMap<String, Emergency>, scope: &EmergencyScope) -> Vec<Emergency> {
    let mut list: Vec<Emergency> = docs
        .values()
        .filter(|e| e.is_open() && scope.contains(e))
        .cloned()
        .collect();
    list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    list
}

impl MemoryEmergencyStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(BTreeMap::new()),
            feeds: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        if !available {
            for feed in self.feeds.iter() {
                let _ = feed.send(None);
            }
        }
    }

    fn check(&self) -> Result<(), CoordError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(unavailable())
        }
    }
}

#[async_trait]
impl EmergencyStore for MemoryEmergencyStore {
    async fn get(&self, emergency_id: &str) -> Result<Option<Emergency>, CoordError> {
        self.check()?;
        Ok(self.docs.read().await.get(emergency_id).cloned())
    }

    async fn list_open(&self, scope: &EmergencyScope) -> Result<Vec<Emergency>, CoordError> {
        self.check()?;
        Ok(open_in_scope(&*self.docs.read().await, scope))
    }

    async fn find_open_for_attendee(
        &self,
        attendee_id: &str,
    ) -> Result<Option<Emergency>, CoordError> {
        self.check()?;
        Ok(self
            .docs
            .read()
            .await
            .values()
            .find(|e| e.is_open() && e.attendee_id == attendee_id)
            .cloned())
    }

    async fn put(&self, emergency: Emergency) -> Result<(), CoordError> {
        self.check()?;
        let mut docs = self.docs.write().await;
        let group = EmergencyScope::Group(emergency.group_id.clone());
        docs.insert(emergency.emergency_id.clone(), emergency);
        for scope in [EmergencyScope::All, group] {
            if let Some(feed) = self.feeds.get(&scope) {
                let _ = feed.send(Some(open_in_scope(&docs, &scope)));
            }
        }
        Ok(())
    }

    async fn subscribe(&self, scope: EmergencyScope) -> Result<Subscription<Emergency>, CoordError> {
        self.check()?;
        let rx = self
            .feeds
            .entry(scope.clone())
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
            .subscribe();
        let initial = open_in_scope(&*self.docs.read().await, &scope);
        Ok(feed_stream(initial, rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Coordinates, EmergencyStatus, Role};
    use chrono::Utc;

    fn presence(id: &str, group: &str) -> UserPresence {
        UserPresence::new(id, id, Role::Attendee, group, Coordinates::new(0.0, 0.0))
    }

    #[tokio::test]
    async fn moving_between_groups_leaves_old_partition() {
        let store = MemoryPresenceStore::new();
        store.put(presence("u1", "g1")).await.unwrap();
        store.put(presence("u1", "g2")).await.unwrap();

        assert!(store.get("g1").await.unwrap().is_empty());
        assert_eq!(store.get("g2").await.unwrap().len(), 1);
        assert_eq!(store.find("u1").await.unwrap().unwrap().group_id, "g2");
        assert_eq!(store.groups().await.unwrap(), ["g1", "g2"]);
    }

    #[tokio::test]
    async fn subscription_starts_with_snapshot_then_follows_writes() {
        let store = MemoryPresenceStore::new();
        store.put(presence("u1", "g1")).await.unwrap();
        let mut feed = store.subscribe("g1").await.unwrap();

        assert_eq!(feed.next().await.unwrap().unwrap().len(), 1);
        store.put(presence("u2", "g1")).await.unwrap();
        assert_eq!(feed.next().await.unwrap().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn outage_interrupts_subscriptions() {
        let store = MemoryPresenceStore::new();
        let mut feed = store.subscribe("g1").await.unwrap();
        feed.next().await.unwrap().unwrap();

        store.set_available(false);
        assert!(matches!(
            feed.next().await,
            Some(Err(CoordError::UpstreamUnavailable(_)))
        ));
        assert!(feed.next().await.is_none());
        assert!(store.get("g1").await.is_err());

        store.set_available(true);
        assert!(store.subscribe("g1").await.is_ok());
    }

    #[tokio::test]
    async fn emergency_feeds_are_scoped() {
        let store = MemoryEmergencyStore::new();
        let mut g2 = store
            .subscribe(EmergencyScope::Group("g2".into()))
            .await
            .unwrap();
        assert!(g2.next().await.unwrap().unwrap().is_empty());

        let e1 = Emergency::new("a1", "g1", Coordinates::new(0.0, 0.0), None, Utc::now());
        let e2 = Emergency::new("a2", "g2", Coordinates::new(0.0, 0.0), None, Utc::now());
        store.put(e1).await.unwrap();
        store.put(e2.clone()).await.unwrap();

        assert_eq!(g2.next().await.unwrap().unwrap(), vec![e2]);
        assert_eq!(store.list_open(&EmergencyScope::All).await.unwrap().len(), 2);
        assert!(store.find_open_for_attendee("a1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn resolved_emergency_leaves_the_feed() {
        let store = MemoryEmergencyStore::new();
        let mut all = store.subscribe(EmergencyScope::All).await.unwrap();
        assert!(all.next().await.unwrap().unwrap().is_empty());

        let mut e = Emergency::new("a1", "g1", Coordinates::new(0.0, 0.0), None, Utc::now());
        store.put(e.clone()).await.unwrap();
        assert_eq!(all.next().await.unwrap().unwrap().len(), 1);

        e.status = EmergencyStatus::Resolved;
        store.put(e.clone()).await.unwrap();
        assert!(all.next().await.unwrap().unwrap().is_empty());
        assert!(store.list_open(&EmergencyScope::All).await.unwrap().is_empty());
        // Still retrievable by id.
        assert_eq!(store.get(&e.emergency_id).await.unwrap(), Some(e));
    }
}
