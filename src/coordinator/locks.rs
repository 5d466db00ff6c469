use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Async mutexes handed out per string key.
#[derive(Default)]
pub struct KeyedLocks {
    inner: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: String) -> OwnedMutexGuard<()> {
        let mutex = self
            .inner
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Drops keys nobody holds or waits on.
    pub fn prune(&self) {
        self.inner.retain(|_, m| Arc::strong_count(m) > 1);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

pub(crate) fn attendee_key(attendee_id: &str) -> String {
    format!("attendee:{attendee_id}")
}

pub(crate) fn response_key(emergency_id: &str, volunteer_id: &str) -> String {
    format!("response:{emergency_id}:{volunteer_id}")
}

pub(crate) fn emergency_key(emergency_id: &str) -> String {
    format!("emergency:{emergency_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::new());
        let guard = locks.lock("k".into()).await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _g = locks.lock("k".into()).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn other_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock("a".into()).await;
        let _b = tokio::time::timeout(Duration::from_millis(50), locks.lock("b".into()))
            .await
            .expect("independent key blocked");
    }

    #[tokio::test]
    async fn prune_keeps_held_keys() {
        let locks = KeyedLocks::new();
        let held = locks.lock("held".into()).await;
        drop(locks.lock("free".into()).await);
        locks.prune();
        assert_eq!(locks.len(), 1);
        drop(held);
        locks.prune();
        assert!(locks.is_empty());
    }
}
