//! Boundary to the presence and emergency document stores.
//!
//! Both stores are external; the engine only consults them through these
//! traits. Emergency listings and feeds carry open incidents only; a
//! resolved incident drops out of the next snapshot. Subscriptions yield the
//! full current list for their scope on every change, starting with the
//! state at subscribe time. A subscription
//! that loses its upstream yields `CoordError::UpstreamUnavailable` and
//! ends, leaving reconnection to the subscriber.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::CoordError;
use crate::models::{Emergency, UserPresence};
use crate::visibility::PresencePartitions;

pub mod memory;
pub mod pg_emergency;
pub mod redis_presence;

pub use self::memory::{MemoryEmergencyStore, MemoryPresenceStore};
pub use self::pg_emergency::PgEmergencyStore;
pub use self::redis_presence::RedisPresenceStore;

pub type Subscription<T> = BoxStream<'static, Result<Vec<T>, CoordError>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EmergencyScope {
    All,
    Group(String),
}

impl EmergencyScope {
    pub fn contains(&self, emergency: &Emergency) -> bool {
        match self {
            EmergencyScope::All => true,
            EmergencyScope::Group(group_id) => emergency.group_id == *group_id,
        }
    }
}

#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Members of one group partition.
    async fn get(&self, group_id: &str) -> Result<Vec<UserPresence>, CoordError>;

    /// Writes a user's record, moving it between partitions if its group changed.
    async fn put(&self, presence: UserPresence) -> Result<(), CoordError>;

    async fn find(&self, user_id: &str) -> Result<Option<UserPresence>, CoordError>;

    /// Known group partitions.
    async fn groups(&self) -> Result<Vec<String>, CoordError>;

    async fn subscribe(&self, group_id: &str) -> Result<Subscription<UserPresence>, CoordError>;

    /// Yields the list of partitions whenever a partition appears.
    async fn subscribe_groups(&self) -> Result<Subscription<String>, CoordError>;

    async fn snapshot(&self) -> Result<PresencePartitions, CoordError> {
        let mut partitions = PresencePartitions::new();
        for group_id in self.groups().await? {
            let members = self.get(&group_id).await?;
            partitions.insert(group_id, members);
        }
        Ok(partitions)
    }
}

#[async_trait]
pub trait EmergencyStore: Send + Sync {
    async fn get(&self, emergency_id: &str) -> Result<Option<Emergency>, CoordError>;

    /// Non-resolved emergencies in scope, oldest first.
    async fn list_open(&self, scope: &EmergencyScope) -> Result<Vec<Emergency>, CoordError>;

    async fn find_open_for_attendee(
        &self,
        attendee_id: &str,
    ) -> Result<Option<Emergency>, CoordError>;

    async fn put(&self, emergency: Emergency) -> Result<(), CoordError>;

    async fn subscribe(&self, scope: EmergencyScope) -> Result<Subscription<Emergency>, CoordError>;
}
