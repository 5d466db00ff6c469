//! Presence partitions in Redis.
//!
//! Layout: one JSON document per user, one set of user ids per group and a
//! set of known groups. Writers publish on a per-group channel; subscribers
//! refetch the partition on every message.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use redis::{AsyncCommands, Client as RedisClient};

use super::{PresenceStore, Subscription};
use crate::error::CoordError;
use crate::models::UserPresence;

const USER_PREFIX: &str = "presence:user:";
const GROUP_PREFIX: &str = "presence:group:";
const GROUPS_KEY: &str = "presence:groups";
const FEED_PREFIX: &str = "presence:feed:";
const GROUPS_FEED: &str = "presence:feed-groups";

fn user_key(user_id: &str) -> String {
    format!("{USER_PREFIX}{user_id}")
}

fn group_key(group_id: &str) -> String {
    format!("{GROUP_PREFIX}{group_id}")
}

fn feed_channel(group_id: &str) -> String {
    format!("{FEED_PREFIX}{group_id}")
}

#[derive(Clone)]
pub struct RedisPresenceStore {
    redis: Arc<RedisClient>,
}

impl RedisPresenceStore {
    pub fn new(redis: Arc<RedisClient>) -> Self {
        Self { redis }
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, CoordError> {
        Ok(self.redis.get_multiplexed_async_connection().await?)
    }

    // Subscribes to `channel` and refetches through `refresh` on each message.
    async fn follow<T, F, Fut>(&self, channel: String, refresh: F) -> Result<Subscription<T>, CoordError>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Vec<T>, CoordError>> + Send + 'static,
    {
        let mut pubsub = self.redis.get_async_pubsub().await?;
        pubsub.subscribe(&channel).await?;
        let initial = refresh().await?;
        tracing::debug!(%channel, "presence subscription opened");

        let refresh = Arc::new(refresh);
        let updates = pubsub.into_on_message().then(move |_msg| {
            let refresh = Arc::clone(&refresh);
            async move { (*refresh)().await }
        });
        let closed = stream::once(async move {
            tracing::warn!(%channel, "presence subscription closed by redis");
            Err(CoordError::UpstreamUnavailable(format!("{channel} closed")))
        });

        Ok(stream::once(async move { Ok(initial) })
            .chain(updates)
            .chain(closed)
            .boxed())
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn get(&self, group_id: &str) -> Result<Vec<UserPresence>, CoordError> {
        let mut conn = self.connection().await?;
        let user_ids: Vec<String> = conn.smembers(group_key(group_id)).await?;
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = user_ids.iter().map(|id| user_key(id)).collect();
        let docs: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await?;

        let mut members = Vec::with_capacity(docs.len());
        for doc in docs.into_iter().flatten() {
            let presence: UserPresence = serde_json::from_str(&doc)?;
            // The set can briefly lag a group move.
            if presence.group_id == group_id {
                members.push(presence);
            }
        }
        members.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(members)
    }

    async fn put(&self, presence: UserPresence) -> Result<(), CoordError> {
        let mut conn = self.connection().await?;
        let key = user_key(&presence.user_id);

        let previous: Option<String> = conn.get(&key).await?;
        if let Some(previous) = previous {
            let previous: UserPresence = serde_json::from_str(&previous)?;
            if previous.group_id != presence.group_id {
                let _: () = conn
                    .srem(group_key(&previous.group_id), &presence.user_id)
                    .await?;
                let _: () = conn.publish(feed_channel(&previous.group_id), "moved").await?;
            }
        }

        let doc = serde_json::to_string(&presence)?;
        let _: () = conn.set(&key, doc).await?;
        let _: () = conn
            .sadd(group_key(&presence.group_id), &presence.user_id)
            .await?;
        let added: i64 = conn.sadd(GROUPS_KEY, &presence.group_id).await?;
        let _: () = conn.publish(feed_channel(&presence.group_id), "put").await?;
        if added > 0 {
            tracing::info!(group_id = %presence.group_id, "new presence partition");
            let _: () = conn.publish(GROUPS_FEED, &presence.group_id).await?;
        }
        Ok(())
    }

    async fn find(&self, user_id: &str) -> Result<Option<UserPresence>, CoordError> {
        let mut conn = self.connection().await?;
        let doc: Option<String> = conn.get(user_key(user_id)).await?;
        doc.map(|d| serde_json::from_str(&d))
            .transpose()
            .map_err(CoordError::from)
    }

    async fn groups(&self) -> Result<Vec<String>, CoordError> {
        let mut conn = self.connection().await?;
        let mut groups: Vec<String> = conn.smembers(GROUPS_KEY).await?;
        groups.sort();
        Ok(groups)
    }

    async fn subscribe(&self, group_id: &str) -> Result<Subscription<UserPresence>, CoordError> {
        let store = self.clone();
        let group_id = group_id.to_string();
        self.follow(feed_channel(&group_id), move || {
            let store = store.clone();
            let group_id = group_id.clone();
            async move { store.get(&group_id).await }
        })
        .await
    }

    async fn subscribe_groups(&self) -> Result<Subscription<String>, CoordError> {
        let store = self.clone();
        self.follow(GROUPS_FEED.to_string(), move || {
            let store = store.clone();
            async move { store.groups().await }
        })
        .await
    }
}
