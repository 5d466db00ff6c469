//! Long-lived per-observer view computation.
//!
//! Each connected observer gets one task that follows the presence
//! partitions it may see and the emergency feed, recomputes its visible set
//! on every upstream change and publishes it on a `watch` channel. Dropping
//! the session aborts the task and releases every subscription it holds.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::{BoxStream, SelectAll};
use futures_util::{StreamExt, stream};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::CoordError;
use crate::models::{Emergency, Role, UserPresence};
use crate::store::{EmergencyScope, EmergencyStore, PresenceStore};
use crate::visibility::{Observer, PresencePartitions, VisibilityConfig, VisibleSet, visible_set};

/// How often and how far a client should move before reporting location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LocationCadence {
    pub interval_secs: u64,
    pub distance_filter_meters: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CadencePolicy {
    pub emergency: LocationCadence,
    pub normal: LocationCadence,
}

impl Default for CadencePolicy {
    fn default() -> Self {
        Self {
            emergency: LocationCadence {
                interval_secs: 3,
                distance_filter_meters: 2.0,
            },
            normal: LocationCadence {
                interval_secs: 10,
                distance_filter_meters: 10.0,
            },
        }
    }
}

impl From<&Config> for CadencePolicy {
    fn from(config: &Config) -> Self {
        Self {
            emergency: LocationCadence {
                interval_secs: config.emergency_interval_secs,
                distance_filter_meters: config.emergency_distance_meters,
            },
            normal: LocationCadence {
                interval_secs: config.normal_interval_secs,
                distance_filter_meters: config.normal_distance_meters,
            },
        }
    }
}

impl CadencePolicy {
    pub const fn for_flag(&self, emergency_flag: bool) -> LocationCadence {
        if emergency_flag {
            self.emergency
        } else {
            self.normal
        }
    }
}

/// Exponential retry delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32 << self.attempt.min(16);
        self.attempt = self.attempt.saturating_add(1);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub visibility: VisibilityConfig,
    pub cadence: CadencePolicy,
    pub retry_base: Duration,
    pub retry_max: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            visibility: VisibilityConfig::default(),
            cadence: CadencePolicy::default(),
            retry_base: Duration::from_millis(500),
            retry_max: Duration::from_secs(30),
        }
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            visibility: VisibilityConfig::from(config),
            cadence: CadencePolicy::from(config),
            retry_base: config.retry_base(),
            retry_max: config.retry_max(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewUpdate {
    pub version: u64,
    pub view: VisibleSet,
    pub cadence: LocationCadence,
    /// Set while the upstream is unreachable; `view` is the last good one.
    pub degraded: bool,
    pub generated_at: DateTime<Utc>,
}

pub struct ObserverSession {
    updates: watch::Receiver<ViewUpdate>,
    zoom: watch::Sender<Option<f64>>,
    task: JoinHandle<()>,
}

impl ObserverSession {
    pub fn spawn(
        observer: Observer,
        presence: Arc<dyn PresenceStore>,
        emergencies: Arc<dyn EmergencyStore>,
        settings: SessionSettings,
    ) -> Self {
        let initial = ViewUpdate {
            version: 0,
            view: VisibleSet::default(),
            cadence: settings.cadence.normal,
            degraded: false,
            generated_at: Utc::now(),
        };
        let (tx, updates) = watch::channel(initial);
        let (zoom, zoom_rx) = watch::channel(observer.zoom);

        let worker = Worker {
            observer,
            presence,
            emergencies,
            settings,
            tx,
            zoom: zoom_rx,
            partitions: PresencePartitions::new(),
            incidents: Vec::new(),
        };
        let task = tokio::spawn(worker.run());

        Self {
            updates,
            zoom,
            task,
        }
    }

    pub fn updates(&self) -> watch::Receiver<ViewUpdate> {
        self.updates.clone()
    }

    pub fn current(&self) -> ViewUpdate {
        self.updates.borrow().clone()
    }

    /// Changes the marker budget without resubscribing.
    pub fn set_zoom(&self, zoom: Option<f64>) {
        let _ = self.zoom.send(zoom);
    }
}

impl Drop for ObserverSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

type PresenceFeed = BoxStream<'static, (String, Result<Vec<UserPresence>, CoordError>)>;

enum Exit {
    Closed,
    Failed(CoordError),
}

impl From<CoordError> for Exit {
    fn from(e: CoordError) -> Self {
        Exit::Failed(e)
    }
}

struct Worker {
    observer: Observer,
    presence: Arc<dyn PresenceStore>,
    emergencies: Arc<dyn EmergencyStore>,
    settings: SessionSettings,
    tx: watch::Sender<ViewUpdate>,
    zoom: watch::Receiver<Option<f64>>,
    partitions: PresencePartitions,
    incidents: Vec<Emergency>,
}

impl Worker {
    async fn run(mut self) {
        let mut backoff = Backoff::new(self.settings.retry_base, self.settings.retry_max);
        loop {
            match self.follow(&mut backoff).await {
                Exit::Closed => break,
                Exit::Failed(e) if !e.is_retryable() => {
                    tracing::error!(
                        observer = %self.observer.user_id,
                        error = %e,
                        "observer feed failed permanently"
                    );
                    self.tx.send_modify(|u| u.degraded = true);
                    break;
                }
                Exit::Failed(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        observer = %self.observer.user_id,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "observer feed lost"
                    );
                    self.tx.send_modify(|u| u.degraded = true);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.tx.closed() => break,
                    }
                }
            }
        }
        tracing::debug!(observer = %self.observer.user_id, "observer session ended");
    }

    async fn subscribe_partition(&self, group_id: &str) -> Result<PresenceFeed, CoordError> {
        let feed = self.presence.subscribe(group_id).await?;
        let tag = group_id.to_string();
        let end_tag = tag.clone();
        let ended = stream::once(async move {
            let err = CoordError::UpstreamUnavailable(format!("presence feed {end_tag} ended"));
            (end_tag, Err(err))
        });
        Ok(feed.map(move |item| (tag.clone(), item)).chain(ended).boxed())
    }

    async fn follow(&mut self, backoff: &mut Backoff) -> Exit {
        match self.follow_inner(backoff).await {
            Ok(()) => Exit::Closed,
            Err(exit) => exit,
        }
    }

    async fn follow_inner(&mut self, backoff: &mut Backoff) -> Result<(), Exit> {
        let mut incidents = self.emergencies.subscribe(EmergencyScope::All).await?;
        let mut feeds: SelectAll<PresenceFeed> = SelectAll::new();
        let mut followed: HashSet<String> = HashSet::new();

        let mut groups = match self.observer.role {
            Role::Attendee => {
                let own = self.observer.group_id.clone();
                feeds.push(self.subscribe_partition(&own).await?);
                followed.insert(own);
                None
            }
            Role::Volunteer | Role::Organizer => Some(self.presence.subscribe_groups().await?),
        };
        self.partitions.retain(|g, _| followed.contains(g) || groups.is_some());
        backoff.reset();

        loop {
            tokio::select! {
                item = incidents.next() => match item {
                    Some(Ok(list)) => self.incidents = list,
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(CoordError::UpstreamUnavailable("emergency feed ended".into()).into()),
                },
                Some((group_id, item)) = feeds.next(), if !feeds.is_empty() => {
                    self.partitions.insert(group_id, item?);
                }
                item = next_or_pending(&mut groups) => match item {
                    Some(Ok(group_ids)) => {
                        for group_id in group_ids {
                            if followed.insert(group_id.clone()) {
                                feeds.push(self.subscribe_partition(&group_id).await?);
                            }
                        }
                        continue;
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(CoordError::UpstreamUnavailable("group feed ended".into()).into()),
                },
                changed = self.zoom.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                    self.observer.zoom = *self.zoom.borrow_and_update();
                }
                _ = self.tx.closed() => return Ok(()),
            }
            self.publish();
        }
    }

    fn own_flag(&self) -> bool {
        let flagged = self
            .partitions
            .values()
            .flatten()
            .any(|p| p.user_id == self.observer.user_id && p.emergency_flag);
        flagged
            || self
                .incidents
                .iter()
                .any(|e| e.is_open() && e.attendee_id == self.observer.user_id)
    }

    fn publish(&self) {
        let view = visible_set(
            &self.observer,
            &self.partitions,
            &self.incidents,
            &self.settings.visibility,
            Utc::now(),
        );
        let cadence = self.settings.cadence.for_flag(self.own_flag());
        self.tx.send_if_modified(|current| {
            if current.view == view && current.cadence == cadence && !current.degraded {
                return false;
            }
            current.version += 1;
            current.view = view;
            current.cadence = cadence;
            current.degraded = false;
            current.generated_at = Utc::now();
            true
        });
    }
}

async fn next_or_pending<S>(feed: &mut Option<S>) -> Option<S::Item>
where
    S: futures_util::Stream + Unpin,
{
    match feed {
        Some(feed) => feed.next().await,
        None => std::future::pending().await,
    }
}
