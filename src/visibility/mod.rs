//! Role-scoped selection of presences and incidents an observer may see.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::models::{Coordinates, Emergency, Role, UserPresence};
use crate::proximity::{cap_for_density, is_stale, nearby_staff, sort_by_distance};

/// Presence records keyed by group id.
pub type PresencePartitions = BTreeMap<String, Vec<UserPresence>>;

#[derive(Debug, Clone, PartialEq)]
pub struct Observer {
    pub user_id: String,
    pub role: Role,
    pub group_id: String,
    pub zoom: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
pub struct VisibilityConfig {
    pub staff_radius_meters: f64,
    pub stale_threshold: Duration,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            staff_radius_meters: crate::proximity::DEFAULT_STAFF_RADIUS_METERS,
            stale_threshold: Duration::from_secs(300),
        }
    }
}

impl From<&Config> for VisibilityConfig {
    fn from(config: &Config) -> Self {
        Self {
            staff_radius_meters: config.staff_radius_meters,
            stale_threshold: config.stale_threshold(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VisibleSet {
    pub users: Vec<UserPresence>,
    pub emergencies: Vec<Emergency>,
}

/// Open incidents an observer with this role and group is allowed to see,
/// newest first.
pub fn visible_emergencies(role: Role, group_id: &str, all: &[Emergency]) -> Vec<Emergency> {
    let mut shown: Vec<Emergency> = match role {
        Role::Attendee => all
            .iter()
            .filter(|e| e.is_open() && e.group_id == group_id)
            .cloned()
            .collect(),
        Role::Volunteer | Role::Organizer => all.iter().filter(|e| e.is_open()).cloned().collect(),
    };
    shown.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.emergency_id.cmp(&b.emergency_id))
    });
    shown
}

fn find_self<'a>(observer: &Observer, presence: &'a PresencePartitions) -> Option<&'a UserPresence> {
    presence
        .get(&observer.group_id)
        .and_then(|members| members.iter().find(|p| p.user_id == observer.user_id))
        .or_else(|| {
            presence
                .values()
                .flatten()
                .find(|p| p.user_id == observer.user_id)
        })
}

fn listed_users(
    observer: &Observer,
    presence: &PresencePartitions,
    config: &VisibilityConfig,
    now: DateTime<Utc>,
) -> Vec<UserPresence> {
    let origin: Option<Coordinates> = find_self(observer, presence).map(|p| p.coordinates);

    match observer.role {
        Role::Attendee => {
            let members = presence.get(&observer.group_id).map(Vec::as_slice).unwrap_or(&[]);
            let peers = members.iter().filter(|p| {
                p.role == Role::Attendee
                    && p.user_id != observer.user_id
                    && !is_stale(p, now, config.stale_threshold)
            });
            match origin {
                Some(origin) => sort_by_distance(origin, peers),
                None => by_user_id(peers),
            }
        }
        Role::Volunteer => {
            let Some(origin) = origin else {
                return Vec::new();
            };
            let everyone: Vec<UserPresence> = presence.values().flatten().cloned().collect();
            nearby_staff(origin, config.staff_radius_meters, &everyone, &observer.user_id)
        }
        Role::Organizer => {
            let staff = presence.iter().flat_map(|(group_id, members)| {
                members.iter().filter(move |p| {
                    p.user_id != observer.user_id
                        && match p.role {
                            Role::Volunteer => true,
                            Role::Organizer => *group_id == observer.group_id,
                            Role::Attendee => false,
                        }
                })
            });
            match origin {
                Some(origin) => sort_by_distance(origin, staff),
                None => by_user_id(staff),
            }
        }
    }
}

fn by_user_id<'a>(presences: impl Iterator<Item = &'a UserPresence>) -> Vec<UserPresence> {
    let mut out: Vec<UserPresence> = presences.cloned().collect();
    out.sort_by(|a, b| a.user_id.cmp(&b.user_id));
    out
}

/// Ids of attendees whose incident is still open. They are represented by
/// their incident marker, never by a presence marker.
pub fn active_emergency_user_ids(emergencies: &[Emergency]) -> HashSet<&str> {
    emergencies
        .iter()
        .filter(|e| e.is_open())
        .map(|e| e.attendee_id.as_str())
        .collect()
}

pub fn visible_set(
    observer: &Observer,
    presence: &PresencePartitions,
    emergencies: &[Emergency],
    config: &VisibilityConfig,
    now: DateTime<Utc>,
) -> VisibleSet {
    let in_emergency = active_emergency_user_ids(emergencies);

    let mut users = listed_users(observer, presence, config, now);
    users.retain(|p| !in_emergency.contains(p.user_id.as_str()));

    // A user can appear in more than one partition while switching groups.
    let mut seen = HashSet::new();
    users.retain(|p| seen.insert(p.user_id.clone()));

    if let Some(zoom) = observer.zoom {
        users = cap_for_density(users, zoom);
    }

    VisibleSet {
        users,
        emergencies: visible_emergencies(observer.role, &observer.group_id, emergencies),
    }
}
