//! Great-circle distance and distance-ordered presence filtering.

use std::cmp::Ordering;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::{Coordinates, UserPresence};

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Radius used for volunteer-to-staff matching.
pub const DEFAULT_STAFF_RADIUS_METERS: f64 = 2_000.0;

/// Haversine distance in meters.
pub fn distance_meters(a: Coordinates, b: Coordinates) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let delta_phi = (b.latitude - a.latitude).to_radians();
    let delta_lambda = (b.longitude - a.longitude).to_radians();

    let h = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_METERS * c
}

fn by_distance_then_id(a: &(f64, &UserPresence), b: &(f64, &UserPresence)) -> Ordering {
    a.0.total_cmp(&b.0)
        .then_with(|| a.1.user_id.cmp(&b.1.user_id))
}

/// Orders presences ascending by distance from `origin`, ties by user id.
pub fn sort_by_distance<'a, I>(origin: Coordinates, presences: I) -> Vec<UserPresence>
where
    I: IntoIterator<Item = &'a UserPresence>,
{
    let mut measured: Vec<(f64, &UserPresence)> = presences
        .into_iter()
        .map(|p| (distance_meters(origin, p.coordinates), p))
        .collect();
    measured.sort_by(by_distance_then_id);
    measured.into_iter().map(|(_, p)| p.clone()).collect()
}

/// Volunteers and organizers within `radius_meters` of `origin`, nearest first.
pub fn nearby_staff(
    origin: Coordinates,
    radius_meters: f64,
    candidates: &[UserPresence],
    exclude_user_id: &str,
) -> Vec<UserPresence> {
    let mut measured: Vec<(f64, &UserPresence)> = candidates
        .iter()
        .filter(|p| p.role.is_staff() && p.user_id != exclude_user_id)
        .map(|p| (distance_meters(origin, p.coordinates), p))
        .filter(|(d, _)| *d <= radius_meters)
        .collect();
    measured.sort_by(by_distance_then_id);
    measured.into_iter().map(|(_, p)| p.clone()).collect()
}

/// Marker budget for a map zoom level.
pub fn density_cap(zoom_level: f64) -> usize {
    if zoom_level >= 16.0 {
        100
    } else if zoom_level >= 14.0 {
        50
    } else if zoom_level >= 12.0 {
        25
    } else {
        10
    }
}

/// Keeps the first `density_cap(zoom_level)` items. Input must already be
/// sorted nearest first; order is preserved.
pub fn cap_for_density<T>(mut sorted: Vec<T>, zoom_level: f64) -> Vec<T> {
    sorted.truncate(density_cap(zoom_level));
    sorted
}

pub fn is_stale(presence: &UserPresence, now: DateTime<Utc>, threshold: Duration) -> bool {
    match (now - presence.last_updated).to_std() {
        Ok(age) => age > threshold,
        // Timestamp in the future: clock skew, treat as fresh.
        Err(_) => false,
    }
}
