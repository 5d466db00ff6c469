use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::presence::Coordinates;
use crate::error::CoordError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmergencyStatus {
    Active,
    InProgress,
    Resolved,
}

impl EmergencyStatus {
    pub const fn is_open(self) -> bool {
        !matches!(self, EmergencyStatus::Resolved)
    }
}

/// Lifecycle of one volunteer's engagement with an incident.
///
/// The forward order is `Notified → Responding → EnRoute → Arrived →
/// Assisting → Completed`. `Unavailable` is reachable from any
/// non-terminal state and is itself terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    Notified,
    Responding,
    EnRoute,
    Arrived,
    Assisting,
    Completed,
    Unavailable,
}

impl ResponseStatus {
    pub const fn next(self) -> Option<Self> {
        match self {
            ResponseStatus::Notified => Some(ResponseStatus::Responding),
            ResponseStatus::Responding => Some(ResponseStatus::EnRoute),
            ResponseStatus::EnRoute => Some(ResponseStatus::Arrived),
            ResponseStatus::Arrived => Some(ResponseStatus::Assisting),
            ResponseStatus::Assisting => Some(ResponseStatus::Completed),
            ResponseStatus::Completed | ResponseStatus::Unavailable => None,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, ResponseStatus::Completed | ResponseStatus::Unavailable)
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What a volunteer asks the coordinator to do with their response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "target")]
pub enum ResponseEvent {
    /// Register as notified. A no-op once a response exists.
    Acknowledge,
    /// Move exactly one step forward.
    Advance,
    /// Move forward to the named state; a no-op if already there.
    AdvanceTo(ResponseStatus),
    MarkUnavailable,
}

impl fmt::Display for ResponseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseEvent::Acknowledge => f.write_str("Acknowledge"),
            ResponseEvent::Advance => f.write_str("Advance"),
            ResponseEvent::AdvanceTo(target) => write!(f, "AdvanceTo({target})"),
            ResponseEvent::MarkUnavailable => f.write_str("MarkUnavailable"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionState {
    pub attendee_confirmed: bool,
    pub volunteer_completed: bool,
}

impl ResolutionState {
    pub const fn is_satisfied(&self) -> bool {
        self.attendee_confirmed && self.volunteer_completed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolunteerResponse {
    pub volunteer_id: String,
    pub display_name: String,
    pub status: ResponseStatus,
    pub responded_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub current_location: Option<Coordinates>,
    pub route_points: Option<Vec<Coordinates>>,
    pub route_distance_meters: Option<f64>,
    pub eta: Option<DateTime<Utc>>,
}

impl VolunteerResponse {
    fn new(volunteer_id: &str, display_name: &str, status: ResponseStatus, now: DateTime<Utc>) -> Self {
        Self {
            volunteer_id: volunteer_id.to_string(),
            display_name: display_name.to_string(),
            status,
            responded_at: now,
            last_updated: now,
            current_location: None,
            route_points: None,
            route_distance_meters: None,
            eta: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Emergency {
    pub emergency_id: String,
    pub attendee_id: String,
    pub group_id: String,
    pub coordinates: Coordinates,
    pub message: Option<String>,
    pub status: EmergencyStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub responses: BTreeMap<String, VolunteerResponse>,
    pub resolution: ResolutionState,
}

/// Result of applying one event to an emergency.
#[derive(Debug, Clone)]
pub struct Transition {
    pub response: VolunteerResponse,
    /// False when the event was a redelivery and nothing changed.
    pub changed: bool,
    /// True when this event closed the incident.
    pub resolved: bool,
}

impl Emergency {
    pub fn new(
        attendee_id: &str,
        group_id: &str,
        coordinates: Coordinates,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            emergency_id: Uuid::new_v4().to_string(),
            attendee_id: attendee_id.to_string(),
            group_id: group_id.to_string(),
            coordinates,
            message: message.filter(|m| !m.trim().is_empty()),
            status: EmergencyStatus::Active,
            created_at: now,
            updated_at: now,
            responses: BTreeMap::new(),
            resolution: ResolutionState::default(),
        }
    }

    pub const fn is_open(&self) -> bool {
        self.status.is_open()
    }

    fn ensure_open(&self) -> Result<(), CoordError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoordError::IncidentClosed(self.emergency_id.clone()))
        }
    }

    /// Applies a volunteer's event to their own response entry.
    pub fn apply_response_event(
        &mut self,
        volunteer_id: &str,
        display_name: &str,
        event: ResponseEvent,
        now: DateTime<Utc>,
    ) -> Result<Transition, CoordError> {
        self.ensure_open()?;

        let current = self.responses.get(volunteer_id).map(|r| r.status);
        let (target, engaged) = match (current, event) {
            (None, ResponseEvent::Acknowledge) => (ResponseStatus::Notified, false),
            // The first advance brings the volunteer into the lifecycle and
            // counts as engagement with the incident.
            (None, ResponseEvent::Advance)
            | (None, ResponseEvent::AdvanceTo(ResponseStatus::Notified)) => {
                (ResponseStatus::Notified, true)
            }
            (None, ResponseEvent::MarkUnavailable) => (ResponseStatus::Unavailable, false),
            (None, ResponseEvent::AdvanceTo(_)) => {
                return Err(CoordError::InvalidTransition {
                    from: "None".to_string(),
                    event: event.to_string(),
                });
            }
            (Some(_), ResponseEvent::Acknowledge) => return Ok(self.unchanged(volunteer_id)),
            (Some(from), ResponseEvent::Advance) => match from.next() {
                Some(next) => (next, true),
                None => return Err(invalid(from, event)),
            },
            (Some(from), ResponseEvent::AdvanceTo(to)) if from == to => {
                return Ok(self.unchanged(volunteer_id));
            }
            (Some(from), ResponseEvent::AdvanceTo(to)) => {
                if from.next() == Some(to) {
                    (to, true)
                } else {
                    return Err(invalid(from, event));
                }
            }
            (Some(ResponseStatus::Unavailable), ResponseEvent::MarkUnavailable) => {
                return Ok(self.unchanged(volunteer_id));
            }
            (Some(ResponseStatus::Completed), ResponseEvent::MarkUnavailable) => {
                return Err(invalid(ResponseStatus::Completed, event));
            }
            (Some(_), ResponseEvent::MarkUnavailable) => (ResponseStatus::Unavailable, false),
        };

        let response = self
            .responses
            .entry(volunteer_id.to_string())
            .and_modify(|r| {
                r.status = target;
                r.last_updated = now;
            })
            .or_insert_with(|| VolunteerResponse::new(volunteer_id, display_name, target, now))
            .clone();
        self.updated_at = now;

        if engaged && self.status == EmergencyStatus::Active {
            self.status = EmergencyStatus::InProgress;
        }

        let mut resolved = false;
        if target == ResponseStatus::Completed {
            self.resolution.volunteer_completed = self
                .responses
                .values()
                .any(|r| r.status == ResponseStatus::Completed);
            resolved = self.settle();
        }

        Ok(Transition {
            response,
            changed: true,
            resolved,
        })
    }

    /// Records the attendee's confirmation of safety. Returns true when
    /// this confirmation closed the incident.
    pub fn confirm_by_attendee(&mut self, now: DateTime<Utc>) -> Result<bool, CoordError> {
        self.ensure_open()?;
        if self.resolution.attendee_confirmed {
            return Ok(false);
        }
        self.resolution.attendee_confirmed = true;
        self.updated_at = now;
        Ok(self.settle())
    }

    /// Sets the live location of a volunteer's own response.
    pub fn locate_responder(
        &mut self,
        volunteer_id: &str,
        location: Coordinates,
        now: DateTime<Utc>,
    ) -> Result<&mut VolunteerResponse, CoordError> {
        self.ensure_open()?;
        let response = self
            .responses
            .get_mut(volunteer_id)
            .ok_or_else(|| CoordError::NotFound(format!("response of {volunteer_id}")))?;
        response.current_location = Some(location);
        response.last_updated = now;
        self.updated_at = now;
        Ok(response)
    }

    /// Stores a route from the volunteer to the incident.
    pub fn attach_route(
        &mut self,
        volunteer_id: &str,
        points: Vec<Coordinates>,
        distance_meters: f64,
        eta: DateTime<Utc>,
    ) -> Result<VolunteerResponse, CoordError> {
        self.ensure_open()?;
        let response = self
            .responses
            .get_mut(volunteer_id)
            .ok_or_else(|| CoordError::NotFound(format!("response of {volunteer_id}")))?;
        response.route_points = Some(points);
        response.route_distance_meters = Some(distance_meters);
        response.eta = Some(eta);
        Ok(response.clone())
    }

    // Moves to Resolved iff both resolution flags hold.
    fn settle(&mut self) -> bool {
        if self.resolution.is_satisfied() && self.status != EmergencyStatus::Resolved {
            self.status = EmergencyStatus::Resolved;
            true
        } else {
            false
        }
    }

    fn unchanged(&self, volunteer_id: &str) -> Transition {
        Transition {
            response: self.responses[volunteer_id].clone(),
            changed: false,
            resolved: false,
        }
    }
}

fn invalid(from: ResponseStatus, event: ResponseEvent) -> CoordError {
    CoordError::InvalidTransition {
        from: from.to_string(),
        event: event.to_string(),
    }
}
