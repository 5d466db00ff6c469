//! Incident and response state machines.
//!
//! The coordinator is the only writer of emergency documents. Emergency
//! documents are read-modify-written under a per-emergency lock; each
//! volunteer's operations are additionally serialized per
//! `(emergency_id, volunteer_id)` and activation toggles per attendee.

mod locks;
mod toggle;

use std::sync::Arc;

use chrono::Utc;

use crate::error::CoordError;
use crate::models::{Coordinates, Emergency, ResponseEvent, Role, VolunteerResponse};
use crate::notify::NotificationDispatcher;
use crate::routing::RoutingProvider;
use crate::store::{EmergencyScope, EmergencyStore, PresenceStore};
use crate::visibility::visible_emergencies;

pub use locks::KeyedLocks;
pub use toggle::OptimisticToggle;

use locks::{attendee_key, emergency_key, response_key};

pub struct EmergencyCoordinator {
    presence: Arc<dyn PresenceStore>,
    emergencies: Arc<dyn EmergencyStore>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    routing: Option<Arc<dyn RoutingProvider>>,
    locks: KeyedLocks,
}

impl EmergencyCoordinator {
    pub fn new(
        presence: Arc<dyn PresenceStore>,
        emergencies: Arc<dyn EmergencyStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            presence,
            emergencies,
            dispatcher,
            routing: None,
            locks: KeyedLocks::new(),
        }
    }

    pub fn with_routing(mut self, routing: Arc<dyn RoutingProvider>) -> Self {
        self.routing = Some(routing);
        self
    }

    /// Declares an emergency for `attendee_id`.
    pub async fn activate(
        &self,
        attendee_id: &str,
        group_id: &str,
        coordinates: Coordinates,
        message: Option<String>,
    ) -> Result<Emergency, CoordError> {
        coordinates.validate()?;
        let emergency = {
            let _attendee = self.locks.lock(attendee_key(attendee_id)).await;
            self.activate_locked(attendee_id, group_id, coordinates, message)
                .await?
        };
        self.fan_out(&emergency).await;
        Ok(emergency)
    }

    /// Records the attendee's confirmation of safety. The incident only
    /// closes once a volunteer has also completed.
    pub async fn deactivate(&self, attendee_id: &str) -> Result<Emergency, CoordError> {
        let (emergency, resolved) = {
            let _attendee = self.locks.lock(attendee_key(attendee_id)).await;
            self.deactivate_locked(attendee_id).await?
        };
        if resolved {
            self.locks.prune();
        }
        Ok(emergency)
    }

    /// Activates when the attendee has no open emergency, else deactivates.
    pub async fn toggle(
        &self,
        attendee_id: &str,
        group_id: &str,
        coordinates: Coordinates,
        message: Option<String>,
    ) -> Result<Emergency, CoordError> {
        let guard = self.locks.lock(attendee_key(attendee_id)).await;
        match self.emergencies.find_open_for_attendee(attendee_id).await? {
            Some(_) => {
                let (emergency, resolved) = self.deactivate_locked(attendee_id).await?;
                drop(guard);
                if resolved {
                    self.locks.prune();
                }
                Ok(emergency)
            }
            None => {
                coordinates.validate()?;
                let emergency = self
                    .activate_locked(attendee_id, group_id, coordinates, message)
                    .await?;
                drop(guard);
                self.fan_out(&emergency).await;
                Ok(emergency)
            }
        }
    }

    async fn activate_locked(
        &self,
        attendee_id: &str,
        group_id: &str,
        coordinates: Coordinates,
        message: Option<String>,
    ) -> Result<Emergency, CoordError> {
        if let Some(open) = self.emergencies.find_open_for_attendee(attendee_id).await? {
            return Err(CoordError::AlreadyActive {
                attendee_id: attendee_id.to_string(),
                emergency_id: open.emergency_id,
            });
        }

        let emergency = Emergency::new(attendee_id, group_id, coordinates, message, Utc::now());
        self.emergencies.put(emergency.clone()).await?;
        tracing::info!(
            emergency_id = %emergency.emergency_id,
            attendee_id,
            group_id,
            "emergency activated"
        );

        self.set_emergency_flag(attendee_id, true).await;
        Ok(emergency)
    }

    // Runs after the attendee lock is released.
    async fn fan_out(&self, emergency: &Emergency) {
        if let Err(e) = self.dispatcher.fan_out(emergency).await {
            tracing::warn!(
                emergency_id = %emergency.emergency_id,
                error = %e,
                "activation fan-out failed"
            );
        }
    }

    async fn deactivate_locked(&self, attendee_id: &str) -> Result<(Emergency, bool), CoordError> {
        let open = self
            .emergencies
            .find_open_for_attendee(attendee_id)
            .await?
            .ok_or_else(|| CoordError::NotFound(format!("open emergency of {attendee_id}")))?;

        let _emergency = self.locks.lock(emergency_key(&open.emergency_id)).await;
        let mut emergency = self.load(&open.emergency_id).await?;
        if emergency.resolution.attendee_confirmed {
            return Ok((emergency, false));
        }

        let resolved = emergency.confirm_by_attendee(Utc::now())?;
        self.emergencies.put(emergency.clone()).await?;
        tracing::info!(
            emergency_id = %emergency.emergency_id,
            resolved,
            "attendee confirmed safety"
        );

        if resolved {
            self.on_resolved(&emergency).await;
        }
        Ok((emergency, resolved))
    }

    /// Applies a volunteer's event to their own response.
    pub async fn respond(
        &self,
        emergency_id: &str,
        volunteer_id: &str,
        display_name: &str,
        event: ResponseEvent,
    ) -> Result<VolunteerResponse, CoordError> {
        let response_guard = self
            .locks
            .lock(response_key(emergency_id, volunteer_id))
            .await;

        let (transition, emergency) = {
            let _emergency = self.locks.lock(emergency_key(emergency_id)).await;
            let mut emergency = self.load(emergency_id).await?;
            let transition =
                emergency.apply_response_event(volunteer_id, display_name, event, Utc::now())?;
            if transition.changed {
                self.emergencies.put(emergency.clone()).await?;
            }
            (transition, emergency)
        };

        if transition.changed {
            tracing::info!(
                emergency_id,
                volunteer_id,
                %event,
                status = %transition.response.status,
                incident = ?emergency.status,
                "response transitioned"
            );
        } else {
            tracing::debug!(emergency_id, volunteer_id, %event, "redelivered response event");
        }

        if transition.resolved {
            self.on_resolved(&emergency).await;
            drop(response_guard);
            self.locks.prune();
        }
        Ok(transition.response)
    }

    /// Updates a volunteer's live location and, when a routing provider is
    /// configured, their route to the incident.
    pub async fn update_responder_location(
        &self,
        emergency_id: &str,
        volunteer_id: &str,
        location: Coordinates,
    ) -> Result<VolunteerResponse, CoordError> {
        location.validate()?;
        let _response = self
            .locks
            .lock(response_key(emergency_id, volunteer_id))
            .await;

        let (response, destination) = {
            let _emergency = self.locks.lock(emergency_key(emergency_id)).await;
            let mut emergency = self.load(emergency_id).await?;
            let response = emergency
                .locate_responder(volunteer_id, location, Utc::now())?
                .clone();
            self.emergencies.put(emergency.clone()).await?;
            (response, emergency.coordinates)
        };

        let Some(routing) = &self.routing else {
            return Ok(response);
        };

        // Looked up without holding the emergency lock.
        let estimate = match routing.route(location, destination).await {
            Ok(estimate) => estimate,
            Err(e) => {
                tracing::warn!(emergency_id, volunteer_id, error = %e, "route lookup failed");
                return Ok(response);
            }
        };

        let eta = chrono::Duration::from_std(estimate.duration)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d));
        let Some(eta) = eta else {
            tracing::warn!(
                emergency_id,
                volunteer_id,
                duration_secs = estimate.duration.as_secs(),
                "route duration out of range"
            );
            return Ok(response);
        };

        let _emergency = self.locks.lock(emergency_key(emergency_id)).await;
        let mut emergency = self.load(emergency_id).await?;
        let response =
            emergency.attach_route(volunteer_id, estimate.points, estimate.distance_meters, eta)?;
        self.emergencies.put(emergency).await?;
        Ok(response)
    }

    pub async fn get(&self, emergency_id: &str) -> Result<Emergency, CoordError> {
        self.load(emergency_id).await
    }

    /// Open incidents visible to an observer with this role and group.
    pub async fn list_active_emergencies(
        &self,
        observer_role: Role,
        observer_group_id: &str,
    ) -> Result<Vec<Emergency>, CoordError> {
        let scope = match observer_role {
            Role::Attendee => EmergencyScope::Group(observer_group_id.to_string()),
            Role::Volunteer | Role::Organizer => EmergencyScope::All,
        };
        let open = self.emergencies.list_open(&scope).await?;
        Ok(visible_emergencies(observer_role, observer_group_id, &open))
    }

    async fn load(&self, emergency_id: &str) -> Result<Emergency, CoordError> {
        self.emergencies
            .get(emergency_id)
            .await?
            .ok_or_else(|| CoordError::NotFound(format!("emergency {emergency_id}")))
    }

    async fn on_resolved(&self, emergency: &Emergency) {
        tracing::info!(
            emergency_id = %emergency.emergency_id,
            responders = emergency.responses.len(),
            "emergency resolved"
        );
        self.set_emergency_flag(&emergency.attendee_id, false).await;
    }

    // The incident document is authoritative; a presence write failure only
    // delays the marker switch until the owner's next location tick.
    async fn set_emergency_flag(&self, user_id: &str, flag: bool) {
        let presence = match self.presence.find(user_id).await {
            Ok(Some(p)) => p,
            Ok(None) => {
                tracing::debug!(user_id, "no presence record to flag");
                return;
            }
            Err(e) => {
                tracing::warn!(user_id, error = %e, "could not read presence");
                return;
            }
        };
        if presence.emergency_flag == flag {
            return;
        }
        let mut presence = presence;
        presence.emergency_flag = flag;
        if let Err(e) = self.presence.put(presence).await {
            tracing::warn!(user_id, flag, error = %e, "could not update emergency flag");
        }
    }
}
