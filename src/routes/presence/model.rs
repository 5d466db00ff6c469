use serde::{Deserialize, Serialize};

use crate::models::UserPresence;
use crate::session::LocationCadence;

#[derive(Debug, Deserialize)]
pub struct UpdatePresenceRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub display_name: Option<String>,
}

/// The stored record plus how the client should report from now on.
#[derive(Debug, Serialize)]
pub struct PresenceAck {
    pub presence: UserPresence,
    pub cadence: LocationCadence,
}
