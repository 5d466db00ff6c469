use serde::Deserialize;

use crate::models::{Coordinates, ResponseEvent};

#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub message: Option<String>,
}

impl ActivateRequest {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }
}

#[derive(Debug, Deserialize)]
pub struct IdQuery {
    pub emergency_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub emergency_id: String,
    pub event: ResponseEvent,
}

#[derive(Debug, Deserialize)]
pub struct LocationRequest {
    pub emergency_id: String,
    pub latitude: f64,
    pub longitude: f64,
}
