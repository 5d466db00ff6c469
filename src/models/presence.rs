use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoordError;

/// A point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn validate(&self) -> Result<(), CoordError> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(CoordError::Validation(format!(
                "latitude out of range: {}",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(CoordError::Validation(format!(
                "longitude out of range: {}",
                self.longitude
            )));
        }
        Ok(())
    }
}

/// Actor role. Closed on purpose: visibility rules match on it exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Attendee,
    Volunteer,
    Organizer,
}

impl Role {
    pub const fn is_staff(self) -> bool {
        matches!(self, Role::Volunteer | Role::Organizer)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Attendee => "Attendee",
            Role::Volunteer => "Volunteer",
            Role::Organizer => "Organizer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CoordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Attendee" => Ok(Role::Attendee),
            "Volunteer" => Ok(Role::Volunteer),
            "Organizer" => Ok(Role::Organizer),
            other => Err(CoordError::Validation(format!("unknown role: {other}"))),
        }
    }
}

/// Latest known location and status of one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPresence {
    pub user_id: String,
    pub display_name: String,
    pub coordinates: Coordinates,
    pub role: Role,
    pub group_id: String,
    pub emergency_flag: bool,
    pub last_updated: DateTime<Utc>,
}

impl UserPresence {
    pub fn new(
        user_id: impl Into<String>,
        display_name: impl Into<String>,
        role: Role,
        group_id: impl Into<String>,
        coordinates: Coordinates,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            coordinates,
            role,
            group_id: group_id.into(),
            emergency_flag: false,
            last_updated: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_strings() {
        for role in [Role::Attendee, Role::Volunteer, Role::Organizer] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert!(matches!(
            "volunteer".parse::<Role>(),
            Err(CoordError::Validation(_))
        ));
        assert!("Staff".parse::<Role>().is_err());
    }

    #[test]
    fn role_serializes_as_bare_name() {
        let json = serde_json::to_string(&Role::Organizer).unwrap();
        assert_eq!(json, "\"Organizer\"");
    }

    #[test]
    fn coordinates_out_of_range_fail_validation() {
        assert!(Coordinates::new(0.0, 0.0).validate().is_ok());
        assert!(Coordinates::new(90.0, -180.0).validate().is_ok());
        assert!(Coordinates::new(90.5, 0.0).validate().is_err());
        assert!(Coordinates::new(0.0, 181.0).validate().is_err());
        assert!(Coordinates::new(f64::NAN, 0.0).validate().is_err());
    }
}
