use axum::{
    Extension,
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::AppState;
use crate::error::AppError;
use crate::models::{Coordinates, Role, UserPresence};
use crate::session::CadencePolicy;
use crate::utils::{Claims, success_to_api_response};

use super::model::{PresenceAck, UpdatePresenceRequest};

/// Writes the caller's own presence. Identity, role and group always come
/// from the token, never from the body.
#[axum::debug_handler]
pub async fn update_presence(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdatePresenceRequest>,
) -> Result<impl IntoResponse, AppError> {
    let coordinates = Coordinates::new(req.latitude, req.longitude);
    coordinates.validate()?;

    let display_name = req
        .display_name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| claims.display_name().to_string());

    let mut presence = UserPresence::new(
        &claims.sub,
        display_name,
        claims.role,
        &claims.group_id,
        coordinates,
    );
    presence.emergency_flag = match claims.role {
        Role::Attendee => state
            .emergencies
            .find_open_for_attendee(&claims.sub)
            .await?
            .is_some(),
        Role::Volunteer | Role::Organizer => false,
    };

    state.presence.put(presence.clone()).await?;
    tracing::debug!(user_id = %claims.sub, group_id = %claims.group_id, "presence updated");

    let cadence = CadencePolicy::from(&state.config).for_flag(presence.emergency_flag);
    Ok((
        StatusCode::OK,
        success_to_api_response(PresenceAck { presence, cadence }),
    ))
}
