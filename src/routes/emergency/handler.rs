use axum::{
    Extension,
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::AppState;
use crate::error::{AppError, CoordError};
use crate::models::{Coordinates, Role};
use crate::utils::{Claims, success_to_api_response};

use super::model::{ActivateRequest, IdQuery, LocationRequest, RespondRequest};

fn require_attendee(claims: &Claims) -> Result<(), CoordError> {
    match claims.role {
        Role::Attendee => Ok(()),
        Role::Volunteer | Role::Organizer => Err(CoordError::Forbidden(
            "only attendees raise emergencies".into(),
        )),
    }
}

fn require_staff(claims: &Claims) -> Result<(), CoordError> {
    if claims.role.is_staff() {
        Ok(())
    } else {
        Err(CoordError::Forbidden("only staff respond to emergencies".into()))
    }
}

#[axum::debug_handler]
pub async fn toggle(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ActivateRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_attendee(&claims)?;
    let coordinates = req.coordinates();
    let emergency = state
        .coordinator
        .toggle(&claims.sub, &claims.group_id, coordinates, req.message)
        .await?;
    Ok((StatusCode::OK, success_to_api_response(emergency)))
}

#[axum::debug_handler]
pub async fn activate(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ActivateRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_attendee(&claims)?;
    let coordinates = req.coordinates();
    let emergency = state
        .coordinator
        .activate(&claims.sub, &claims.group_id, coordinates, req.message)
        .await?;
    Ok((StatusCode::CREATED, success_to_api_response(emergency)))
}

#[axum::debug_handler]
pub async fn deactivate(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    require_attendee(&claims)?;
    let emergency = state.coordinator.deactivate(&claims.sub).await?;
    Ok((StatusCode::OK, success_to_api_response(emergency)))
}

pub async fn active(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let emergencies = state
        .coordinator
        .list_active_emergencies(claims.role, &claims.group_id)
        .await?;
    Ok((StatusCode::OK, success_to_api_response(emergencies)))
}

pub async fn by_id(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<IdQuery>,
) -> Result<impl IntoResponse, AppError> {
    let emergency = state.coordinator.get(&query.emergency_id).await?;
    if claims.role == Role::Attendee && emergency.group_id != claims.group_id {
        return Err(CoordError::Forbidden(format!("emergency {}", query.emergency_id)).into());
    }
    Ok((StatusCode::OK, success_to_api_response(emergency)))
}

#[axum::debug_handler]
pub async fn respond(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RespondRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_staff(&claims)?;
    let response = state
        .coordinator
        .respond(&req.emergency_id, &claims.sub, claims.display_name(), req.event)
        .await?;
    Ok((StatusCode::OK, success_to_api_response(response)))
}

#[axum::debug_handler]
pub async fn update_location(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<LocationRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_staff(&claims)?;
    let response = state
        .coordinator
        .update_responder_location(
            &req.emergency_id,
            &claims.sub,
            Coordinates::new(req.latitude, req.longitude),
        )
        .await?;
    Ok((StatusCode::OK, success_to_api_response(response)))
}
