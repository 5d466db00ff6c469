use std::convert::Infallible;

use axum::{
    Extension,
    extract::{Query, State},
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
};
use chrono::Utc;
use futures_util::{Stream, stream};

use crate::AppState;
use crate::error::AppError;
use crate::models::Role;
use crate::session::{ObserverSession, SessionSettings};
use crate::store::EmergencyScope;
use crate::utils::{Claims, success_to_api_response};
use crate::visibility::{PresencePartitions, VisibilityConfig, visible_set};

use super::model::VisibilityQuery;

/// One-off view for clients that do not hold a stream open.
pub async fn snapshot(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<VisibilityQuery>,
) -> Result<impl IntoResponse, AppError> {
    let observer = query.observer(&claims);
    let partitions = match observer.role {
        Role::Attendee => {
            let members = state.presence.get(&observer.group_id).await?;
            PresencePartitions::from([(observer.group_id.clone(), members)])
        }
        Role::Volunteer | Role::Organizer => state.presence.snapshot().await?,
    };
    let emergencies = state.emergencies.list_open(&EmergencyScope::All).await?;

    let view = visible_set(
        &observer,
        &partitions,
        &emergencies,
        &VisibilityConfig::from(&state.config),
        Utc::now(),
    );
    Ok((StatusCode::OK, success_to_api_response(view)))
}

/// Pushes a fresh view as a server-sent event on every upstream change.
/// The session is released when the client disconnects.
pub async fn stream(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<VisibilityQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let observer = query.observer(&claims);
    tracing::debug!(user_id = %observer.user_id, role = %observer.role, "view stream opened");

    let session = ObserverSession::spawn(
        observer,
        state.presence.clone(),
        state.emergencies.clone(),
        SessionSettings::from(&state.config),
    );
    let updates = session.updates();

    let events = stream::unfold((session, updates), |(session, mut updates)| async move {
        updates.changed().await.ok()?;
        let update = updates.borrow_and_update().clone();
        let event = match Event::default().event("view").json_data(&update) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(error = %e, "could not encode view update");
                Event::default().event("error").data("encode failed")
            }
        };
        Some((Ok(event), (session, updates)))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
