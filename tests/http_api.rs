use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use tower::ServiceExt;

use beacon::{
    AppState,
    config::Config,
    models::Role,
    notify::LogDispatcher,
    router::build_router,
    store::{MemoryEmergencyStore, MemoryPresenceStore},
    utils::{Claims, error_codes},
};

struct TestApp {
    router: Router,
    emergencies: Arc<MemoryEmergencyStore>,
}

fn app() -> TestApp {
    let emergencies = Arc::new(MemoryEmergencyStore::new());
    let state = AppState::new(
        Config::default(),
        Arc::new(MemoryPresenceStore::new()),
        emergencies.clone(),
        Arc::new(LogDispatcher),
    );
    TestApp {
        router: build_router(state),
        emergencies,
    }
}

fn token(user_id: &str, role: Role, group_id: &str) -> String {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.into(),
        exp: now + 3600,
        iat: now,
        role,
        group_id: group_id.into(),
        membership_version: 1,
        name: Some(format!("{user_id} name")),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(Config::default().jwt_secret.as_bytes()),
    )
    .unwrap()
}

async fn call(
    router: &Router,
    method: Method,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(bearer) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {bearer}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn here() -> Value {
    json!({ "latitude": 35.6586, "longitude": 139.7454 })
}

#[tokio::test]
async fn requests_without_a_valid_token_are_rejected() {
    let app = app();
    let (status, body) = call(&app.router, Method::GET, "/api/emergencies/active", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], error_codes::AUTH_FAILED);

    let (status, _) = call(
        &app.router,
        Method::GET,
        "/api/emergencies/active",
        Some("not-a-jwt"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn attendee_activation_and_duplicate() {
    let app = app();
    let attendee = token("A", Role::Attendee, "g1");

    let (status, body) = call(
        &app.router,
        Method::POST,
        "/api/emergencies/activate",
        Some(&attendee),
        Some(json!({ "latitude": 35.6586, "longitude": 139.7454, "message": "help" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["code"], error_codes::SUCCESS);
    assert_eq!(body["resp_data"]["attendee_id"], "A");
    assert_eq!(body["resp_data"]["status"], "Active");

    let (status, body) = call(
        &app.router,
        Method::POST,
        "/api/emergencies/activate",
        Some(&attendee),
        Some(here()),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], error_codes::ALREADY_ACTIVE);
}

#[tokio::test]
async fn only_attendees_activate_and_only_staff_respond() {
    let app = app();
    let volunteer = token("V1", Role::Volunteer, "g1");
    let attendee = token("A", Role::Attendee, "g1");

    let (status, body) = call(
        &app.router,
        Method::POST,
        "/api/emergencies/activate",
        Some(&volunteer),
        Some(here()),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], error_codes::PERMISSION_DENIED);

    let (_, created) = call(
        &app.router,
        Method::POST,
        "/api/emergencies/toggle",
        Some(&attendee),
        Some(here()),
    )
    .await;
    let emergency_id = created["resp_data"]["emergency_id"].as_str().unwrap().to_string();

    let (status, _) = call(
        &app.router,
        Method::POST,
        "/api/emergencies/respond",
        Some(&attendee),
        Some(json!({ "emergency_id": emergency_id, "event": { "type": "Advance" } })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(
        &app.router,
        Method::POST,
        "/api/emergencies/respond",
        Some(&volunteer),
        Some(json!({ "emergency_id": emergency_id, "event": { "type": "Advance" } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resp_data"]["status"], "Notified");
    assert_eq!(body["resp_data"]["display_name"], "V1 name");

    let (status, body) = call(
        &app.router,
        Method::POST,
        "/api/emergencies/respond",
        Some(&volunteer),
        Some(json!({
            "emergency_id": emergency_id,
            "event": { "type": "AdvanceTo", "target": "Arrived" }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], error_codes::INVALID_TRANSITION);
}

#[tokio::test]
async fn emergencies_are_scoped_for_attendees() {
    let app = app();
    let attendee = token("A", Role::Attendee, "g1");
    let outsider = token("X", Role::Attendee, "g2");
    let organizer = token("O1", Role::Organizer, "g2");

    let (_, created) = call(
        &app.router,
        Method::POST,
        "/api/emergencies/activate",
        Some(&attendee),
        Some(here()),
    )
    .await;
    let emergency_id = created["resp_data"]["emergency_id"].as_str().unwrap().to_string();
    let by_id = format!("/api/emergencies/by-id?emergency_id={emergency_id}");

    let (status, _) = call(&app.router, Method::GET, &by_id, Some(&outsider), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(&app.router, Method::GET, &by_id, Some(&organizer), None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, listed) = call(
        &app.router,
        Method::GET,
        "/api/emergencies/active",
        Some(&outsider),
        None,
    )
    .await;
    assert_eq!(listed["resp_data"], json!([]));

    let (_, listed) = call(
        &app.router,
        Method::GET,
        "/api/emergencies/active",
        Some(&organizer),
        None,
    )
    .await;
    assert_eq!(listed["resp_data"].as_array().unwrap().len(), 1);

    let (status, body) = call(
        &app.router,
        Method::GET,
        "/api/emergencies/by-id?emergency_id=missing",
        Some(&organizer),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], error_codes::NOT_FOUND);
}

#[tokio::test]
async fn presence_write_returns_cadence_for_emergency_state() {
    let app = app();
    let attendee = token("A", Role::Attendee, "g1");

    let (status, body) = call(&app.router, Method::PUT, "/api/presence", Some(&attendee), Some(here())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resp_data"]["presence"]["user_id"], "A");
    assert_eq!(body["resp_data"]["presence"]["group_id"], "g1");
    assert_eq!(body["resp_data"]["cadence"]["interval_secs"], 10);

    call(
        &app.router,
        Method::POST,
        "/api/emergencies/activate",
        Some(&attendee),
        Some(here()),
    )
    .await;

    let (_, body) = call(&app.router, Method::PUT, "/api/presence", Some(&attendee), Some(here())).await;
    assert_eq!(body["resp_data"]["presence"]["emergency_flag"], true);
    assert_eq!(body["resp_data"]["cadence"]["interval_secs"], 3);

    let (status, body) = call(
        &app.router,
        Method::PUT,
        "/api/presence",
        Some(&attendee),
        Some(json!({ "latitude": 123.0, "longitude": 0.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], error_codes::VALIDATION_ERROR);
}

#[tokio::test]
async fn visibility_snapshot_applies_role_rules() {
    let app = app();
    let a1 = token("A1", Role::Attendee, "g1");
    let a2 = token("A2", Role::Attendee, "g1");
    let v1 = token("V1", Role::Volunteer, "g1");

    for bearer in [&a1, &a2, &v1] {
        call(&app.router, Method::PUT, "/api/presence", Some(bearer), Some(here())).await;
    }

    let (status, body) = call(&app.router, Method::GET, "/api/visibility", Some(&a1), None).await;
    assert_eq!(status, StatusCode::OK);
    let users = body["resp_data"]["users"].as_array().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["user_id"], "A2");

    call(
        &app.router,
        Method::POST,
        "/api/emergencies/activate",
        Some(&a2),
        Some(here()),
    )
    .await;
    let (_, body) = call(&app.router, Method::GET, "/api/visibility?zoom=17", Some(&a1), None).await;
    assert_eq!(body["resp_data"]["users"], json!([]));
    assert_eq!(body["resp_data"]["emergencies"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn store_outage_is_reported_as_retryable() {
    let app = app();
    let attendee = token("A", Role::Attendee, "g1");
    app.emergencies.set_available(false);

    let (status, body) = call(
        &app.router,
        Method::POST,
        "/api/emergencies/activate",
        Some(&attendee),
        Some(here()),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], error_codes::UPSTREAM_UNAVAILABLE);
}
