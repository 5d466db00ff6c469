use axum::Json;
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::models::Role;

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resp_data: Option<T>,
}

/// Bearer token claims. Tokens are issued by the membership service; the
/// role and group in here are the caller's capability for this engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub exp: i64,
    pub iat: i64,
    pub role: Role,
    pub group_id: String,
    #[serde(default)]
    pub membership_version: u64,
    #[serde(default)]
    pub name: Option<String>,
}

impl Claims {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.sub)
    }
}

pub fn verify_token(token: &str, config: &Config) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

pub fn success_to_api_response<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        code: error_codes::SUCCESS,
        msg: "success".into(),
        resp_data: Some(data),
    })
}

pub fn error_to_api_response<T>(code: i32, msg: String) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        code,
        msg,
        resp_data: None,
    })
}

pub mod error_codes {
    pub const SUCCESS: i32 = 0;
    pub const VALIDATION_ERROR: i32 = 1000;
    pub const AUTH_FAILED: i32 = 1002;
    pub const PERMISSION_DENIED: i32 = 1003;
    pub const NOT_FOUND: i32 = 1004;
    pub const ALREADY_ACTIVE: i32 = 2001;
    pub const INVALID_TRANSITION: i32 = 2002;
    pub const INCIDENT_CLOSED: i32 = 2003;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const UPSTREAM_UNAVAILABLE: i32 = 5003;
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn claims(exp: i64) -> Claims {
        Claims {
            sub: "u1".into(),
            exp,
            iat: chrono::Utc::now().timestamp(),
            role: Role::Volunteer,
            group_id: "g1".into(),
            membership_version: 3,
            name: None,
        }
    }

    #[test]
    fn verifies_token_signed_with_shared_secret() {
        let config = Config::default();
        let exp = chrono::Utc::now().timestamp() + 3600;
        let token = encode(
            &Header::default(),
            &claims(exp),
            &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
        )
        .unwrap();

        let decoded = verify_token(&token, &config).unwrap();
        assert_eq!(decoded.sub, "u1");
        assert_eq!(decoded.role, Role::Volunteer);
        assert_eq!(decoded.membership_version, 3);
        assert_eq!(decoded.display_name(), "u1");
    }

    #[test]
    fn rejects_token_with_wrong_secret() {
        let config = Config::default();
        let exp = chrono::Utc::now().timestamp() + 3600;
        let token = encode(
            &Header::default(),
            &claims(exp),
            &EncodingKey::from_secret(b"someone-else"),
        )
        .unwrap();
        assert!(verify_token(&token, &config).is_err());
    }

    #[test]
    fn error_response_has_no_payload() {
        let Json(body) = error_to_api_response::<()>(error_codes::NOT_FOUND, "gone".into());
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["code"], 1004);
        assert!(json.get("resp_data").is_none());
    }
}
