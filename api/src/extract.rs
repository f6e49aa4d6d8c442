//! Request extractors that reject with structured `AppError` responses.
//!
//! `AppJson<T>` replaces `axum::Json<T>` so malformed bodies produce the
//! shared JSON error shape instead of axum's plain-text 422.

use axum::{
    Json,
    extract::{FromRequest, FromRequestParts, Request, rejection::JsonRejection},
    http::{HeaderMap, request::Parts},
};
use parley_core::conversation::validate_user_id;
use subtle::ConstantTimeEq;

use crate::error::AppError;
use crate::state::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";

pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(map_json_rejection(rejection)),
        }
    }
}

pub fn map_json_rejection(rejection: JsonRejection) -> AppError {
    let body_text = rejection.body_text();
    let field_hint = extract_field_from_serde_message(&body_text);

    AppError::Validation {
        message: format!("Invalid request body: {body_text}"),
        field: Some(field_hint.unwrap_or("body".to_string())),
        received: None,
        docs_hint: Some("Check the request body against GET /api-doc/openapi.json.".to_string()),
    }
}

// "missing field `content`" / "unknown field `foo`"
fn extract_field_from_serde_message(msg: &str) -> Option<String> {
    ["missing field `", "unknown field `"].iter().find_map(|marker| {
        let start = msg.find(marker)? + marker.len();
        let after = &msg[start..];
        after.find('`').map(|end| after[..end].to_string())
    })
}

/// The caller's opaque identity key, taken from the `x-user-id` header.
/// Token issuance happens in front of this service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        user_id_from_headers(&parts.headers).map(UserId)
    }
}

fn user_id_from_headers(headers: &HeaderMap) -> Result<String, AppError> {
    let raw = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .ok_or_else(|| AppError::Validation {
            message: format!("Missing {USER_ID_HEADER} header"),
            field: Some(format!("headers.{USER_ID_HEADER}")),
            received: None,
            docs_hint: Some(format!("Send `{USER_ID_HEADER}: <user id>` with every /v1 request.")),
        })?;
    validate_user_id(raw).map_err(|msg| AppError::validation(msg, "headers.x-user-id"))?;
    Ok(raw.to_string())
}

/// Gate for `/v1/admin/*`. Open when no admin token is configured.
#[derive(Debug, Clone, Copy)]
pub struct AdminAccess;

impl FromRequestParts<AppState> for AdminAccess {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        check_admin(state.admin_token.as_deref(), &parts.headers)?;
        Ok(AdminAccess)
    }
}

fn check_admin(expected: Option<&str>, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let presented = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    match presented {
        Some(token) if bool::from(token.as_bytes().ct_eq(expected.as_bytes())) => Ok(()),
        _ => Err(AppError::Unauthorized),
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn extracts_missing_field_name() {
        let msg = "Failed to deserialize: missing field `content` at line 1 column 2";
        assert_eq!(extract_field_from_serde_message(msg), Some("content".to_string()));
    }

    #[test]
    fn extracts_unknown_field_name() {
        let msg = "unknown field `foo`, expected `content`";
        assert_eq!(extract_field_from_serde_message(msg), Some("foo".to_string()));
    }

    #[test]
    fn returns_none_for_generic_error() {
        assert_eq!(extract_field_from_serde_message("invalid type: string, expected u64"), None);
    }

    #[test]
    fn user_id_header_is_required_and_trimmed() {
        assert_eq!(
            user_id_from_headers(&headers(&[(USER_ID_HEADER, " u1 ")])).unwrap(),
            "u1"
        );
        assert!(matches!(
            user_id_from_headers(&HeaderMap::new()),
            Err(AppError::Validation { .. })
        ));
        assert!(matches!(
            user_id_from_headers(&headers(&[(USER_ID_HEADER, "   ")])),
            Err(AppError::Validation { .. })
        ));
    }

    #[test]
    fn admin_check_is_open_without_token() {
        assert!(check_admin(None, &HeaderMap::new()).is_ok());
    }

    #[test]
    fn admin_check_requires_matching_bearer() {
        assert!(check_admin(Some("s3cret"), &headers(&[("authorization", "Bearer s3cret")])).is_ok());
        assert!(matches!(
            check_admin(Some("s3cret"), &headers(&[("authorization", "Bearer nope")])),
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            check_admin(Some("s3cret"), &HeaderMap::new()),
            Err(AppError::Unauthorized)
        ));
    }

    #[test]
    fn admin_check_rejects_prefix_and_extension_of_token() {
        for presented in ["Bearer s3cre", "Bearer s3cret2", "Bearer ", "s3cret"] {
            assert!(
                matches!(
                    check_admin(Some("s3cret"), &headers(&[("authorization", presented)])),
                    Err(AppError::Unauthorized)
                ),
                "{presented}"
            );
        }
    }
}
