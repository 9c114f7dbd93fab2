//! API error types with HTTP response mapping.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use serde_json::{Value, json};
use store::StoreError;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
///
/// Every error renders as `{"error": .., "code": ..}`, plus the offending
/// `field` or resource where one is known.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed path or body.
    #[error("{message}")]
    BadRequest {
        field: Option<&'static str>,
        message: String,
    },

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl ApiError {
    pub fn bad_request(field: &'static str, message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            field: Some(field),
            message: message.into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonDataError(e) => invalid_input(&e.body_text()),
            other => ApiError::BadRequest {
                field: None,
                message: other.body_text(),
            },
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        invalid_input(&rejection.body_text())
    }
}

/// Turns a deserializer report such as
/// `Failed to deserialize ...: payment_method: unknown variant ...` into a
/// validation error on the named field.
fn invalid_input(text: &str) -> ApiError {
    let detail = text.split_once(": ").map_or(text, |(_, rest)| rest);
    let detail = detail
        .rsplit_once(" at line ")
        .map_or(detail, |(head, _)| head);

    let (field, message) = match detail.split_once(": ") {
        Some((path, message)) if !path.is_empty() && !path.contains(' ') => {
            (Some(path.to_string()), message)
        }
        _ => (missing_field(detail), detail),
    };
    match field {
        Some(field) => DomainError::validation(field, message).into(),
        None => ApiError::BadRequest {
            field: None,
            message: detail.to_string(),
        },
    }
}

fn missing_field(detail: &str) -> Option<String> {
    let rest = detail.strip_prefix("missing field `")?;
    rest.split_once('`').map(|(name, _)| name.to_string())
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest { field, message } => (
                StatusCode::BAD_REQUEST,
                json!({ "error": message, "code": "bad_request", "field": field }),
            ),
            ApiError::Domain(err) => domain_error_body(err),
        };
        (status, Json(body)).into_response()
    }
}

fn domain_error_body(err: DomainError) -> (StatusCode, Value) {
    let message = err.to_string();
    match err {
        DomainError::Validation { field, message } => (
            StatusCode::BAD_REQUEST,
            json!({ "error": message, "code": "validation_error", "field": field }),
        ),
        DomainError::InsufficientStock {
            product_id,
            requested,
            available,
            ..
        } => (
            StatusCode::BAD_REQUEST,
            json!({
                "error": message,
                "code": "insufficient_stock",
                "product_id": product_id,
                "requested": requested,
                "available": available,
            }),
        ),
        DomainError::InvalidCartSelection { missing } => (
            StatusCode::BAD_REQUEST,
            json!({
                "error": message,
                "code": "invalid_cart_selection",
                "field": "cart_items",
                "missing": missing,
            }),
        ),
        DomainError::InvalidTransition { from, action } => (
            StatusCode::BAD_REQUEST,
            json!({
                "error": message,
                "code": "invalid_transition",
                "status": from,
                "action": action,
            }),
        ),
        DomainError::InvalidHierarchy(_) => (
            StatusCode::BAD_REQUEST,
            json!({ "error": message, "code": "invalid_hierarchy", "field": "parent_id" }),
        ),
        DomainError::NotFound { entity, .. } => (
            StatusCode::NOT_FOUND,
            json!({ "error": message, "code": "not_found", "resource": entity }),
        ),
        DomainError::Unauthorized(_) => (
            StatusCode::UNAUTHORIZED,
            json!({ "error": message, "code": "unauthorized" }),
        ),
        DomainError::Forbidden(_) => (
            StatusCode::FORBIDDEN,
            json!({ "error": message, "code": "forbidden" }),
        ),
        DomainError::Conflict(_) | DomainError::Store(StoreError::StatusConflict { .. }) => (
            StatusCode::CONFLICT,
            json!({ "error": message, "code": "conflict" }),
        ),
        DomainError::Store(e) => {
            tracing::error!(error = %e, "store failure");
            internal()
        }
    }
}

fn internal() -> (StatusCode, Value) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({ "error": "Internal server error", "code": "internal_error" }),
    )
}

#[cfg(test)]
mod tests {
    use common::{CartItemId, ProductId};

    use super::*;

    async fn render(err: ApiError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn validation_names_the_field() {
        let (status, body) =
            render(DomainError::validation("quantity", "must be at least 1").into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation_error");
        assert_eq!(body["field"], "quantity");
        assert_eq!(body["error"], "must be at least 1");
    }

    #[tokio::test]
    async fn stock_and_selection_errors_are_bad_requests() {
        let product_id = ProductId::new();
        let (status, body) = render(
            DomainError::InsufficientStock {
                product_id,
                product_name: "Lamp".to_string(),
                requested: 3,
                available: 1,
            }
            .into(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "insufficient_stock");
        assert_eq!(body["product_id"], product_id.to_string());
        assert_eq!(body["available"], 1);

        let (status, body) = render(
            DomainError::InvalidCartSelection {
                missing: vec![CartItemId::new()],
            }
            .into(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "cart_items");
        assert_eq!(body["missing"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn access_errors_map_to_their_statuses() {
        let cases = [
            (
                DomainError::Unauthorized("no token".to_string()),
                StatusCode::UNAUTHORIZED,
            ),
            (
                DomainError::Forbidden("not yours".to_string()),
                StatusCode::FORBIDDEN,
            ),
            (
                DomainError::NotFound {
                    entity: "order",
                    id: "x".to_string(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                DomainError::Conflict("slug taken".to_string()),
                StatusCode::CONFLICT,
            ),
        ];
        for (err, expected) in cases {
            let (status, _) = render(err.into()).await;
            assert_eq!(status, expected);
        }
    }

    #[tokio::test]
    async fn deserializer_reports_name_the_field() {
        let (status, body) = render(invalid_input(
            "Failed to deserialize the JSON body into the target type: payment_method: \
             unknown variant `bitcoin`, expected one of `card`, `bank_transfer` at line 1 column 29",
        ))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation_error");
        assert_eq!(body["field"], "payment_method");
        assert!(body["error"].as_str().unwrap().starts_with("unknown variant `bitcoin`"));

        let (_, body) = render(invalid_input(
            "Failed to deserialize the JSON body into the target type: \
             missing field `recipient_name` at line 1 column 2",
        ))
        .await;
        assert_eq!(body["field"], "recipient_name");

        let (status, body) =
            render(invalid_input("Failed to deserialize query string: expected a map")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "bad_request");
        assert!(body["field"].is_null());
    }

    #[tokio::test]
    async fn store_failures_do_not_leak_details() {
        let err = DomainError::Store(StoreError::Decode("bad status 'x'".to_string()));
        let (status, body) = render(err.into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");
    }
}
