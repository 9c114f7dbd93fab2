//! Request handlers grouped by resource.

pub mod admin;
pub mod auth;
pub mod cart;
pub mod catalog;
pub mod orders;
pub mod system;
pub mod ws;

use std::str::FromStr;

use crate::error::ApiError;

/// Parses an identifier taken from the path.
pub(crate) fn parse_id<T: FromStr>(raw: &str, field: &'static str) -> Result<T, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(field, format!("'{raw}' is not a valid id")))
}

/// Decodes an optional JSON body; an empty body yields the default.
pub(crate) fn optional_body<T>(bytes: &[u8]) -> Result<T, ApiError>
where
    T: serde::de::DeserializeOwned + Default,
{
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(bytes).map_err(|e| ApiError::BadRequest {
        field: None,
        message: format!("invalid JSON body: {e}"),
    })
}
