use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unauthenticated,
    NoPermission,
    NotFound,
    Validation,
    Conflict,
    BadRequest,
    FetchFail,
    Unexpected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    #[serde(default)]
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// An [`ApiError`] the server answered with, as a Rust error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code:?}: {message}")]
pub struct ApiException {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiException {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<ApiError> for ApiException {
    fn from(value: ApiError) -> Self {
        Self {
            code: value.code,
            message: value.message,
        }
    }
}

/// Envelope every HTTP endpoint answers with: `{"isOk": true, "ok": ..}` or
/// `{"isOk": false, "err": ..}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    rename_all = "camelCase",
    bound(deserialize = "T: serde::de::DeserializeOwned")
)]
pub struct ApiResult<T> {
    pub is_ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<ApiError>,
}

impl<T> ApiResult<T> {
    pub fn ok(value: T) -> Self {
        Self {
            is_ok: true,
            ok: Some(value),
            err: None,
        }
    }

    pub fn err(err: ApiError) -> Self {
        Self {
            is_ok: false,
            ok: None,
            err: Some(err),
        }
    }

    pub fn into_result(self) -> Result<T, ApiError> {
        match (self.is_ok, self.ok, self.err) {
            (true, Some(value), _) => Ok(value),
            (_, _, Some(err)) => Err(err),
            _ => Err(ApiError::new(
                ErrorCode::Unexpected,
                "malformed response envelope",
            )),
        }
    }
}
