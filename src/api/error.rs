//! Maps `NanoError` onto HTTP responses, per the error handling policy
//! table: `Validation`/`Parse` to 400, `NotFound` to 404, `Persistence` to
//! 500, each with a short plain-text cause. Grounded in the teacher's
//! `api::error::ApiError`, kept as a thin newtype rather than duplicating
//! the crate-wide error's variants.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::error::NanoError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub struct ApiError(NanoError);

impl From<NanoError> for ApiError {
    fn from(err: NanoError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            NanoError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            NanoError::Validation(msg) | NanoError::Parse(msg) => {
                (StatusCode::BAD_REQUEST, msg.clone())
            }
            NanoError::Persistence(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            NanoError::Transport(msg) | NanoError::Transient(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
        };
        (status, message).into_response()
    }
}
