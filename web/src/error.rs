use std::error::Error as StdError;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use log::*;
use realtime::{Error as RealtimeError, RealtimeErrorKind};

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error(RealtimeError);

impl StdError for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> core::result::Result<(), std::fmt::Error> {
        write!(fmt, "{}", self.0)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self.0.error_kind {
            RealtimeErrorKind::MalformedEvent => {
                debug!("Rejecting malformed event: {}", self.0);
                (StatusCode::UNPROCESSABLE_ENTITY, "UNPROCESSABLE ENTITY").into_response()
            }
            RealtimeErrorKind::Publish
            | RealtimeErrorKind::MediumConnect
            | RealtimeErrorKind::Subscribe => {
                error!("Pub/sub medium unavailable: {}", self.0);
                (StatusCode::BAD_GATEWAY, "BAD GATEWAY").into_response()
            }
            _ => {
                error!("Internal error: {}", self.0);
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL SERVER ERROR").into_response()
            }
        }
    }
}

impl<E> From<E> for Error
where
    E: Into<RealtimeError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
