use axum::extract::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::env;
use std::fmt::Debug;

#[derive(Debug)]
pub struct Error {
    pub code: i32,
    pub message: String,
}

// internal faults are 1..=99, caller errors are >= 100
pub const CODE_ENV_VAR: i32 = 1;
pub const CODE_DATABASE: i32 = 2;
pub const CODE_INVALID_INVOCATION: i32 = 100;
pub const CODE_INVALID_INPUT: i32 = 101;
pub const CODE_NOT_FOUND: i32 = 102;
pub const CODE_OFFER_NOT_FOUND: i32 = 103;
pub const CODE_RIDE_ALREADY_ASSIGNED: i32 = 104;
pub const CODE_PAIRING_CONFLICT: i32 = 105;

impl From<env::VarError> for Error {
    fn from(err: env::VarError) -> Self {
        env_var_error(err)
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        database_error(err)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_message) = match self.code {
            1..=99 => (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"),
            CODE_NOT_FOUND => (StatusCode::NOT_FOUND, self.message.as_str()),
            CODE_RIDE_ALREADY_ASSIGNED | CODE_PAIRING_CONFLICT => {
                (StatusCode::CONFLICT, self.message.as_str())
            }
            _ => (StatusCode::BAD_REQUEST, self.message.as_str()),
        };

        let body = Json(json!({
            "code": self.code,
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

pub fn invalid_invocation_error() -> Error {
    Error {
        code: CODE_INVALID_INVOCATION,
        message: "invalid state transition".into(),
    }
}

pub fn invalid_input_error() -> Error {
    Error {
        code: CODE_INVALID_INPUT,
        message: "invalid input".into(),
    }
}

pub fn not_found_error() -> Error {
    Error {
        code: CODE_NOT_FOUND,
        message: "not found".into(),
    }
}

pub fn offer_not_found_error() -> Error {
    Error {
        code: CODE_OFFER_NOT_FOUND,
        message: "offer not found".into(),
    }
}

pub fn ride_already_assigned_error() -> Error {
    Error {
        code: CODE_RIDE_ALREADY_ASSIGNED,
        message: "ride already assigned".into(),
    }
}

pub fn pairing_conflict_error() -> Error {
    Error {
        code: CODE_PAIRING_CONFLICT,
        message: "ride already paired".into(),
    }
}

pub fn env_var_error(_: env::VarError) -> Error {
    Error {
        code: CODE_ENV_VAR,
        message: "environment variable error".into(),
    }
}

pub fn database_error<T: Debug>(_: T) -> Error {
    Error {
        code: CODE_DATABASE,
        message: "database error".into(),
    }
}
