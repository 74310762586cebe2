use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use utoipa::ToSchema;

use crate::{enums::AppointmentStatus, platform::db::DieselError};

/// Standard response envelope shared by every route.
#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct StdResponse<T, M> {
    pub data: Option<T>,
    pub message: Option<M>,
}

impl<T: Serialize, M: Serialize> IntoResponse for StdResponse<T, M> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// One field-level problem with the caller's input.
#[derive(Serialize, Debug, Clone, PartialEq, ToSchema)]
pub struct FieldError {
    pub field: String,
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl FieldError {
    pub fn new(field: impl Into<String>, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictCode {
    ActiveAppointmentExists,
    TimeSlotUnavailable,
    DuplicateService,
    PaymentInProgress,
}

impl ConflictCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictCode::ActiveAppointmentExists => "ACTIVE_APPOINTMENT_EXISTS",
            ConflictCode::TimeSlotUnavailable => "TIME_SLOT_UNAVAILABLE",
            ConflictCode::DuplicateService => "DUPLICATE_SERVICE",
            ConflictCode::PaymentInProgress => "PAYMENT_IN_PROGRESS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateCode {
    InvalidStatusTransition,
    InvalidStatus,
    GroomerRequired,
    AlreadyCancelled,
    StatusNotEligible,
    SessionAlreadyActive,
}

impl StateCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateCode::InvalidStatusTransition => "INVALID_STATUS_TRANSITION",
            StateCode::InvalidStatus => "INVALID_STATUS",
            StateCode::GroomerRequired => "GROOMER_REQUIRED",
            StateCode::AlreadyCancelled => "ALREADY_CANCELLED",
            StateCode::StatusNotEligible => "STATUS_NOT_ELIGIBLE",
            StateCode::SessionAlreadyActive => "SESSION_ALREADY_ACTIVE",
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Resource not found")]
    NotFound,

    #[error("{0}")]
    BadRequest(String),

    #[error("Missing or invalid actor context")]
    Unauthorized,

    #[error("{0}")]
    ForbiddenResource(String),

    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    #[error("{message}")]
    Conflict {
        code: ConflictCode,
        message: String,
        conflicting: Option<Value>,
    },

    #[error("{message}")]
    State {
        code: StateCode,
        message: String,
        current_status: AppointmentStatus,
    },

    #[error("{0}")]
    GroomerInvalid(String),

    #[error("{0} is unreachable")]
    ServiceUnreachable(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(
        field: impl Into<String>,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        AppError::Validation(vec![FieldError::new(field, code, message)])
    }

    pub fn state(
        code: StateCode,
        current_status: AppointmentStatus,
        message: impl Into<String>,
    ) -> Self {
        AppError::State {
            code,
            message: message.into(),
            current_status,
        }
    }

    pub fn conflict(
        code: ConflictCode,
        message: impl Into<String>,
        conflicting: Option<Value>,
    ) -> Self {
        AppError::Conflict {
            code,
            message: message.into(),
            conflicting,
        }
    }

    /// Machine-readable code, when the variant carries one.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            AppError::Conflict { code, .. } => Some(code.as_str()),
            AppError::State { code, .. } => Some(code.as_str()),
            AppError::Validation(_) => Some("VALIDATION_ERROR"),
            AppError::GroomerInvalid(_) => Some("GROOMER_INVALID"),
            _ => None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) | AppError::GroomerInvalid(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::ForbiddenResource(_) => StatusCode::FORBIDDEN,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Conflict { .. } | AppError::State { .. } => StatusCode::CONFLICT,
            AppError::ServiceUnreachable(_) => StatusCode::BAD_GATEWAY,
            AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            AppError::Validation(errors) => Some(json!({
                "code": "VALIDATION_ERROR",
                "errors": errors,
            })),
            AppError::Conflict {
                code, conflicting, ..
            } => Some(json!({
                "code": code.as_str(),
                "conflicting": conflicting,
            })),
            AppError::State {
                code,
                current_status,
                ..
            } => Some(json!({
                "code": code.as_str(),
                "current_status": current_status,
            })),
            AppError::GroomerInvalid(_) => Some(json!({ "code": "GROOMER_INVALID" })),
            _ => None,
        }
    }
}

impl From<DieselError> for AppError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => AppError::NotFound,
            other => AppError::Other(other.into()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            AppError::Other(err) => {
                tracing::error!("Internal error: {:?}", err);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        (
            status,
            Json(StdResponse {
                data: self.details(),
                message: Some(message),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diesel_not_found_maps_to_not_found() {
        let err: AppError = DieselError::NotFound.into();
        assert!(matches!(err, AppError::NotFound));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn state_errors_expose_code_and_status() {
        let err = AppError::state(
            StateCode::GroomerRequired,
            AppointmentStatus::Confirmed,
            "A groomer must be assigned first",
        );
        assert_eq!(err.code(), Some("GROOMER_REQUIRED"));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        let details = err.details().unwrap();
        assert_eq!(details["current_status"], "confirmed");
    }

    #[test]
    fn validation_details_list_every_field() {
        let err = AppError::Validation(vec![
            FieldError::new("service_ids[0]", "DUPLICATE_SERVICE", "Nail Trim is already added"),
            FieldError::new("service_ids[1]", "SERVICE_UNAVAILABLE", "Bath is unavailable"),
        ]);
        let details = err.details().unwrap();
        assert_eq!(details["errors"].as_array().unwrap().len(), 2);
        assert_eq!(details["errors"][1]["code"], "SERVICE_UNAVAILABLE");
    }
}
