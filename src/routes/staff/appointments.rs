use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use chrono::NaiveDate;
use serde::Deserialize;
use utoipa::IntoParams;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    appointments::{
        Actor,
        commands::{AdjustPricingReq, AssignGroomerReq, UpdateStatusReq},
        store::AppointmentFilter,
        views::{AppointmentDetail, AppointmentView},
    },
    enums::AppointmentStatus,
    platform::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware,
    },
};

/// Staff and shop-owner appointment management.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/staff/appointments",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_appointments))
            .routes(utoipa_axum::routes!(update_status))
            .routes(utoipa_axum::routes!(assign_groomer))
            .routes(utoipa_axum::routes!(adjust_pricing))
            .route_layer(axum::middleware::from_fn(middleware::staff_authorization)),
    )
}

#[derive(Deserialize, Debug, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AppointmentQuery {
    pub owner_id: Option<i32>,
    pub groomer_id: Option<i32>,
    pub status: Option<AppointmentStatus>,
    /// Inclusive; requires `to`.
    pub from: Option<NaiveDate>,
    /// Inclusive; requires `from`.
    pub to: Option<NaiveDate>,
}

impl AppointmentQuery {
    fn into_filter(self) -> Result<AppointmentFilter, AppError> {
        if self.from.is_some() != self.to.is_some() {
            return Err(AppError::BadRequest(
                "from and to must be given together".into(),
            ));
        }
        Ok(AppointmentFilter {
            owner_id: self.owner_id,
            groomer_id: self.groomer_id,
            status: self.status,
            from: self.from,
            to: self.to,
        })
    }
}

/// List appointments by owner, groomer, date range or status.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Staff"],
    security(("actorId" = [], "actorRole" = [])),
    params(AppointmentQuery),
    responses(
        (status = 200, description = "List appointments", body = StdResponse<Vec<AppointmentDetail>, String>)
    )
)]
async fn get_appointments(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<AppointmentQuery>,
) -> Result<impl IntoResponse, AppError> {
    let service = &state.appointments;
    let filter = query.into_filter()?;

    let appointments = match filter {
        AppointmentFilter {
            owner_id: Some(owner_id),
            groomer_id: None,
            status: None,
            from: None,
            to: None,
        } => service.get_by_owner(&actor, owner_id).await?,
        AppointmentFilter {
            owner_id: None,
            groomer_id: Some(groomer_id),
            status: None,
            from: None,
            to: None,
        } => service.get_by_groomer(&actor, groomer_id).await?,
        AppointmentFilter {
            owner_id: None,
            groomer_id: None,
            status: Some(status),
            from: None,
            to: None,
        } => service.get_by_status(&actor, status).await?,
        AppointmentFilter {
            owner_id: None,
            groomer_id: None,
            status: None,
            from: Some(from),
            to: Some(to),
        } => service.get_by_date_range(&actor, from, to).await?,
        filter => service.search(&actor, filter).await?,
    };

    Ok(StdResponse {
        data: Some(appointments),
        message: Some("Get appointments successfully"),
    })
}

#[utoipa::path(
    patch,
    path = "/{id}/status",
    tags = ["Staff"],
    security(("actorId" = [], "actorRole" = [])),
    params(
        ("id" = i32, Path, description = "Appointment ID")
    ),
    request_body = UpdateStatusReq,
    responses(
        (status = 200, description = "Status updated", body = StdResponse<AppointmentView, String>),
        (status = 409, description = "Transition not allowed from the current status")
    )
)]
async fn update_status(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<UpdateStatusReq>,
) -> Result<impl IntoResponse, AppError> {
    let appointment = state.appointments.update_status(&actor, id, body).await?;

    Ok(StdResponse {
        data: Some(appointment),
        message: Some("Appointment status updated successfully"),
    })
}

#[utoipa::path(
    patch,
    path = "/{id}/groomer",
    tags = ["Staff"],
    security(("actorId" = [], "actorRole" = [])),
    params(
        ("id" = i32, Path, description = "Appointment ID")
    ),
    request_body = AssignGroomerReq,
    responses(
        (status = 200, description = "Groomer assigned", body = StdResponse<AppointmentView, String>),
        (status = 400, description = "Groomer missing, inactive or not staff")
    )
)]
async fn assign_groomer(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<AssignGroomerReq>,
) -> Result<impl IntoResponse, AppError> {
    let appointment = state.appointments.assign_groomer(&actor, id, body).await?;

    Ok(StdResponse {
        data: Some(appointment),
        message: Some("Groomer assigned successfully"),
    })
}

/// Apply a discount or change the matted coat fee.
#[utoipa::path(
    patch,
    path = "/{id}/pricing",
    tags = ["Staff"],
    security(("actorId" = [], "actorRole" = [])),
    params(
        ("id" = i32, Path, description = "Appointment ID")
    ),
    request_body = AdjustPricingReq,
    responses(
        (status = 200, description = "Pricing adjusted", body = StdResponse<AppointmentView, String>)
    )
)]
async fn adjust_pricing(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<AdjustPricingReq>,
) -> Result<impl IntoResponse, AppError> {
    let appointment = state.appointments.adjust_pricing(&actor, id, body).await?;

    Ok(StdResponse {
        data: Some(appointment),
        message: Some("Pricing adjusted successfully"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_range_needs_both_ends() {
        let query = AppointmentQuery {
            from: NaiveDate::from_ymd_opt(2026, 10, 1),
            ..Default::default()
        };
        assert!(matches!(query.into_filter(), Err(AppError::BadRequest(_))));

        let query = AppointmentQuery {
            owner_id: Some(7),
            status: Some(AppointmentStatus::Pending),
            ..Default::default()
        };
        let filter = query.into_filter().unwrap();
        assert_eq!(filter.owner_id, Some(7));
        assert_eq!(filter.status, Some(AppointmentStatus::Pending));
    }
}
