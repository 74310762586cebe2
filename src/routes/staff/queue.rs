use axum::{
    Extension,
    extract::{Query, State},
    response::IntoResponse,
};
use chrono::NaiveDate;
use serde::Deserialize;
use utoipa::IntoParams;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    appointments::{Actor, views::AppointmentDetail},
    platform::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware,
    },
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/staff/queue",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_queue))
            .route_layer(axum::middleware::from_fn(middleware::staff_authorization)),
    )
}

#[derive(Deserialize, Debug, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct QueueQuery {
    /// Defaults to today in the shop's time zone.
    pub date: Option<NaiveDate>,
}

/// Waiting and in-progress appointments in queue-number order.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Staff"],
    security(("actorId" = [], "actorRole" = [])),
    params(QueueQuery),
    responses(
        (status = 200, description = "Get queue successfully", body = StdResponse<Vec<AppointmentDetail>, String>)
    )
)]
async fn get_queue(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<QueueQuery>,
) -> Result<impl IntoResponse, AppError> {
    let queue = state.appointments.get_queue(&actor, query.date).await?;

    Ok(StdResponse {
        data: Some(queue),
        message: Some("Get queue successfully"),
    })
}
