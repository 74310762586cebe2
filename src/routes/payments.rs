use axum::{
    Extension,
    extract::{Path, State},
    response::IntoResponse,
};
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    appointments::{Actor, ledger::PaymentRecorded},
    platform::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware,
    },
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/payments",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(mock_pay))
            .route_layer(axum::middleware::from_fn(middleware::staff_authorization)),
    )
}

/// Mark a pending counter payment as paid.
#[utoipa::path(
    patch,
    path = "/{id}/mock-pay",
    tags = ["Payments"],
    security(("actorId" = [], "actorRole" = [])),
    params(
        ("id" = Uuid, Path, description = "Payment ID to mark as paid")
    ),
    responses(
        (status = 200, description = "Payment successfully marked as paid", body = StdResponse<PaymentRecorded, String>),
        (status = 400, description = "Payment is not pending")
    )
)]
async fn mock_pay(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, AppError> {
    let recorded = state.appointments.settle_payment(&actor, id).await?;

    Ok(StdResponse {
        data: Some(recorded),
        message: Some("Payment paid successfully"),
    })
}
