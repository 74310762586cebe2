use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use utoipa_axum::router::OpenApiRouter;

use crate::{
    appointments::{
        Actor,
        commands::{
            AddServicesReq, CancelReq, CreateAppointmentReq, CreatePaymentReq, RescheduleReq,
        },
        ledger::PaymentRecorded,
        views::{AppointmentDetail, AppointmentView},
    },
    enums::PaymentStatus,
    platform::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware,
    },
};

/// Appointment routes shared by pet owners and staff. Ownership is checked
/// per appointment.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/appointments",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(create_appointment))
            .routes(utoipa_axum::routes!(get_my_appointments))
            .routes(utoipa_axum::routes!(get_appointment))
            .routes(utoipa_axum::routes!(reschedule_appointment))
            .routes(utoipa_axum::routes!(add_services))
            .routes(utoipa_axum::routes!(remove_service))
            .routes(utoipa_axum::routes!(cancel_appointment))
            .routes(utoipa_axum::routes!(sync_payment_status))
            .routes(utoipa_axum::routes!(create_payment))
            .route_layer(axum::middleware::from_fn(middleware::actor_context)),
    )
}

/// Book an appointment for one of the caller's pets.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Appointments"],
    security(("actorId" = [], "actorRole" = [])),
    request_body = CreateAppointmentReq,
    responses(
        (status = 200, description = "Appointment booked", body = StdResponse<AppointmentView, String>),
        (status = 409, description = "Pet already booked or slot taken"),
        (status = 422, description = "Invalid booking request")
    )
)]
async fn create_appointment(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<CreateAppointmentReq>,
) -> Result<impl IntoResponse, AppError> {
    let appointment = state.appointments.create(&actor, body).await?;

    Ok(StdResponse {
        data: Some(appointment),
        message: Some("Appointment booked successfully"),
    })
}

/// Fetch every appointment belonging to the caller.
#[utoipa::path(
    get,
    path = "/my-appointments",
    tags = ["Appointments"],
    security(("actorId" = [], "actorRole" = [])),
    responses(
        (status = 200, description = "List my appointments", body = StdResponse<Vec<AppointmentDetail>, String>)
    )
)]
async fn get_my_appointments(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, AppError> {
    let appointments = state.appointments.get_by_owner(&actor, actor.id).await?;

    Ok(StdResponse {
        data: Some(appointments),
        message: Some("Get my appointments successfully"),
    })
}

#[utoipa::path(
    get,
    path = "/{id}",
    tags = ["Appointments"],
    security(("actorId" = [], "actorRole" = [])),
    params(
        ("id" = i32, Path, description = "Appointment ID to fetch")
    ),
    responses(
        (status = 200, description = "Get appointment successfully", body = StdResponse<AppointmentDetail, String>),
        (status = 404, description = "Appointment not found")
    )
)]
async fn get_appointment(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, AppError> {
    let appointment = state.appointments.get_by_id(&actor, id).await?;

    Ok(StdResponse {
        data: Some(appointment),
        message: Some("Get appointment successfully"),
    })
}

/// Move an appointment to another date and time. Staff may also reopen a
/// cancelled appointment with `reopen`.
#[utoipa::path(
    post,
    path = "/{id}/reschedule",
    tags = ["Appointments"],
    security(("actorId" = [], "actorRole" = [])),
    params(
        ("id" = i32, Path, description = "Appointment ID to reschedule")
    ),
    request_body = RescheduleReq,
    responses(
        (status = 200, description = "Appointment rescheduled", body = StdResponse<AppointmentView, String>),
        (status = 409, description = "Slot taken or appointment can no longer be rescheduled")
    )
)]
async fn reschedule_appointment(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<RescheduleReq>,
) -> Result<impl IntoResponse, AppError> {
    let appointment = state.appointments.reschedule(&actor, id, body).await?;

    Ok(StdResponse {
        data: Some(appointment),
        message: Some("Appointment rescheduled successfully"),
    })
}

#[utoipa::path(
    post,
    path = "/{id}/services",
    tags = ["Appointments"],
    security(("actorId" = [], "actorRole" = [])),
    params(
        ("id" = i32, Path, description = "Appointment ID")
    ),
    request_body = AddServicesReq,
    responses(
        (status = 200, description = "Services added", body = StdResponse<AppointmentView, String>),
        (status = 409, description = "Service already on the appointment"),
        (status = 422, description = "One or more services cannot be added")
    )
)]
async fn add_services(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<AddServicesReq>,
) -> Result<impl IntoResponse, AppError> {
    let appointment = state.appointments.add_services(&actor, id, body).await?;

    Ok(StdResponse {
        data: Some(appointment),
        message: Some("Services added successfully"),
    })
}

#[utoipa::path(
    delete,
    path = "/{id}/services/{service_id}",
    tags = ["Appointments"],
    security(("actorId" = [], "actorRole" = [])),
    params(
        ("id" = i32, Path, description = "Appointment ID"),
        ("service_id" = i32, Path, description = "Additional service to remove")
    ),
    responses(
        (status = 200, description = "Service removed", body = StdResponse<AppointmentView, String>),
        (status = 404, description = "Service is not on the appointment")
    )
)]
async fn remove_service(
    Path((id, service_id)): Path<(i32, i32)>,
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, AppError> {
    let appointment = state
        .appointments
        .remove_service(&actor, id, service_id)
        .await?;

    Ok(StdResponse {
        data: Some(appointment),
        message: Some("Service removed successfully"),
    })
}

#[utoipa::path(
    post,
    path = "/{id}/cancel",
    tags = ["Appointments"],
    security(("actorId" = [], "actorRole" = [])),
    params(
        ("id" = i32, Path, description = "Appointment ID to cancel")
    ),
    request_body = CancelReq,
    responses(
        (status = 200, description = "Appointment cancelled", body = StdResponse<AppointmentView, String>),
        (status = 409, description = "Appointment cannot be cancelled")
    )
)]
async fn cancel_appointment(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<CancelReq>,
) -> Result<impl IntoResponse, AppError> {
    let appointment = state.appointments.cancel(&actor, id, body).await?;

    Ok(StdResponse {
        data: Some(appointment),
        message: Some("Appointment cancelled successfully"),
    })
}

/// Re-derive the payment status from the payment records.
#[utoipa::path(
    post,
    path = "/{id}/payment-status/sync",
    tags = ["Appointments"],
    security(("actorId" = [], "actorRole" = [])),
    params(
        ("id" = i32, Path, description = "Appointment ID")
    ),
    responses(
        (status = 200, description = "Current payment status", body = StdResponse<PaymentStatus, String>)
    )
)]
async fn sync_payment_status(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, AppError> {
    let status = state.appointments.sync_payment_status(&actor, id).await?;

    Ok(StdResponse {
        data: Some(status),
        message: Some("Payment status synced successfully"),
    })
}

/// Start a payment for the appointment's total.
#[utoipa::path(
    post,
    path = "/{id}/payments",
    tags = ["Appointments", "Payments"],
    security(("actorId" = [], "actorRole" = [])),
    params(
        ("id" = i32, Path, description = "Appointment ID to pay for")
    ),
    request_body = CreatePaymentReq,
    responses(
        (status = 200, description = "Payment recorded", body = StdResponse<PaymentRecorded, String>),
        (status = 502, description = "Payment provider unreachable")
    )
)]
async fn create_payment(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<CreatePaymentReq>,
) -> Result<impl IntoResponse, AppError> {
    let recorded = state.appointments.record_payment(&actor, id, body).await?;

    Ok(StdResponse {
        data: Some(recorded),
        message: Some("Payment created successfully"),
    })
}
