//! Inputs accepted by [`AppointmentService`](super::AppointmentService).

use chrono::NaiveDate;
use serde::Deserialize;
use utoipa::ToSchema;

use crate::enums::AppointmentStatus;

/// Booking request. Every field is optional on the wire so missing values are
/// reported as field errors rather than a bare JSON rejection.
#[derive(Deserialize, Debug, Clone, Default, ToSchema)]
pub struct CreateAppointmentReq {
    pub pet_id: Option<i32>,
    pub service_id: Option<i32>,
    pub preferred_date: Option<NaiveDate>,
    /// `10:00 AM` or `10:00`
    pub preferred_time: Option<String>,
    #[serde(default)]
    pub additional_services: Vec<i32>,
    pub matted_coat_fee: Option<f64>,
    pub special_notes: Option<String>,
}

#[derive(Deserialize, Debug, Clone, ToSchema)]
pub struct RescheduleReq {
    pub new_date: NaiveDate,
    pub new_time: String,
    pub reason: String,
    /// Reopen a cancelled appointment. Staff and shop owner only.
    #[serde(default)]
    pub reopen: bool,
}

#[derive(Deserialize, Debug, Clone, ToSchema)]
pub struct UpdateStatusReq {
    pub status: AppointmentStatus,
    pub notes: Option<String>,
}

#[derive(Deserialize, Debug, Clone, ToSchema)]
pub struct AssignGroomerReq {
    pub groomer_id: i32,
}

#[derive(Deserialize, Debug, Clone, ToSchema)]
pub struct AddServicesReq {
    pub service_ids: Vec<i32>,
    pub matted_coat_fee: Option<f64>,
}

#[derive(Deserialize, Debug, Clone, ToSchema)]
pub struct CancelReq {
    pub reason: String,
}

#[derive(Deserialize, Debug, Clone, ToSchema)]
pub struct AdjustPricingReq {
    pub discount_amount: Option<f64>,
    pub matted_coat_fee: Option<f64>,
}

#[derive(Deserialize, Debug, Clone, ToSchema)]
pub struct CreatePaymentReq {
    pub payment_method: String,
}
