//! Payloads exchanged with other services over the message bus.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    enums::{ActorRole, AppointmentStatus, PaymentRecordStatus, RefundStatus},
    models::{AppointmentEntity, AppointmentServiceEntity},
};

pub const APPOINTMENT_CREATED: &str = "notifications.appointment_created";
pub const APPOINTMENT_RESCHEDULED: &str = "notifications.appointment_rescheduled";
pub const APPOINTMENT_STATUS_CHANGED: &str = "notifications.appointment_status_changed";
pub const APPOINTMENT_CANCELLED: &str = "notifications.appointment_cancelled";
pub const APPOINTMENT_COMPLETED: &str = "notifications.appointment_completed";
pub const GROOMER_ASSIGNED: &str = "notifications.groomer_assigned";
pub const PAYMENT_RECEIVED: &str = "notifications.payment_received";
pub const APPOINTMENT_FINALIZED: &str = "receipts.appointment_finalized";

/// Inbound queue fed by the payment provider's webhook bridge.
pub const PAYMENT_UPDATED: &str = "payments.payment_updated";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AppointmentCreatedEvent {
    pub appointment_id: i32,
    pub owner_id: i32,
    pub pet_id: i32,
    pub preferred_date: NaiveDate,
    pub preferred_time: String,
    pub total_amount: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AppointmentRescheduledEvent {
    pub appointment_id: i32,
    pub owner_id: i32,
    pub old_date: NaiveDate,
    pub old_time: String,
    pub new_date: NaiveDate,
    pub new_time: String,
    pub reason: String,
    pub rescheduled_by_role: ActorRole,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AppointmentStatusChangedEvent {
    pub appointment_id: i32,
    pub owner_id: i32,
    pub from: AppointmentStatus,
    pub to: AppointmentStatus,
    pub daily_queue_number: Option<i32>,
    pub groomer_id: Option<i32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AppointmentCancelledEvent {
    pub appointment_id: i32,
    pub owner_id: i32,
    pub reason: String,
    pub cancelled_by_role: ActorRole,
    pub refund_status: Option<RefundStatus>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AppointmentCompletedEvent {
    pub appointment_id: i32,
    pub owner_id: i32,
    pub duration_minutes: Option<i32>,
    pub total_amount: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GroomerAssignedEvent {
    pub appointment_id: i32,
    pub owner_id: i32,
    pub groomer_id: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PaymentReceivedEvent {
    pub appointment_id: i32,
    pub owner_id: i32,
    pub payment_id: Uuid,
    pub amount: f64,
    pub payment_method: String,
}

/// Snapshot handed to the receipt renderer once an appointment is completed.
#[derive(Serialize, Debug, Clone)]
pub struct AppointmentFinalizedEvent {
    pub appointment: AppointmentEntity,
    pub additional_services: Vec<AppointmentServiceEntity>,
    pub finalized_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PaymentUpdatedEvent {
    pub payment_id: Uuid,
    pub status: PaymentRecordStatus,
    pub provider_ref: Option<String>,
    pub failure_reason: Option<String>,
}
