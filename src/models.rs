use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use diesel::{
    Selectable,
    prelude::{AsChangeset, Identifiable, Insertable, Queryable},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::enums::{
    ActorRole, AppointmentStatus, OutboxStatus, PaymentRecordStatus, PaymentStatus, RefundStatus,
    ServiceAvailability, SessionStatus, UserStatus,
};

// Appointments

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, PartialEq, ToSchema)]
#[diesel(table_name = crate::schema::appointments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AppointmentEntity {
    pub id: i32,
    pub pet_id: i32,
    pub owner_id: i32,
    pub service_id: i32,
    pub groomer_id: Option<i32>,
    pub preferred_date: NaiveDate,
    pub preferred_time: NaiveTime,
    pub actual_date: Option<NaiveDate>,
    pub actual_time: Option<NaiveTime>,
    pub daily_queue_number: Option<i32>,
    pub queue_date: Option<NaiveDate>,
    pub base_price: f64,
    pub matted_coat_fee: f64,
    pub discount_amount: f64,
    pub total_amount: f64,
    pub status: AppointmentStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: Option<String>,
    pub cancelled_reason: Option<String>,
    pub cancelled_by_role: Option<ActorRole>,
    pub cancelled_by_user_id: Option<i32>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refund_status: Option<RefundStatus>,
    pub duration_minutes: Option<i32>,
    pub special_notes: Option<String>,
    pub status_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::appointments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreateAppointmentEntity {
    pub pet_id: i32,
    pub owner_id: i32,
    pub service_id: i32,
    pub preferred_date: NaiveDate,
    pub preferred_time: NaiveTime,
    pub base_price: f64,
    pub matted_coat_fee: f64,
    pub discount_amount: f64,
    pub total_amount: f64,
    pub status: AppointmentStatus,
    pub payment_status: PaymentStatus,
    pub special_notes: Option<String>,
}

/// Typed change set for the `appointments` row.
///
/// `None` leaves a column untouched. For nullable columns the inner `Option`
/// is the new value, so `Some(None)` clears the column.
#[derive(AsChangeset, Default, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::appointments)]
pub struct AppointmentPatch {
    pub groomer_id: Option<Option<i32>>,
    pub preferred_date: Option<NaiveDate>,
    pub preferred_time: Option<NaiveTime>,
    pub actual_date: Option<Option<NaiveDate>>,
    pub actual_time: Option<Option<NaiveTime>>,
    pub daily_queue_number: Option<Option<i32>>,
    pub queue_date: Option<Option<NaiveDate>>,
    pub base_price: Option<f64>,
    pub matted_coat_fee: Option<f64>,
    pub discount_amount: Option<f64>,
    pub total_amount: Option<f64>,
    pub status: Option<AppointmentStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub payment_method: Option<Option<String>>,
    pub cancelled_reason: Option<Option<String>>,
    pub cancelled_by_role: Option<Option<ActorRole>>,
    pub cancelled_by_user_id: Option<Option<i32>>,
    pub cancelled_at: Option<Option<DateTime<Utc>>>,
    pub refund_status: Option<Option<RefundStatus>>,
    pub duration_minutes: Option<Option<i32>>,
    pub status_notes: Option<Option<String>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl AppointmentPatch {
    /// Whether the patch moves the appointment to a different slot.
    pub fn changes_slot(&self, current: &AppointmentEntity) -> bool {
        self.preferred_date
            .is_some_and(|date| date != current.preferred_date)
            || self
                .preferred_time
                .is_some_and(|time| time != current.preferred_time)
    }

    pub fn touches_price(&self) -> bool {
        self.base_price.is_some()
            || self.matted_coat_fee.is_some()
            || self.discount_amount.is_some()
    }

    /// Applies the patch to an in-memory copy of the row.
    pub fn apply_to(&self, entity: &mut AppointmentEntity) {
        macro_rules! set {
            ($($field:ident),+ $(,)?) => {
                $(if let Some(value) = &self.$field {
                    entity.$field = value.clone();
                })+
            };
        }
        set!(
            groomer_id,
            preferred_date,
            preferred_time,
            actual_date,
            actual_time,
            daily_queue_number,
            queue_date,
            base_price,
            matted_coat_fee,
            discount_amount,
            total_amount,
            status,
            payment_status,
            payment_method,
            cancelled_reason,
            cancelled_by_role,
            cancelled_by_user_id,
            cancelled_at,
            refund_status,
            duration_minutes,
            status_notes,
            updated_at,
        );
    }
}

// Additional services

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, PartialEq, ToSchema)]
#[diesel(table_name = crate::schema::appointment_services)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AppointmentServiceEntity {
    pub id: i32,
    pub appointment_id: i32,
    pub service_id: i32,
    pub pet_id: i32,
    pub price: f64,
    pub payment_method: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::appointment_services)]
pub struct CreateAppointmentServiceEntity {
    pub appointment_id: i32,
    pub service_id: i32,
    pub pet_id: i32,
    pub price: f64,
    pub payment_method: Option<String>,
}

// Sessions

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, PartialEq, ToSchema)]
#[diesel(table_name = crate::schema::appointment_sessions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AppointmentSessionEntity {
    pub id: i32,
    pub appointment_id: i32,
    pub groomer_id: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i32>,
    pub status: SessionStatus,
}

#[derive(Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::appointment_sessions)]
pub struct CreateAppointmentSessionEntity {
    pub appointment_id: i32,
    pub groomer_id: i32,
    pub start_time: DateTime<Utc>,
    pub status: SessionStatus,
}

// Reschedule history

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::appointment_reschedule_history)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RescheduleHistoryEntity {
    pub id: i32,
    pub appointment_id: i32,
    pub old_date: NaiveDate,
    pub old_time: NaiveTime,
    pub new_date: NaiveDate,
    pub new_time: NaiveTime,
    pub reason: String,
    pub rescheduled_by_role: ActorRole,
    pub rescheduled_by_user_id: i32,
    pub rescheduled_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::appointment_reschedule_history)]
pub struct CreateRescheduleHistoryEntity {
    pub appointment_id: i32,
    pub old_date: NaiveDate,
    pub old_time: NaiveTime,
    pub new_date: NaiveDate,
    pub new_time: NaiveTime,
    pub reason: String,
    pub rescheduled_by_role: ActorRole,
    pub rescheduled_by_user_id: i32,
    pub rescheduled_at: DateTime<Utc>,
}

// Payments

#[derive(Queryable, Serialize, Selectable, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::payments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PaymentEntity {
    pub id: Uuid,
    pub appointment_id: i32,
    pub amount: f64,
    pub payment_method: String,
    pub status: PaymentRecordStatus,
    pub provider_ref: Option<String>,
    pub failure_reason: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Serialize, Deserialize, Debug)]
#[diesel(table_name = crate::schema::payments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreatePaymentEntity {
    pub appointment_id: i32,
    pub amount: f64,
    pub payment_method: String,
    pub status: PaymentRecordStatus,
    pub provider_ref: Option<String>,
    pub failure_reason: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

// Reference data owned by other services

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::pets)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PetEntity {
    pub id: i32,
    pub owner_id: i32,
    pub name: String,
    pub species: String,
    pub breed: Option<String>,
    pub size: String,
}

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UserEntity {
    pub id: i32,
    pub full_name: String,
    pub email: String,
    pub role: ActorRole,
    pub status: UserStatus,
}

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::grooming_services)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct GroomingServiceEntity {
    pub id: i32,
    pub name: String,
    pub status: ServiceAvailability,
    pub price_xs: Option<f64>,
    pub price_small: Option<f64>,
    pub price_medium: Option<f64>,
    pub price_large: Option<f64>,
    pub price_xl: Option<f64>,
    pub price_xxl: Option<f64>,
}

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::appointment_ratings)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RatingEntity {
    pub id: i32,
    pub appointment_id: i32,
    pub rating: i32,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

// Outbox

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = crate::schema::outbox)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OutboxEntity {
    pub id: i32,
    pub event_type: String,
    pub payload: String,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::outbox)]
pub struct CreateOutboxEntity {
    pub event_type: String,
    pub payload: String,
    pub status: OutboxStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appointments::validator::fixtures::appointment;

    #[test]
    fn restating_the_current_slot_is_not_a_move() {
        let current = appointment(1, AppointmentStatus::Confirmed);
        let same = AppointmentPatch {
            preferred_date: Some(current.preferred_date),
            preferred_time: Some(current.preferred_time),
            ..Default::default()
        };
        assert!(!same.changes_slot(&current));
        assert!(!AppointmentPatch::default().changes_slot(&current));

        let later = AppointmentPatch {
            preferred_date: current.preferred_date.succ_opt(),
            ..Default::default()
        };
        assert!(later.changes_slot(&current));
    }

    #[test]
    fn only_price_columns_touch_the_price() {
        assert!(!AppointmentPatch::default().touches_price());
        let patch = AppointmentPatch {
            status: Some(AppointmentStatus::Waiting),
            total_amount: Some(10.0),
            ..Default::default()
        };
        assert!(!patch.touches_price());
        let patch = AppointmentPatch {
            discount_amount: Some(10.0),
            ..Default::default()
        };
        assert!(patch.touches_price());
    }

    #[test]
    fn apply_sets_and_clears_nullable_columns() {
        let mut row = appointment(1, AppointmentStatus::Cancelled);
        row.cancelled_reason = Some("sick pet".into());
        let untouched = row.clone();

        AppointmentPatch::default().apply_to(&mut row);
        assert_eq!(row.cancelled_reason, untouched.cancelled_reason);

        AppointmentPatch {
            status: Some(AppointmentStatus::Pending),
            cancelled_reason: Some(None),
            groomer_id: Some(Some(5)),
            ..Default::default()
        }
        .apply_to(&mut row);

        assert_eq!(row.status, AppointmentStatus::Pending);
        assert_eq!(row.cancelled_reason, None);
        assert_eq!(row.groomer_id, Some(5));
        assert_eq!(row.base_price, untouched.base_price);
    }
}
