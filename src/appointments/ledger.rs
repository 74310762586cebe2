//! Payment rows for an appointment. Each change re-derives the appointment's
//! payment status in the same transaction.

use anyhow::Context;
use chrono::{DateTime, Utc};
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    api::payment_provider::{ChargeOutcome, ChargeRequest},
    appointments::{
        actor::Actor, commands::CreatePaymentReq, service::AppointmentService, store, validator,
        views::AppointmentView,
    },
    enums::{AppointmentStatus, PaymentRecordStatus, PaymentStatus},
    events::{self, PaymentReceivedEvent, PaymentUpdatedEvent},
    models::{AppointmentEntity, CreatePaymentEntity, PaymentEntity},
    platform::{
        app_error::{AppError, ConflictCode, StateCode},
        outbox,
    },
    schema::payments,
};

#[derive(Serialize, Debug, Clone, ToSchema)]
pub struct PaymentRecorded {
    pub payment: PaymentEntity,
    pub appointment: AppointmentView,
}

/// Whether a new payment may be taken for this appointment.
pub fn ensure_payable(appointment: &AppointmentEntity) -> Result<(), AppError> {
    if matches!(
        appointment.status,
        AppointmentStatus::Cancelled | AppointmentStatus::NoShow
    ) {
        return Err(AppError::state(
            StateCode::StatusNotEligible,
            appointment.status,
            format!("A {} appointment cannot take payments", appointment.status),
        ));
    }
    if matches!(
        appointment.payment_status,
        PaymentStatus::Paid | PaymentStatus::Refunded
    ) {
        return Err(AppError::BadRequest(format!(
            "Appointment is already {}",
            appointment.payment_status
        )));
    }
    Ok(())
}

/// A pending row means an earlier attempt is still awaiting its verdict.
pub fn ensure_no_payment_in_flight(ledger: &[PaymentEntity]) -> Result<(), AppError> {
    match ledger
        .iter()
        .find(|payment| payment.status == PaymentRecordStatus::Pending)
    {
        Some(pending) => Err(AppError::conflict(
            ConflictCode::PaymentInProgress,
            format!("Payment {} is still pending", pending.id),
            Some(json!({
                "payment_id": pending.id,
                "amount": pending.amount,
                "payment_method": pending.payment_method,
            })),
        )),
        None => Ok(()),
    }
}

/// `paid_at` for a payment moving to `status`, keeping an earlier stamp.
fn paid_at_for(
    status: PaymentRecordStatus,
    existing: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match status {
        PaymentRecordStatus::Completed => existing.or(Some(now)),
        _ => existing,
    }
}

async fn lock_payment(conn: &mut AsyncPgConnection, id: Uuid) -> Result<PaymentEntity, AppError> {
    let payment = payments::table
        .find(id)
        .for_update()
        .select(PaymentEntity::as_select())
        .get_result(conn)
        .await?;
    Ok(payment)
}

async fn set_payment_status(
    conn: &mut AsyncPgConnection,
    payment: &PaymentEntity,
    status: PaymentRecordStatus,
    provider_ref: Option<String>,
    failure_reason: Option<String>,
    now: DateTime<Utc>,
) -> Result<PaymentEntity, AppError> {
    let updated = diesel::update(payments::table.find(payment.id))
        .set((
            payments::status.eq(status),
            payments::provider_ref.eq(provider_ref.or_else(|| payment.provider_ref.clone())),
            payments::failure_reason.eq(failure_reason),
            payments::paid_at.eq(paid_at_for(status, payment.paid_at, now)),
            payments::updated_at.eq(now),
        ))
        .returning(PaymentEntity::as_returning())
        .get_result(conn)
        .await?;
    Ok(updated)
}

async fn publish_received(
    conn: &mut AsyncPgConnection,
    appointment: &AppointmentEntity,
    payment: &PaymentEntity,
) -> Result<(), AppError> {
    outbox::publish(
        conn,
        events::PAYMENT_RECEIVED.into(),
        PaymentReceivedEvent {
            appointment_id: appointment.id,
            owner_id: appointment.owner_id,
            payment_id: payment.id,
            amount: payment.amount,
            payment_method: payment.payment_method.clone(),
        },
    )
    .await?;
    Ok(())
}

impl AppointmentService {
    /// Charges the appointment's outstanding total through the payment
    /// provider and records the attempt.
    ///
    /// A pending ledger row is written under the appointment lock before the
    /// provider is called, so a concurrent attempt for the same appointment is
    /// turned away instead of charging twice. The provider runs outside any
    /// transaction; its verdict settles the reserved row afterwards.
    pub async fn record_payment(
        &self,
        actor: &Actor,
        appointment_id: i32,
        req: CreatePaymentReq,
    ) -> Result<PaymentRecorded, AppError> {
        let payment_method = validator::required_text("payment_method", &req.payment_method)?;
        let caller = actor.clone();

        let mut pooled = self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        let reserved = conn
            .transaction(move |conn| {
                Box::pin(async move {
                    let current = store::lock(conn, appointment_id).await?;
                    caller.require_access_to(current.owner_id)?;
                    ensure_payable(&current)?;
                    let ledger = store::payments_for(conn, appointment_id).await?;
                    ensure_no_payment_in_flight(&ledger)?;

                    let payment = diesel::insert_into(payments::table)
                        .values(CreatePaymentEntity {
                            appointment_id,
                            amount: current.total_amount,
                            payment_method,
                            status: PaymentRecordStatus::Pending,
                            provider_ref: None,
                            failure_reason: None,
                            paid_at: None,
                        })
                        .returning(PaymentEntity::as_returning())
                        .get_result(conn)
                        .await?;
                    Ok::<PaymentEntity, AppError>(payment)
                })
            })
            .await?;

        let charge = ChargeRequest {
            reference: reserved.id.to_string(),
            amount: reserved.amount,
            payment_method: reserved.payment_method.clone(),
        };
        let outcome = match self.payments.initiate(&charge).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(
                    "Payment provider failed for payment {}: {:?}",
                    reserved.id, err
                );
                let failed = ChargeOutcome {
                    status: PaymentRecordStatus::Failed,
                    provider_ref: None,
                    failure_reason: Some(err.to_string()),
                };
                if let Err(settle_err) = self.settle_reserved(conn, reserved.id, failed).await {
                    error!(
                        "Failed to release reserved payment {}: {:?}",
                        reserved.id, settle_err
                    );
                }
                return Err(err);
            }
        };

        let recorded = self.settle_reserved(conn, reserved.id, outcome).await?;
        info!(
            "Payment {} for appointment #{} is {}",
            recorded.payment.id, appointment_id, recorded.payment.status
        );
        Ok(recorded)
    }

    /// Writes the provider's verdict onto a reserved payment row.
    async fn settle_reserved(
        &self,
        conn: &mut AsyncPgConnection,
        payment_id: Uuid,
        outcome: ChargeOutcome,
    ) -> Result<PaymentRecorded, AppError> {
        conn.transaction(move |conn| {
            Box::pin(async move {
                let payment = lock_payment(conn, payment_id).await?;
                let current = store::lock(conn, payment.appointment_id).await?;
                let now = Utc::now();
                let payment = set_payment_status(
                    conn,
                    &payment,
                    outcome.status,
                    outcome.provider_ref,
                    outcome.failure_reason,
                    now,
                )
                .await?;
                let updated = store::sync_payment_status(conn, current, now).await?;
                if payment.status == PaymentRecordStatus::Completed {
                    publish_received(conn, &updated, &payment).await?;
                }

                Ok::<PaymentRecorded, AppError>(PaymentRecorded {
                    payment,
                    appointment: updated.into(),
                })
            })
        })
        .await
    }

    /// Marks a pending counter payment as completed.
    pub async fn settle_payment(
        &self,
        actor: &Actor,
        payment_id: Uuid,
    ) -> Result<PaymentRecorded, AppError> {
        actor.require_staff()?;

        let mut pooled = self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        conn.transaction(move |conn| {
            Box::pin(async move {
                let payment = lock_payment(conn, payment_id).await?;
                if payment.status != PaymentRecordStatus::Pending {
                    return Err(AppError::BadRequest(format!(
                        "Payment is already {}",
                        payment.status
                    )));
                }

                let current = store::lock(conn, payment.appointment_id).await?;
                let now = Utc::now();
                let payment = set_payment_status(
                    conn,
                    &payment,
                    PaymentRecordStatus::Completed,
                    None,
                    None,
                    now,
                )
                .await?;
                let updated = store::sync_payment_status(conn, current, now).await?;
                publish_received(conn, &updated, &payment).await?;

                Ok::<PaymentRecorded, AppError>(PaymentRecorded {
                    payment,
                    appointment: updated.into(),
                })
            })
        })
        .await
    }

    /// Applies a status change reported by the payment provider. Replays of
    /// an already-applied status are ignored.
    pub async fn apply_payment_update(&self, event: PaymentUpdatedEvent) -> Result<(), AppError> {
        let mut pooled = self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        conn.transaction(move |conn| {
            Box::pin(async move {
                let payment = lock_payment(conn, event.payment_id).await?;
                if payment.status == event.status {
                    warn!(
                        "Payment {} is already {}; skipping update",
                        payment.id, payment.status
                    );
                    return Ok(());
                }

                let current = store::lock(conn, payment.appointment_id).await?;
                let now = Utc::now();
                let payment = set_payment_status(
                    conn,
                    &payment,
                    event.status,
                    event.provider_ref,
                    event.failure_reason,
                    now,
                )
                .await?;
                let updated = store::sync_payment_status(conn, current, now).await?;
                if payment.status == PaymentRecordStatus::Completed {
                    publish_received(conn, &updated, &payment).await?;
                }

                Ok::<(), AppError>(())
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::appointments::validator::fixtures::{appointment, payment};

    #[test]
    fn cancelled_and_no_show_appointments_take_no_payments() {
        for status in [AppointmentStatus::Cancelled, AppointmentStatus::NoShow] {
            assert!(matches!(
                ensure_payable(&appointment(1, status)),
                Err(AppError::State { .. })
            ));
        }
        assert!(ensure_payable(&appointment(1, AppointmentStatus::Completed)).is_ok());
    }

    #[test]
    fn settled_appointments_take_no_payments() {
        let mut paid = appointment(1, AppointmentStatus::Confirmed);
        paid.payment_status = PaymentStatus::Paid;
        assert!(matches!(
            ensure_payable(&paid),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn pending_attempt_blocks_a_second_charge() {
        let ledger = [
            payment(1, PaymentRecordStatus::Failed),
            payment(1, PaymentRecordStatus::Pending),
        ];
        let err = ensure_no_payment_in_flight(&ledger).unwrap_err();
        assert_eq!(err.code(), Some("PAYMENT_IN_PROGRESS"));
        assert_eq!(err.status_code(), axum::http::StatusCode::CONFLICT);

        let settled = [
            payment(1, PaymentRecordStatus::Failed),
            payment(1, PaymentRecordStatus::Cancelled),
        ];
        assert!(ensure_no_payment_in_flight(&settled).is_ok());
        assert!(ensure_no_payment_in_flight(&[]).is_ok());
    }

    #[test]
    fn paid_at_is_stamped_once() {
        let first = Utc.with_ymd_and_hms(2026, 10, 14, 3, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2026, 10, 14, 4, 0, 0).unwrap();

        assert_eq!(
            paid_at_for(PaymentRecordStatus::Completed, None, first),
            Some(first)
        );
        assert_eq!(
            paid_at_for(PaymentRecordStatus::Completed, Some(first), later),
            Some(first)
        );
        assert_eq!(paid_at_for(PaymentRecordStatus::Failed, None, later), None);
    }
}
