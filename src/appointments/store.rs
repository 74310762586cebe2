//! Appointment aggregate store.
//!
//! Every write to `appointments` goes through [`update`] on a connection that
//! already holds the row lock taken by [`lock`].

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Timelike, Utc};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use tracing::debug;

use crate::{
    appointments::{
        clock::Moment,
        lifecycle::{AppointmentChange, SessionClose},
        payment_sync, pricing, queue,
        validator::{self, Catalog},
    },
    enums::{AppointmentStatus, PaymentRecordStatus, SessionStatus},
    models::{
        AppointmentEntity, AppointmentPatch, AppointmentServiceEntity, AppointmentSessionEntity,
        CreateAppointmentEntity, CreateAppointmentServiceEntity, CreateAppointmentSessionEntity,
        CreateRescheduleHistoryEntity, GroomingServiceEntity, PaymentEntity, PetEntity,
        UserEntity,
    },
    platform::{
        app_error::AppError,
        db::{LockScope, advisory_xact_lock},
    },
    schema::{
        appointment_reschedule_history, appointment_services, appointment_sessions, appointments,
        grooming_services, payments, pets, users,
    },
};

/// Loads an appointment and locks its row until the transaction ends.
pub async fn lock(conn: &mut AsyncPgConnection, id: i32) -> Result<AppointmentEntity, AppError> {
    let appointment = appointments::table
        .find(id)
        .for_update()
        .select(AppointmentEntity::as_select())
        .get_result(conn)
        .await?;
    Ok(appointment)
}

pub async fn find(conn: &mut AsyncPgConnection, id: i32) -> Result<AppointmentEntity, AppError> {
    let appointment = appointments::table
        .find(id)
        .select(AppointmentEntity::as_select())
        .get_result(conn)
        .await?;
    Ok(appointment)
}

pub async fn insert(
    conn: &mut AsyncPgConnection,
    appointment: CreateAppointmentEntity,
) -> Result<AppointmentEntity, AppError> {
    let appointment = diesel::insert_into(appointments::table)
        .values(appointment)
        .returning(AppointmentEntity::as_returning())
        .get_result(conn)
        .await?;
    Ok(appointment)
}

/// Minutes since 0001-01-01 at the slot's start.
fn slot_key(date: NaiveDate, time: NaiveTime) -> i64 {
    i64::from(date.num_days_from_ce()) * 24 * 60 + i64::from(time.hour() * 60 + time.minute())
}

/// Serializes bookings competing for the same slot until commit.
pub async fn lock_slot(
    conn: &mut AsyncPgConnection,
    date: NaiveDate,
    time: NaiveTime,
) -> Result<(), AppError> {
    advisory_xact_lock(conn, LockScope::TimeSlot, slot_key(date, time)).await?;
    Ok(())
}

/// Serializes bookings for the same pet until commit.
pub async fn lock_pet(conn: &mut AsyncPgConnection, pet_id: i32) -> Result<(), AppError> {
    advisory_xact_lock(conn, LockScope::Pet, i64::from(pet_id)).await?;
    Ok(())
}

/// A non-terminal appointment other than `exclude` holding the slot.
pub async fn find_slot_conflict(
    conn: &mut AsyncPgConnection,
    date: NaiveDate,
    time: NaiveTime,
    exclude: Option<i32>,
) -> Result<Option<AppointmentEntity>, AppError> {
    let mut query = appointments::table
        .filter(appointments::preferred_date.eq(date))
        .filter(appointments::preferred_time.eq(time))
        .filter(appointments::status.ne_all(AppointmentStatus::TERMINAL))
        .select(AppointmentEntity::as_select())
        .into_boxed();
    if let Some(id) = exclude {
        query = query.filter(appointments::id.ne(id));
    }

    let existing = query.first(conn).await.optional()?;
    Ok(existing)
}

pub async fn find_active_for_pet(
    conn: &mut AsyncPgConnection,
    pet_id: i32,
    owner_id: i32,
) -> Result<Option<AppointmentEntity>, AppError> {
    let existing = appointments::table
        .filter(appointments::pet_id.eq(pet_id))
        .filter(appointments::owner_id.eq(owner_id))
        .filter(appointments::status.eq_any(AppointmentStatus::ACTIVE))
        .order_by(appointments::preferred_date.asc())
        .select(AppointmentEntity::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(existing)
}

/// Issues the next gap-filling queue number for `date`.
///
/// Holds the per-date advisory lock and row locks on every numbered row of
/// that date, so concurrent assignments for one date run one at a time.
pub async fn assign_queue_number(
    conn: &mut AsyncPgConnection,
    appointment_id: i32,
    date: NaiveDate,
) -> Result<i32, AppError> {
    advisory_xact_lock(
        conn,
        LockScope::QueueDate,
        i64::from(date.num_days_from_ce()),
    )
    .await?;

    let taken: Vec<Option<i32>> = appointments::table
        .filter(appointments::queue_date.eq(date))
        .filter(appointments::daily_queue_number.is_not_null())
        .filter(appointments::id.ne(appointment_id))
        .order_by(appointments::daily_queue_number.asc())
        .select(appointments::daily_queue_number)
        .for_update()
        .load(conn)
        .await?;
    let taken: Vec<i32> = taken.into_iter().flatten().collect();

    let number = queue::next_gap_number(&taken);
    debug!(
        "Queue number {} for appointment #{} on {}",
        number, appointment_id, date
    );
    Ok(number)
}

pub async fn line_items(
    conn: &mut AsyncPgConnection,
    appointment_id: i32,
) -> Result<Vec<AppointmentServiceEntity>, AppError> {
    let lines = appointment_services::table
        .filter(appointment_services::appointment_id.eq(appointment_id))
        .order_by(appointment_services::created_at.asc())
        .select(AppointmentServiceEntity::as_select())
        .load(conn)
        .await?;
    Ok(lines)
}

pub async fn insert_line_items(
    conn: &mut AsyncPgConnection,
    lines: Vec<CreateAppointmentServiceEntity>,
) -> Result<Vec<AppointmentServiceEntity>, AppError> {
    if lines.is_empty() {
        return Ok(Vec::new());
    }
    let lines = diesel::insert_into(appointment_services::table)
        .values(lines)
        .returning(AppointmentServiceEntity::as_returning())
        .get_results(conn)
        .await?;
    Ok(lines)
}

/// Deletes one add-on line. Returns how many rows went away.
pub async fn delete_line_item(
    conn: &mut AsyncPgConnection,
    appointment_id: i32,
    service_id: i32,
) -> Result<usize, AppError> {
    let deleted = diesel::delete(
        appointment_services::table
            .filter(appointment_services::appointment_id.eq(appointment_id))
            .filter(appointment_services::service_id.eq(service_id)),
    )
    .execute(conn)
    .await?;
    Ok(deleted)
}

pub async fn payments_for(
    conn: &mut AsyncPgConnection,
    appointment_id: i32,
) -> Result<Vec<PaymentEntity>, AppError> {
    let rows = payments::table
        .filter(payments::appointment_id.eq(appointment_id))
        .order_by(payments::created_at.asc())
        .select(PaymentEntity::as_select())
        .load(conn)
        .await?;
    Ok(rows)
}

/// Marks completed payments as cancelled once their amount has been refunded.
pub async fn void_refunded_payments(
    conn: &mut AsyncPgConnection,
    appointment_id: i32,
    at: DateTime<Utc>,
) -> Result<usize, AppError> {
    let voided = diesel::update(
        payments::table
            .filter(payments::appointment_id.eq(appointment_id))
            .filter(payments::status.eq(PaymentRecordStatus::Completed)),
    )
    .set((
        payments::status.eq(PaymentRecordStatus::Cancelled),
        payments::failure_reason.eq(Some("Refunded on cancellation")),
        payments::updated_at.eq(at),
    ))
    .execute(conn)
    .await?;
    Ok(voided)
}

pub async fn active_session(
    conn: &mut AsyncPgConnection,
    appointment_id: i32,
) -> Result<Option<AppointmentSessionEntity>, AppError> {
    let session = appointment_sessions::table
        .filter(appointment_sessions::appointment_id.eq(appointment_id))
        .filter(appointment_sessions::status.eq(SessionStatus::Active))
        .for_update()
        .select(AppointmentSessionEntity::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(session)
}

pub async fn open_session(
    conn: &mut AsyncPgConnection,
    session: CreateAppointmentSessionEntity,
) -> Result<AppointmentSessionEntity, AppError> {
    let session = diesel::insert_into(appointment_sessions::table)
        .values(session)
        .returning(AppointmentSessionEntity::as_returning())
        .get_result(conn)
        .await?;
    Ok(session)
}

pub async fn close_session(
    conn: &mut AsyncPgConnection,
    close: SessionClose,
) -> Result<(), AppError> {
    diesel::update(appointment_sessions::table.find(close.session_id))
        .set((
            appointment_sessions::end_time.eq(Some(close.end_time)),
            appointment_sessions::duration_minutes.eq(Some(close.duration_minutes)),
            appointment_sessions::status.eq(SessionStatus::Completed),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

/// Moves the active session to another groomer.
pub async fn reassign_active_session(
    conn: &mut AsyncPgConnection,
    appointment_id: i32,
    groomer_id: i32,
) -> Result<usize, AppError> {
    let updated = diesel::update(
        appointment_sessions::table
            .filter(appointment_sessions::appointment_id.eq(appointment_id))
            .filter(appointment_sessions::status.eq(SessionStatus::Active)),
    )
    .set(appointment_sessions::groomer_id.eq(groomer_id))
    .execute(conn)
    .await?;
    Ok(updated)
}

pub async fn append_history(
    conn: &mut AsyncPgConnection,
    entry: CreateRescheduleHistoryEntity,
) -> Result<(), AppError> {
    diesel::insert_into(appointment_reschedule_history::table)
        .values(entry)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn load_catalog(
    conn: &mut AsyncPgConnection,
    service_ids: &[i32],
) -> Result<Catalog, AppError> {
    let services: Vec<GroomingServiceEntity> = grooming_services::table
        .filter(grooming_services::id.eq_any(service_ids.to_vec()))
        .select(GroomingServiceEntity::as_select())
        .load(conn)
        .await?;
    Ok(services
        .into_iter()
        .map(|service| (service.id, service))
        .collect())
}

pub async fn find_pet(
    conn: &mut AsyncPgConnection,
    pet_id: i32,
) -> Result<Option<PetEntity>, AppError> {
    let pet = pets::table
        .find(pet_id)
        .select(PetEntity::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(pet)
}

pub async fn find_user(
    conn: &mut AsyncPgConnection,
    user_id: i32,
) -> Result<Option<UserEntity>, AppError> {
    let user = users::table
        .find(user_id)
        .select(UserEntity::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(user)
}

/// The row write [`update`] issues, decided before touching the table.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedWrite {
    pub patch: AppointmentPatch,
    /// The row as it will read after the write.
    pub next: AppointmentEntity,
    /// The target slot must be re-checked against other appointments.
    pub recheck_slot: bool,
}

/// Whether the write needs the add-on lines to recompute the total.
pub fn needs_lines(change: &AppointmentChange) -> bool {
    change.reprice || change.patch.touches_price()
}

/// Pure half of [`update`].
///
/// `queue_number` is the number issued for `change.queue_on`. `lines` must be
/// the stored add-on lines whenever [`needs_lines`] holds. A recomputed total
/// is rejected when the discount exceeds base, fee and add-ons together.
pub fn plan_write(
    current: &AppointmentEntity,
    change: AppointmentChange,
    queue_number: Option<i32>,
    lines: Option<&[AppointmentServiceEntity]>,
    moment: &Moment,
) -> Result<PlannedWrite, AppError> {
    let reprice = needs_lines(&change);
    let AppointmentChange {
        mut patch, queue_on, ..
    } = change;

    if let (Some(date), Some(number)) = (queue_on, queue_number) {
        patch.daily_queue_number = Some(Some(number));
        patch.queue_date = Some(Some(date));
    }

    let mut next = current.clone();
    patch.apply_to(&mut next);

    let reactivated = current.status.is_terminal() && !next.status.is_terminal();
    let recheck_slot = (patch.changes_slot(current) || reactivated) && !next.status.is_terminal();

    if reprice {
        let add_ons: Vec<f64> = lines.unwrap_or_default().iter().map(|line| line.price).collect();
        let subtotal =
            pricing::total(next.base_price, next.matted_coat_fee, add_ons.iter().copied(), 0.0);
        if next.discount_amount > subtotal {
            return Err(AppError::validation(
                "discount_amount",
                validator::INVALID_VALUE,
                format!(
                    "Discount of {:.2} exceeds the subtotal of {:.2}",
                    next.discount_amount, subtotal
                ),
            ));
        }
        let total = pricing::total(
            next.base_price,
            next.matted_coat_fee,
            add_ons.iter().copied(),
            next.discount_amount,
        );
        patch.total_amount = Some(total);
        next.total_amount = total;
    }

    patch.updated_at = Some(moment.at);
    next.updated_at = moment.at;

    Ok(PlannedWrite {
        patch,
        next,
        recheck_slot,
    })
}

/// The single mutation path for an appointment row.
///
/// Assigns the queue number, re-checks the slot against committed state and
/// recomputes `total_amount` before writing the patch. `current` must have
/// been read through [`lock`] in the same transaction.
pub async fn update(
    conn: &mut AsyncPgConnection,
    current: &AppointmentEntity,
    change: AppointmentChange,
    moment: &Moment,
) -> Result<AppointmentEntity, AppError> {
    let queue_number = match change.queue_on {
        Some(date) => Some(assign_queue_number(conn, current.id, date).await?),
        None => None,
    };
    let lines = if needs_lines(&change) {
        Some(line_items(conn, current.id).await?)
    } else {
        None
    };

    let planned = plan_write(current, change, queue_number, lines.as_deref(), moment)?;

    if planned.recheck_slot {
        let next = &planned.next;
        lock_slot(conn, next.preferred_date, next.preferred_time).await?;
        let conflict =
            find_slot_conflict(conn, next.preferred_date, next.preferred_time, Some(current.id))
                .await?;
        if let Some(existing) = conflict {
            return Err(validator::slot_conflict(&existing));
        }
    }

    let updated = diesel::update(appointments::table.find(current.id))
        .set(&planned.patch)
        .returning(AppointmentEntity::as_returning())
        .get_result(conn)
        .await?;
    Ok(updated)
}

/// Re-derives the payment status from the ledger and writes it back when it
/// changed.
pub async fn sync_payment_status(
    conn: &mut AsyncPgConnection,
    appointment: AppointmentEntity,
    at: DateTime<Utc>,
) -> Result<AppointmentEntity, AppError> {
    let ledger = payments_for(conn, appointment.id).await?;
    let derived = payment_sync::resolve(&ledger, appointment.refund_status);

    let method_changed = derived
        .payment_method
        .as_ref()
        .is_some_and(|method| appointment.payment_method.as_ref() != Some(method));
    if derived.status == appointment.payment_status && !method_changed {
        return Ok(appointment);
    }

    debug!(
        "Appointment #{} payment status {} -> {}",
        appointment.id, appointment.payment_status, derived.status
    );

    let updated = diesel::update(appointments::table.find(appointment.id))
        .set((
            appointments::payment_status.eq(derived.status),
            derived
                .payment_method
                .map(|method| appointments::payment_method.eq(Some(method))),
            appointments::updated_at.eq(at),
        ))
        .returning(AppointmentEntity::as_returning())
        .get_result(conn)
        .await?;
    Ok(updated)
}

/// Filters accepted by [`list`]. Empty filters return everything.
#[derive(Debug, Clone, Default)]
pub struct AppointmentFilter {
    pub owner_id: Option<i32>,
    pub groomer_id: Option<i32>,
    pub status: Option<AppointmentStatus>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

pub async fn list(
    conn: &mut AsyncPgConnection,
    filter: &AppointmentFilter,
) -> Result<Vec<AppointmentEntity>, AppError> {
    let mut query = appointments::table
        .select(AppointmentEntity::as_select())
        .into_boxed();
    if let Some(owner_id) = filter.owner_id {
        query = query.filter(appointments::owner_id.eq(owner_id));
    }
    if let Some(groomer_id) = filter.groomer_id {
        query = query.filter(appointments::groomer_id.eq(groomer_id));
    }
    if let Some(status) = filter.status {
        query = query.filter(appointments::status.eq(status));
    }
    if let Some(from) = filter.from {
        query = query.filter(appointments::preferred_date.ge(from));
    }
    if let Some(to) = filter.to {
        query = query.filter(appointments::preferred_date.le(to));
    }

    let rows = query
        .order_by((
            appointments::preferred_date.asc(),
            appointments::preferred_time.asc(),
        ))
        .load(conn)
        .await?;
    Ok(rows)
}

/// Waiting and in-progress appointments queued for `date`, in queue order.
pub async fn queue_for(
    conn: &mut AsyncPgConnection,
    date: NaiveDate,
) -> Result<Vec<AppointmentEntity>, AppError> {
    let rows = appointments::table
        .filter(appointments::queue_date.eq(date))
        .filter(
            appointments::status.eq_any([
                AppointmentStatus::Waiting,
                AppointmentStatus::InProgress,
            ]),
        )
        .order_by(appointments::daily_queue_number.asc())
        .select(AppointmentEntity::as_select())
        .load(conn)
        .await?;
    Ok(rows)
}
