//! Appointment state machine.
//!
//! Planning is pure: each function inspects the current row (and its active
//! session, if any) and produces the change set the store applies inside the
//! locked transaction. Nothing here touches the database.

use chrono::{NaiveDate, NaiveTime};
use tracing::warn;

use crate::{
    appointments::{actor::Actor, clock::Moment, queue, validator},
    enums::{ActorRole, AppointmentStatus, PaymentStatus, RefundStatus, SessionStatus},
    models::{
        AppointmentEntity, AppointmentPatch, AppointmentSessionEntity,
        CreateAppointmentSessionEntity, CreateRescheduleHistoryEntity,
    },
    platform::app_error::{AppError, StateCode},
};

use AppointmentStatus::*;

/// A change to one appointment, as accepted by the store's update path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppointmentChange {
    pub patch: AppointmentPatch,
    /// Assign a queue number for this date under the queue lock.
    pub queue_on: Option<NaiveDate>,
    /// Add-on lines changed; the total must be recomputed from storage.
    pub reprice: bool,
}

/// Closing values for the active session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionClose {
    pub session_id: i32,
    pub end_time: chrono::DateTime<chrono::Utc>,
    pub duration_minutes: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransitionPlan {
    pub from: AppointmentStatus,
    pub to: AppointmentStatus,
    pub change: AppointmentChange,
    pub open_session: Option<CreateAppointmentSessionEntity>,
    pub close_session: Option<SessionClose>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReschedulePlan {
    pub change: AppointmentChange,
    pub history: CreateRescheduleHistoryEntity,
    pub reopened: bool,
    /// The cancellation refunded the paid amount; the completed payments no
    /// longer count and must be voided before the status is re-derived.
    pub void_refunded_payments: bool,
}

/// Statuses reachable from `from` through a status update.
pub fn allowed_targets(from: AppointmentStatus) -> &'static [AppointmentStatus] {
    match from {
        Pending => &[Confirmed, Waiting, Cancelled, NoShow],
        Confirmed => &[Waiting, InProgress, Cancelled, NoShow],
        Waiting => &[InProgress, Cancelled, NoShow],
        InProgress => &[Completed, Cancelled, NoShow],
        Completed | Cancelled | NoShow => &[],
    }
}

pub fn ensure_transition(from: AppointmentStatus, to: AppointmentStatus) -> Result<(), AppError> {
    if from == Cancelled && to == Cancelled {
        return Err(AppError::state(
            StateCode::AlreadyCancelled,
            from,
            "Appointment is already cancelled",
        ));
    }
    if !allowed_targets(from).contains(&to) {
        return Err(AppError::state(
            StateCode::InvalidStatusTransition,
            from,
            format!("Cannot move an appointment from {} to {}", from, to),
        ));
    }
    Ok(())
}

/// Minutes worked in a session, never less than one.
pub fn session_minutes(session: &AppointmentSessionEntity, moment: &Moment) -> i32 {
    let minutes = (moment.at - session.start_time).num_minutes();
    minutes.clamp(1, i32::MAX as i64) as i32
}

fn close(session: Option<&AppointmentSessionEntity>, moment: &Moment) -> Option<SessionClose> {
    session.map(|session| SessionClose {
        session_id: session.id,
        end_time: moment.at,
        duration_minutes: session_minutes(session, moment),
    })
}

fn stamp_actual_if_unset(
    patch: &mut AppointmentPatch,
    current: &AppointmentEntity,
    moment: &Moment,
) {
    if current.actual_date.is_none() || current.actual_time.is_none() {
        patch.actual_date = Some(Some(moment.date));
        patch.actual_time = Some(Some(moment.time));
    }
}

fn base_patch(to: AppointmentStatus, notes: Option<String>, moment: &Moment) -> AppointmentPatch {
    AppointmentPatch {
        status: Some(to),
        status_notes: notes.map(Some),
        updated_at: Some(moment.at),
        ..Default::default()
    }
}

/// Plans a status update other than cancellation.
pub fn plan_transition(
    current: &AppointmentEntity,
    active_session: Option<&AppointmentSessionEntity>,
    to: AppointmentStatus,
    notes: Option<String>,
    moment: &Moment,
) -> Result<TransitionPlan, AppError> {
    ensure_transition(current.status, to)?;

    let mut change = AppointmentChange {
        patch: base_patch(to, notes, moment),
        ..Default::default()
    };
    let mut open_session = None;
    let mut close_session = None;

    match to {
        Waiting => {
            if queue::needs_number(current, moment.date) {
                change.queue_on = Some(moment.date);
            }
            stamp_actual_if_unset(&mut change.patch, current, moment);
        }
        InProgress => {
            let Some(groomer_id) = current.groomer_id else {
                return Err(AppError::state(
                    StateCode::GroomerRequired,
                    current.status,
                    "Assign a groomer before starting the appointment",
                ));
            };
            if active_session.is_some() {
                return Err(AppError::state(
                    StateCode::SessionAlreadyActive,
                    current.status,
                    "A grooming session is already active for this appointment",
                ));
            }
            open_session = Some(CreateAppointmentSessionEntity {
                appointment_id: current.id,
                groomer_id,
                start_time: moment.at,
                status: SessionStatus::Active,
            });
            if queue::needs_number(current, moment.date) {
                change.queue_on = Some(moment.date);
            }
            stamp_actual_if_unset(&mut change.patch, current, moment);
        }
        Completed => {
            let duration = match active_session {
                Some(session) => session_minutes(session, moment),
                None => {
                    warn!(
                        "Appointment #{} completed without an active session; recording 1 minute",
                        current.id
                    );
                    1
                }
            };
            close_session = close(active_session, moment);
            change.patch.duration_minutes = Some(Some(duration));
            stamp_actual_if_unset(&mut change.patch, current, moment);
        }
        NoShow => {
            change.patch.actual_date = Some(Some(moment.date));
            change.patch.actual_time = Some(Some(moment.time));
            close_session = close(active_session, moment);
        }
        Confirmed => {}
        Pending | Cancelled => {
            // Cancellation has its own plan; pending is never a target.
            return Err(AppError::state(
                StateCode::InvalidStatusTransition,
                current.status,
                format!("Cannot move an appointment from {} to {}", current.status, to),
            ));
        }
    }

    Ok(TransitionPlan {
        from: current.status,
        to,
        change,
        open_session,
        close_session,
    })
}

/// Refund decision for a cancellation. Only paid appointments get one.
pub fn refund_for(payment_status: PaymentStatus, cancelled_by: ActorRole) -> Option<RefundStatus> {
    if payment_status != PaymentStatus::Paid {
        return None;
    }
    match cancelled_by {
        ActorRole::PetOwner => Some(RefundStatus::NotRefunded),
        ActorRole::Staff | ActorRole::Owner => Some(RefundStatus::Refunded),
    }
}

pub fn plan_cancellation(
    current: &AppointmentEntity,
    active_session: Option<&AppointmentSessionEntity>,
    reason: &str,
    actor: &Actor,
    moment: &Moment,
) -> Result<TransitionPlan, AppError> {
    ensure_transition(current.status, Cancelled)?;
    let reason = validator::required_text("reason", reason)?;

    let mut patch = base_patch(Cancelled, None, moment);
    patch.cancelled_reason = Some(Some(reason));
    patch.cancelled_by_role = Some(Some(actor.role));
    patch.cancelled_by_user_id = Some(Some(actor.id));
    patch.cancelled_at = Some(Some(moment.at));

    if let Some(refund) = refund_for(current.payment_status, actor.role) {
        patch.refund_status = Some(Some(refund));
        if refund == RefundStatus::Refunded {
            patch.payment_status = Some(PaymentStatus::Refunded);
        }
    }

    Ok(TransitionPlan {
        from: current.status,
        to: Cancelled,
        change: AppointmentChange {
            patch,
            ..Default::default()
        },
        open_session: None,
        close_session: close(active_session, moment),
    })
}

pub fn plan_reschedule(
    current: &AppointmentEntity,
    new_date: NaiveDate,
    new_time: NaiveTime,
    reason: &str,
    reopen: bool,
    actor: &Actor,
    moment: &Moment,
) -> Result<ReschedulePlan, AppError> {
    let reopened = match current.status {
        Completed | NoShow => {
            return Err(AppError::state(
                StateCode::InvalidStatus,
                current.status,
                format!("A {} appointment cannot be rescheduled", current.status),
            ));
        }
        Cancelled if reopen && actor.is_staff() => true,
        Cancelled => {
            return Err(AppError::state(
                StateCode::InvalidStatus,
                current.status,
                "A cancelled appointment can only be rescheduled when staff reopen it",
            ));
        }
        _ => false,
    };

    let reason = validator::required_text("reason", reason)?;
    validator::ensure_not_past("new_date", new_date, moment.date)
        .map_err(|err| AppError::Validation(vec![err]))?;
    if !reopened && new_date == current.preferred_date && new_time == current.preferred_time {
        return Err(AppError::BadRequest(
            "The new schedule is the same as the current one".into(),
        ));
    }

    let mut patch = AppointmentPatch {
        preferred_date: Some(new_date),
        preferred_time: Some(new_time),
        updated_at: Some(moment.at),
        ..Default::default()
    };
    if reopened {
        patch.status = Some(Pending);
        patch.cancelled_reason = Some(None);
        patch.cancelled_by_role = Some(None);
        patch.cancelled_by_user_id = Some(None);
        patch.cancelled_at = Some(None);
        patch.refund_status = Some(None);
    }
    let void_refunded_payments =
        reopened && current.refund_status == Some(RefundStatus::Refunded);

    Ok(ReschedulePlan {
        change: AppointmentChange {
            patch,
            ..Default::default()
        },
        history: CreateRescheduleHistoryEntity {
            appointment_id: current.id,
            old_date: current.preferred_date,
            old_time: current.preferred_time,
            new_date,
            new_time,
            reason,
            rescheduled_by_role: actor.role,
            rescheduled_by_user_id: actor.id,
            rescheduled_at: moment.at,
        },
        reopened,
        void_refunded_payments,
    })
}

/// Groomers can be (re)assigned until the appointment reaches a terminal state.
pub fn ensure_groomer_assignable(current: &AppointmentEntity) -> Result<(), AppError> {
    if current.status.is_terminal() {
        return Err(AppError::state(
            StateCode::StatusNotEligible,
            current.status,
            format!("Cannot assign a groomer to a {} appointment", current.status),
        ));
    }
    Ok(())
}

/// Add-on services and pricing can only change while the appointment is open.
pub fn ensure_editable(current: &AppointmentEntity) -> Result<(), AppError> {
    if current.status.is_terminal() {
        return Err(AppError::state(
            StateCode::StatusNotEligible,
            current.status,
            format!("A {} appointment can no longer be changed", current.status),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::{
        appointments::{
            clock::BusinessClock,
            ledger, payment_sync,
            validator::fixtures::{appointment, payment},
        },
        enums::PaymentRecordStatus,
    };

    fn moment() -> Moment {
        BusinessClock::from_offset_minutes(8 * 60)
            .unwrap()
            .moment_at(Utc.with_ymd_and_hms(2026, 10, 15, 1, 30, 0).unwrap())
    }

    fn session(appointment_id: i32, started_minutes_ago: i64) -> AppointmentSessionEntity {
        AppointmentSessionEntity {
            id: 77,
            appointment_id,
            groomer_id: 5,
            start_time: moment().at - Duration::minutes(started_minutes_ago),
            end_time: None,
            duration_minutes: None,
            status: SessionStatus::Active,
        }
    }

    fn staff() -> Actor {
        Actor::new(ActorRole::Staff, 3, "Bea")
    }

    fn pet_owner() -> Actor {
        Actor::new(ActorRole::PetOwner, 7, "Ana")
    }

    fn state_code(result: Result<impl std::fmt::Debug, AppError>) -> StateCode {
        match result {
            Err(AppError::State { code, .. }) => code,
            other => panic!("expected a state error, got {other:?}"),
        }
    }

    #[test]
    fn happy_path_edges_are_allowed() {
        for (from, to) in [
            (Pending, Confirmed),
            (Confirmed, Waiting),
            (Waiting, InProgress),
            (Confirmed, InProgress),
            (InProgress, Completed),
            (Pending, NoShow),
            (InProgress, Cancelled),
        ] {
            assert!(ensure_transition(from, to).is_ok(), "{from} -> {to}");
        }
    }

    #[test]
    fn skipping_or_reversing_is_rejected() {
        for (from, to) in [
            (Pending, InProgress),
            (Pending, Completed),
            (Waiting, Confirmed),
            (Confirmed, Confirmed),
            (InProgress, Waiting),
        ] {
            assert_eq!(
                state_code(ensure_transition(from, to)),
                StateCode::InvalidStatusTransition
            );
        }
    }

    #[test]
    fn terminal_states_accept_no_status_update() {
        for from in AppointmentStatus::TERMINAL {
            assert!(allowed_targets(from).is_empty());
            for to in [Pending, Confirmed, Waiting, InProgress, Completed, NoShow] {
                let current = appointment(1, from);
                assert!(plan_transition(&current, None, to, None, &moment()).is_err());
            }
        }
    }

    #[test]
    fn waiting_requests_a_queue_number_and_stamps_arrival() {
        let current = appointment(1, Confirmed);
        let plan = plan_transition(&current, None, Waiting, None, &moment()).unwrap();
        assert_eq!(plan.change.queue_on, Some(moment().date));
        assert_eq!(plan.change.patch.actual_date, Some(Some(moment().date)));
        assert_eq!(plan.change.patch.actual_time, Some(Some(moment().time)));
        assert_eq!(plan.change.patch.status, Some(Waiting));
    }

    #[test]
    fn todays_queue_number_is_kept() {
        let mut current = appointment(1, Waiting);
        current.groomer_id = Some(5);
        current.daily_queue_number = Some(4);
        current.queue_date = Some(moment().date);
        current.actual_date = Some(moment().date);
        current.actual_time = Some(NaiveTime::from_hms_opt(9, 0, 0).unwrap());

        let plan = plan_transition(&current, None, InProgress, None, &moment()).unwrap();
        assert_eq!(plan.change.queue_on, None);
        assert_eq!(plan.change.patch.actual_time, None);
    }

    #[test]
    fn stale_queue_number_is_replaced() {
        let mut current = appointment(1, Confirmed);
        current.daily_queue_number = Some(2);
        current.queue_date = moment().date.pred_opt();
        let plan = plan_transition(&current, None, Waiting, None, &moment()).unwrap();
        assert_eq!(plan.change.queue_on, Some(moment().date));
    }

    #[test]
    fn starting_without_groomer_fails() {
        let current = appointment(1, Confirmed);
        assert_eq!(
            state_code(plan_transition(&current, None, InProgress, None, &moment())),
            StateCode::GroomerRequired
        );
    }

    #[test]
    fn starting_opens_exactly_one_session() {
        let mut current = appointment(1, Confirmed);
        current.groomer_id = Some(5);

        let plan = plan_transition(&current, None, InProgress, None, &moment()).unwrap();
        let opened = plan.open_session.unwrap();
        assert_eq!(opened.groomer_id, 5);
        assert_eq!(opened.status, SessionStatus::Active);
        assert_eq!(plan.change.queue_on, Some(moment().date));

        let active = session(1, 5);
        assert_eq!(
            state_code(plan_transition(&current, Some(&active), InProgress, None, &moment())),
            StateCode::SessionAlreadyActive
        );
    }

    #[test]
    fn completing_closes_session_with_elapsed_minutes() {
        let mut current = appointment(1, InProgress);
        current.groomer_id = Some(5);
        let active = session(1, 95);

        let plan = plan_transition(&current, Some(&active), Completed, None, &moment()).unwrap();
        let closed = plan.close_session.unwrap();
        assert_eq!(closed.session_id, 77);
        assert_eq!(closed.duration_minutes, 95);
        assert_eq!(closed.end_time, moment().at);
        assert_eq!(plan.change.patch.duration_minutes, Some(Some(95)));
    }

    #[test]
    fn duration_is_at_least_one_minute() {
        let current = appointment(1, InProgress);
        let just_started = session(1, 0);
        let plan =
            plan_transition(&current, Some(&just_started), Completed, None, &moment()).unwrap();
        assert_eq!(plan.change.patch.duration_minutes, Some(Some(1)));

        let plan = plan_transition(&current, None, Completed, None, &moment()).unwrap();
        assert_eq!(plan.change.patch.duration_minutes, Some(Some(1)));
        assert!(plan.close_session.is_none());
    }

    #[test]
    fn no_show_always_restamps() {
        let mut current = appointment(1, Waiting);
        current.actual_date = moment().date.pred_opt();
        current.actual_time = Some(NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        let plan = plan_transition(&current, None, NoShow, None, &moment()).unwrap();
        assert_eq!(plan.change.patch.actual_date, Some(Some(moment().date)));
        assert_eq!(plan.change.patch.refund_status, None);
    }

    #[test]
    fn notes_are_recorded_with_the_status() {
        let current = appointment(1, Pending);
        let plan =
            plan_transition(&current, None, Confirmed, Some("Called owner".into()), &moment())
                .unwrap();
        assert_eq!(
            plan.change.patch.status_notes,
            Some(Some("Called owner".to_string()))
        );
    }

    #[test]
    fn owner_self_cancellation_forfeits_payment() {
        let mut current = appointment(1, Confirmed);
        current.payment_status = PaymentStatus::Paid;
        let plan = plan_cancellation(&current, None, "Change of plans", &pet_owner(), &moment())
            .unwrap();
        let patch = plan.change.patch;
        assert_eq!(patch.refund_status, Some(Some(RefundStatus::NotRefunded)));
        assert_eq!(patch.payment_status, None);
        assert_eq!(patch.cancelled_by_role, Some(Some(ActorRole::PetOwner)));
        assert_eq!(patch.cancelled_by_user_id, Some(Some(7)));
    }

    #[test]
    fn staff_cancellation_refunds_paid_appointments() {
        let mut current = appointment(1, Waiting);
        current.payment_status = PaymentStatus::Paid;
        let plan = plan_cancellation(&current, None, "Groomer sick", &staff(), &moment()).unwrap();
        let patch = plan.change.patch;
        assert_eq!(patch.refund_status, Some(Some(RefundStatus::Refunded)));
        assert_eq!(patch.payment_status, Some(PaymentStatus::Refunded));
    }

    #[test]
    fn unpaid_cancellation_has_no_refund_decision() {
        let current = appointment(1, Pending);
        let plan = plan_cancellation(&current, None, "Duplicate", &staff(), &moment()).unwrap();
        assert_eq!(plan.change.patch.refund_status, None);
    }

    #[test]
    fn cancellation_requires_reason_and_open_appointment() {
        let current = appointment(1, Pending);
        assert!(matches!(
            plan_cancellation(&current, None, "   ", &staff(), &moment()),
            Err(AppError::Validation(_))
        ));

        let cancelled = appointment(1, Cancelled);
        assert_eq!(
            state_code(plan_cancellation(&cancelled, None, "again", &staff(), &moment())),
            StateCode::AlreadyCancelled
        );

        let completed = appointment(1, Completed);
        assert_eq!(
            state_code(plan_cancellation(&completed, None, "late", &staff(), &moment())),
            StateCode::InvalidStatusTransition
        );
    }

    #[test]
    fn cancelling_mid_groom_closes_the_session() {
        let current = appointment(1, InProgress);
        let active = session(1, 20);
        let plan = plan_cancellation(&current, Some(&active), "Pet distressed", &staff(), &moment())
            .unwrap();
        assert_eq!(plan.close_session.unwrap().duration_minutes, 20);
    }

    #[test]
    fn reschedule_records_previous_slot() {
        let current = appointment(1, Confirmed);
        let new_date = NaiveDate::from_ymd_opt(2026, 10, 20).unwrap();
        let new_time = NaiveTime::from_hms_opt(14, 0, 0).unwrap();
        let plan = plan_reschedule(
            &current,
            new_date,
            new_time,
            "Work trip",
            false,
            &pet_owner(),
            &moment(),
        )
        .unwrap();

        assert_eq!(plan.history.old_date, current.preferred_date);
        assert_eq!(plan.history.old_time, current.preferred_time);
        assert_eq!(plan.history.new_date, new_date);
        assert_eq!(plan.history.rescheduled_by_role, ActorRole::PetOwner);
        assert_eq!(plan.change.patch.preferred_time, Some(new_time));
        assert!(plan.change.patch.changes_slot(&current));
        assert_eq!(plan.change.patch.status, None);
    }

    #[test]
    fn reschedule_rejects_terminal_and_past() {
        let tomorrow = moment().date.succ_opt().unwrap();
        let ten = NaiveTime::from_hms_opt(10, 0, 0).unwrap();
        for status in [Completed, NoShow] {
            let current = appointment(1, status);
            assert_eq!(
                state_code(plan_reschedule(
                    &current, tomorrow, ten, "x", false, &staff(), &moment()
                )),
                StateCode::InvalidStatus
            );
        }

        let current = appointment(1, Pending);
        let yesterday = moment().date.pred_opt().unwrap();
        assert!(matches!(
            plan_reschedule(&current, yesterday, ten, "x", false, &staff(), &moment()),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn cancelled_appointment_reopens_only_for_staff() {
        let mut current = appointment(1, Cancelled);
        current.cancelled_reason = Some("Sick".into());
        let date = NaiveDate::from_ymd_opt(2026, 10, 22).unwrap();
        let time = NaiveTime::from_hms_opt(9, 0, 0).unwrap();

        assert_eq!(
            state_code(plan_reschedule(
                &current, date, time, "Better", true, &pet_owner(), &moment()
            )),
            StateCode::InvalidStatus
        );
        assert_eq!(
            state_code(plan_reschedule(
                &current, date, time, "Better", false, &staff(), &moment()
            )),
            StateCode::InvalidStatus
        );

        let plan =
            plan_reschedule(&current, date, time, "Better", true, &staff(), &moment()).unwrap();
        assert!(plan.reopened);
        assert_eq!(plan.change.patch.status, Some(Pending));
        assert_eq!(plan.change.patch.cancelled_reason, Some(None));
        assert!(!plan.void_refunded_payments);
    }

    #[test]
    fn reopened_refunded_appointment_can_be_paid_again() {
        let mut paid = appointment(1, Confirmed);
        paid.payment_status = PaymentStatus::Paid;
        let cancel =
            plan_cancellation(&paid, None, "Groomer sick", &staff(), &moment()).unwrap();
        let mut cancelled = paid.clone();
        cancel.change.patch.apply_to(&mut cancelled);
        assert_eq!(cancelled.refund_status, Some(RefundStatus::Refunded));

        let date = NaiveDate::from_ymd_opt(2026, 10, 22).unwrap();
        let time = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let plan =
            plan_reschedule(&cancelled, date, time, "Rebooked", true, &staff(), &moment())
                .unwrap();
        assert!(plan.void_refunded_payments);

        let mut reopened = cancelled.clone();
        plan.change.patch.apply_to(&mut reopened);
        assert_eq!(reopened.status, Pending);
        assert_eq!(reopened.refund_status, None);

        // The refunded payment is voided, so the ledger no longer reads paid.
        let voided = [payment(1, PaymentRecordStatus::Cancelled)];
        let derived = payment_sync::resolve(&voided, reopened.refund_status);
        assert_eq!(derived.status, PaymentStatus::Pending);
        reopened.payment_status = derived.status;
        assert!(ledger::ensure_payable(&reopened).is_ok());
    }

    #[test]
    fn groomer_assignment_and_edits_stop_at_terminal_states() {
        for status in AppointmentStatus::TERMINAL {
            let current = appointment(1, status);
            assert_eq!(
                state_code(ensure_groomer_assignable(&current)),
                StateCode::StatusNotEligible
            );
            assert!(ensure_editable(&current).is_err());
        }
        assert!(ensure_groomer_assignable(&appointment(1, InProgress)).is_ok());
    }
}
