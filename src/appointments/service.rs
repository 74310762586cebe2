use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use diesel_async::{AsyncConnection, AsyncPgConnection};
use serde_json::json;
use tracing::{info, warn};

use crate::{
    api::payment_provider::PaymentPort,
    appointments::{
        actor::Actor,
        clock::{BusinessClock, Moment},
        commands::{
            AddServicesReq, AdjustPricingReq, AssignGroomerReq, CancelReq, CreateAppointmentReq,
            RescheduleReq, UpdateStatusReq,
        },
        lifecycle::{self, AppointmentChange, TransitionPlan},
        pricing, store,
        store::AppointmentFilter,
        time_format,
        validator::{self, DUPLICATE_SERVICE, INVALID_VALUE},
        views::{self, AppointmentDetail, AppointmentView},
    },
    enums::{ActorRole, AppointmentStatus, PaymentStatus, UserStatus},
    events::{self, *},
    models::{
        AppointmentEntity, AppointmentPatch, CreateAppointmentEntity,
        CreateAppointmentServiceEntity,
    },
    platform::{
        app_error::{AppError, ConflictCode, FieldError},
        db::DbPool,
        outbox,
    },
};

/// Appointment lifecycle operations shared by every caller role.
///
/// Each mutation runs in one transaction that locks the appointment row,
/// applies the change through [`store::update`], re-derives the payment
/// status and queues its events in the outbox.
#[derive(Clone)]
pub struct AppointmentService {
    pub(super) pool: DbPool,
    pub(super) clock: BusinessClock,
    pub(super) payments: Arc<dyn PaymentPort>,
}

impl AppointmentService {
    pub fn new(pool: DbPool, clock: BusinessClock, payments: Arc<dyn PaymentPort>) -> Self {
        Self {
            pool,
            clock,
            payments,
        }
    }

    pub async fn create(
        &self,
        actor: &Actor,
        req: CreateAppointmentReq,
    ) -> Result<AppointmentView, AppError> {
        let moment = self.clock.now();
        let booking =
            validator::validate_booking_request(req, moment.date).map_err(AppError::Validation)?;
        let actor = actor.clone();

        let mut pooled = self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        let appointment = conn
            .transaction(move |conn| {
                Box::pin(async move {
                    let Some(pet) = store::find_pet(conn, booking.pet_id).await? else {
                        return Err(AppError::validation(
                            "pet_id",
                            INVALID_VALUE,
                            format!("Pet #{} does not exist", booking.pet_id),
                        ));
                    };
                    actor.require_access_to(pet.owner_id)?;

                    store::lock_pet(conn, pet.id).await?;
                    if let Some(existing) =
                        store::find_active_for_pet(conn, pet.id, pet.owner_id).await?
                    {
                        return Err(validator::active_appointment_conflict(&existing));
                    }

                    let mut service_ids = booking.additional_services.clone();
                    service_ids.push(booking.service_id);
                    let catalog = store::load_catalog(conn, &service_ids).await?;
                    let quote = validator::quote_booking(
                        booking.service_id,
                        &booking.additional_services,
                        &catalog,
                        &pet.size,
                    )
                    .map_err(AppError::Validation)?;

                    store::lock_slot(conn, booking.preferred_date, booking.preferred_time).await?;
                    if let Some(existing) = store::find_slot_conflict(
                        conn,
                        booking.preferred_date,
                        booking.preferred_time,
                        None,
                    )
                    .await?
                    {
                        return Err(validator::slot_conflict(&existing));
                    }

                    let total_amount = pricing::total(
                        quote.primary.price,
                        booking.matted_coat_fee,
                        quote.add_ons.iter().map(|service| service.price),
                        0.0,
                    );
                    let appointment = store::insert(
                        conn,
                        CreateAppointmentEntity {
                            pet_id: pet.id,
                            owner_id: pet.owner_id,
                            service_id: booking.service_id,
                            preferred_date: booking.preferred_date,
                            preferred_time: booking.preferred_time,
                            base_price: quote.primary.price,
                            matted_coat_fee: booking.matted_coat_fee,
                            discount_amount: 0.0,
                            total_amount,
                            status: AppointmentStatus::Pending,
                            payment_status: PaymentStatus::Pending,
                            special_notes: booking.special_notes,
                        },
                    )
                    .await?;

                    store::insert_line_items(
                        conn,
                        quote
                            .add_ons
                            .iter()
                            .map(|service| CreateAppointmentServiceEntity {
                                appointment_id: appointment.id,
                                service_id: service.service_id,
                                pet_id: pet.id,
                                price: service.price,
                                payment_method: None,
                            })
                            .collect(),
                    )
                    .await?;

                    outbox::publish(
                        conn,
                        events::APPOINTMENT_CREATED.into(),
                        AppointmentCreatedEvent {
                            appointment_id: appointment.id,
                            owner_id: appointment.owner_id,
                            pet_id: appointment.pet_id,
                            preferred_date: appointment.preferred_date,
                            preferred_time: time_format::to_display(appointment.preferred_time),
                            total_amount: appointment.total_amount,
                        },
                    )
                    .await?;

                    Ok::<AppointmentEntity, AppError>(appointment)
                })
            })
            .await?;

        info!(
            "Appointment #{} booked for pet #{} on {}",
            appointment.id, appointment.pet_id, appointment.preferred_date
        );
        Ok(appointment.into())
    }

    pub async fn reschedule(
        &self,
        actor: &Actor,
        id: i32,
        req: RescheduleReq,
    ) -> Result<AppointmentView, AppError> {
        let new_time = time_format::parse_time(&req.new_time)
            .map_err(|err| AppError::validation("new_time", INVALID_VALUE, err.to_string()))?;
        let moment = self.clock.now();
        let actor = actor.clone();

        let mut pooled = self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        let appointment = conn
            .transaction(move |conn| {
                Box::pin(async move {
                    let current = store::lock(conn, id).await?;
                    actor.require_access_to(current.owner_id)?;

                    let plan = lifecycle::plan_reschedule(
                        &current,
                        req.new_date,
                        new_time,
                        &req.reason,
                        req.reopen,
                        &actor,
                        &moment,
                    )?;

                    if plan.reopened {
                        store::lock_pet(conn, current.pet_id).await?;
                        if let Some(existing) =
                            store::find_active_for_pet(conn, current.pet_id, current.owner_id)
                                .await?
                        {
                            return Err(validator::active_appointment_conflict(&existing));
                        }
                    }

                    let history = plan.history;
                    let updated = store::update(conn, &current, plan.change, &moment).await?;
                    store::append_history(conn, history.clone()).await?;
                    if plan.void_refunded_payments {
                        let voided = store::void_refunded_payments(conn, id, moment.at).await?;
                        info!(
                            "Voided {} refunded payment(s) of reopened appointment #{}",
                            voided, id
                        );
                    }
                    let updated = store::sync_payment_status(conn, updated, moment.at).await?;

                    outbox::publish(
                        conn,
                        events::APPOINTMENT_RESCHEDULED.into(),
                        AppointmentRescheduledEvent {
                            appointment_id: updated.id,
                            owner_id: updated.owner_id,
                            old_date: history.old_date,
                            old_time: time_format::to_display(history.old_time),
                            new_date: history.new_date,
                            new_time: time_format::to_display(history.new_time),
                            reason: history.reason,
                            rescheduled_by_role: history.rescheduled_by_role,
                        },
                    )
                    .await?;

                    Ok::<AppointmentEntity, AppError>(updated)
                })
            })
            .await?;

        Ok(appointment.into())
    }

    /// Staff status update. Moving to `cancelled` goes through the
    /// cancellation rules with `notes` as the reason.
    pub async fn update_status(
        &self,
        actor: &Actor,
        id: i32,
        req: UpdateStatusReq,
    ) -> Result<AppointmentView, AppError> {
        actor.require_staff()?;
        if req.status == AppointmentStatus::Cancelled {
            let reason = req.notes.unwrap_or_default();
            return self.cancel(actor, id, CancelReq { reason }).await;
        }

        let moment = self.clock.now();
        let notes = req
            .notes
            .map(|notes| notes.trim().to_string())
            .filter(|notes| !notes.is_empty());

        let mut pooled = self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        let appointment = conn
            .transaction(move |conn| {
                Box::pin(async move {
                    let current = store::lock(conn, id).await?;
                    let active = store::active_session(conn, id).await?;
                    let plan = lifecycle::plan_transition(
                        &current,
                        active.as_ref(),
                        req.status,
                        notes,
                        &moment,
                    )?;
                    apply_transition(conn, &current, plan, &moment).await
                })
            })
            .await?;

        info!(
            "Appointment #{} is now {}",
            appointment.id, appointment.status
        );
        Ok(appointment.into())
    }

    pub async fn assign_groomer(
        &self,
        actor: &Actor,
        id: i32,
        req: AssignGroomerReq,
    ) -> Result<AppointmentView, AppError> {
        actor.require_staff()?;
        let moment = self.clock.now();
        let groomer_id = req.groomer_id;

        let mut pooled = self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        let appointment = conn
            .transaction(move |conn| {
                Box::pin(async move {
                    let current = store::lock(conn, id).await?;
                    lifecycle::ensure_groomer_assignable(&current)?;

                    let Some(groomer) = store::find_user(conn, groomer_id).await? else {
                        return Err(AppError::GroomerInvalid(format!(
                            "Groomer #{} does not exist",
                            groomer_id
                        )));
                    };
                    if !groomer.role.is_staff() {
                        return Err(AppError::GroomerInvalid(format!(
                            "{} is not a staff member",
                            groomer.full_name
                        )));
                    }
                    if groomer.status != UserStatus::Active {
                        return Err(AppError::GroomerInvalid(format!(
                            "{} is not active",
                            groomer.full_name
                        )));
                    }

                    let change = AppointmentChange {
                        patch: AppointmentPatch {
                            groomer_id: Some(Some(groomer_id)),
                            ..Default::default()
                        },
                        ..Default::default()
                    };
                    let updated = store::update(conn, &current, change, &moment).await?;
                    store::reassign_active_session(conn, id, groomer_id).await?;
                    let updated = store::sync_payment_status(conn, updated, moment.at).await?;

                    outbox::publish(
                        conn,
                        events::GROOMER_ASSIGNED.into(),
                        GroomerAssignedEvent {
                            appointment_id: updated.id,
                            owner_id: updated.owner_id,
                            groomer_id,
                        },
                    )
                    .await?;

                    Ok::<AppointmentEntity, AppError>(updated)
                })
            })
            .await?;

        Ok(appointment.into())
    }

    pub async fn add_services(
        &self,
        actor: &Actor,
        id: i32,
        req: AddServicesReq,
    ) -> Result<AppointmentView, AppError> {
        if let Some(fee) = req.matted_coat_fee {
            validator::ensure_amount("matted_coat_fee", fee)
                .map_err(|err| AppError::Validation(vec![err]))?;
        }
        let moment = self.clock.now();
        let actor = actor.clone();

        let mut pooled = self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        let appointment = conn
            .transaction(move |conn| {
                Box::pin(async move {
                    let current = store::lock(conn, id).await?;
                    actor.require_access_to(current.owner_id)?;
                    lifecycle::ensure_editable(&current)?;

                    let pet_size = store::find_pet(conn, current.pet_id)
                        .await?
                        .map(|pet| pet.size)
                        .unwrap_or_default();
                    let existing = store::line_items(conn, id).await?;
                    let catalog = store::load_catalog(conn, &req.service_ids).await?;
                    let priced = validator::quote_add_ons(
                        &current,
                        &existing,
                        &req.service_ids,
                        &catalog,
                        &pet_size,
                    )
                    .map_err(add_on_rejection)?;

                    store::insert_line_items(
                        conn,
                        priced
                            .iter()
                            .map(|service| CreateAppointmentServiceEntity {
                                appointment_id: id,
                                service_id: service.service_id,
                                pet_id: current.pet_id,
                                price: service.price,
                                payment_method: current.payment_method.clone(),
                            })
                            .collect(),
                    )
                    .await?;

                    let change = AppointmentChange {
                        patch: AppointmentPatch {
                            matted_coat_fee: req.matted_coat_fee,
                            ..Default::default()
                        },
                        reprice: true,
                        ..Default::default()
                    };
                    let updated = store::update(conn, &current, change, &moment).await?;
                    store::sync_payment_status(conn, updated, moment.at).await
                })
            })
            .await?;

        Ok(appointment.into())
    }

    pub async fn remove_service(
        &self,
        actor: &Actor,
        id: i32,
        service_id: i32,
    ) -> Result<AppointmentView, AppError> {
        let moment = self.clock.now();
        let actor = actor.clone();

        let mut pooled = self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        let appointment = conn
            .transaction(move |conn| {
                Box::pin(async move {
                    let current = store::lock(conn, id).await?;
                    actor.require_access_to(current.owner_id)?;
                    lifecycle::ensure_editable(&current)?;

                    if store::delete_line_item(conn, id, service_id).await? == 0 {
                        return Err(AppError::NotFound);
                    }

                    let change = AppointmentChange {
                        reprice: true,
                        ..Default::default()
                    };
                    let updated = store::update(conn, &current, change, &moment).await?;
                    store::sync_payment_status(conn, updated, moment.at).await
                })
            })
            .await?;

        Ok(appointment.into())
    }

    pub async fn cancel(
        &self,
        actor: &Actor,
        id: i32,
        req: CancelReq,
    ) -> Result<AppointmentView, AppError> {
        let moment = self.clock.now();
        let caller = actor.clone();

        let mut pooled = self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        let appointment = conn
            .transaction(move |conn| {
                Box::pin(async move {
                    let actor = caller;
                    let current = store::lock(conn, id).await?;
                    actor.require_access_to(current.owner_id)?;
                    let active = store::active_session(conn, id).await?;
                    let plan = lifecycle::plan_cancellation(
                        &current,
                        active.as_ref(),
                        &req.reason,
                        &actor,
                        &moment,
                    )?;
                    apply_transition(conn, &current, plan, &moment).await
                })
            })
            .await?;

        info!(
            "Appointment #{} cancelled by {} #{}",
            appointment.id, actor.role, actor.id
        );
        Ok(appointment.into())
    }

    /// Staff-only discount and matted coat fee adjustment.
    pub async fn adjust_pricing(
        &self,
        actor: &Actor,
        id: i32,
        req: AdjustPricingReq,
    ) -> Result<AppointmentView, AppError> {
        actor.require_staff()?;
        if req.discount_amount.is_none() && req.matted_coat_fee.is_none() {
            return Err(AppError::BadRequest(
                "Provide a discount_amount or a matted_coat_fee".into(),
            ));
        }
        let errors: Vec<FieldError> = [
            ("discount_amount", req.discount_amount),
            ("matted_coat_fee", req.matted_coat_fee),
        ]
        .into_iter()
        .filter_map(|(field, amount)| {
            amount.and_then(|amount| validator::ensure_amount(field, amount).err())
        })
        .collect();
        if !errors.is_empty() {
            return Err(AppError::Validation(errors));
        }
        let moment = self.clock.now();

        let mut pooled = self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        let appointment = conn
            .transaction(move |conn| {
                Box::pin(async move {
                    let current = store::lock(conn, id).await?;
                    lifecycle::ensure_editable(&current)?;

                    let change = AppointmentChange {
                        patch: AppointmentPatch {
                            discount_amount: req.discount_amount,
                            matted_coat_fee: req.matted_coat_fee,
                            ..Default::default()
                        },
                        ..Default::default()
                    };
                    let updated = store::update(conn, &current, change, &moment).await?;
                    store::sync_payment_status(conn, updated, moment.at).await
                })
            })
            .await?;

        Ok(appointment.into())
    }

    /// Today's (or `date`'s) waiting and in-progress appointments in queue order.
    pub async fn get_queue(
        &self,
        actor: &Actor,
        date: Option<NaiveDate>,
    ) -> Result<Vec<AppointmentDetail>, AppError> {
        actor.require_staff()?;
        let date = date.unwrap_or_else(|| self.clock.today());

        let mut pooled = self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        let queued = store::queue_for(conn, date).await?;
        views::load_details(conn, queued).await
    }

    pub async fn sync_payment_status(
        &self,
        actor: &Actor,
        id: i32,
    ) -> Result<PaymentStatus, AppError> {
        let at = Utc::now();
        let actor = actor.clone();

        let mut pooled = self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        let appointment = conn
            .transaction(move |conn| {
                Box::pin(async move {
                    let current = store::lock(conn, id).await?;
                    actor.require_access_to(current.owner_id)?;
                    store::sync_payment_status(conn, current, at).await
                })
            })
            .await?;

        Ok(appointment.payment_status)
    }

    pub async fn get_by_id(&self, actor: &Actor, id: i32) -> Result<AppointmentDetail, AppError> {
        let mut pooled = self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        let appointment = store::find(conn, id).await?;
        actor.require_access_to(appointment.owner_id)?;

        let appointment = heal_payment_status(conn, appointment, Utc::now()).await;
        let mut details = views::load_details(conn, vec![appointment]).await?;
        details.pop().ok_or(AppError::NotFound)
    }

    pub async fn get_by_owner(
        &self,
        actor: &Actor,
        owner_id: i32,
    ) -> Result<Vec<AppointmentDetail>, AppError> {
        actor.require_access_to(owner_id)?;
        self.query(AppointmentFilter {
            owner_id: Some(owner_id),
            ..Default::default()
        })
        .await
    }

    pub async fn get_by_groomer(
        &self,
        actor: &Actor,
        groomer_id: i32,
    ) -> Result<Vec<AppointmentDetail>, AppError> {
        actor.require_staff()?;
        self.query(AppointmentFilter {
            groomer_id: Some(groomer_id),
            ..Default::default()
        })
        .await
    }

    pub async fn get_by_date_range(
        &self,
        actor: &Actor,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AppointmentDetail>, AppError> {
        actor.require_staff()?;
        if from > to {
            return Err(AppError::validation(
                "from",
                INVALID_VALUE,
                format!("{} is after {}", from, to),
            ));
        }
        self.query(AppointmentFilter {
            from: Some(from),
            to: Some(to),
            ..Default::default()
        })
        .await
    }

    pub async fn get_by_status(
        &self,
        actor: &Actor,
        status: AppointmentStatus,
    ) -> Result<Vec<AppointmentDetail>, AppError> {
        actor.require_staff()?;
        self.query(AppointmentFilter {
            status: Some(status),
            ..Default::default()
        })
        .await
    }

    /// Staff listing with any combination of filters.
    pub async fn search(
        &self,
        actor: &Actor,
        filter: AppointmentFilter,
    ) -> Result<Vec<AppointmentDetail>, AppError> {
        actor.require_staff()?;
        self.query(filter).await
    }

    async fn query(&self, filter: AppointmentFilter) -> Result<Vec<AppointmentDetail>, AppError> {
        let mut pooled = self
            .pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        let at = Utc::now();
        let mut healed = Vec::new();
        for appointment in store::list(conn, &filter).await? {
            healed.push(heal_payment_status(conn, appointment, at).await);
        }
        views::load_details(conn, healed).await
    }
}

/// Turns add-on validation failures into a response. A request that only
/// repeats services already on the appointment is a conflict; anything else
/// is a validation failure.
fn add_on_rejection(errors: Vec<FieldError>) -> AppError {
    if errors.iter().all(|err| err.code == DUPLICATE_SERVICE) {
        let message = errors
            .iter()
            .map(|err| err.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        return AppError::conflict(
            ConflictCode::DuplicateService,
            message,
            Some(json!(errors)),
        );
    }
    AppError::Validation(errors)
}

/// Writes a transition and everything linked to it: the session change, the
/// row patch, the payment status and the outgoing events.
async fn apply_transition(
    conn: &mut AsyncPgConnection,
    current: &AppointmentEntity,
    plan: TransitionPlan,
    moment: &Moment,
) -> Result<AppointmentEntity, AppError> {
    let TransitionPlan {
        from,
        to,
        change,
        open_session,
        close_session,
    } = plan;

    if let Some(close) = close_session {
        store::close_session(conn, close).await?;
    }
    if let Some(session) = open_session {
        store::open_session(conn, session).await?;
    }

    let updated = store::update(conn, current, change, moment).await?;
    let updated = store::sync_payment_status(conn, updated, moment.at).await?;

    outbox::publish(
        conn,
        events::APPOINTMENT_STATUS_CHANGED.into(),
        AppointmentStatusChangedEvent {
            appointment_id: updated.id,
            owner_id: updated.owner_id,
            from,
            to,
            daily_queue_number: updated.daily_queue_number,
            groomer_id: updated.groomer_id,
        },
    )
    .await?;

    match to {
        AppointmentStatus::Completed => {
            outbox::publish(
                conn,
                events::APPOINTMENT_COMPLETED.into(),
                AppointmentCompletedEvent {
                    appointment_id: updated.id,
                    owner_id: updated.owner_id,
                    duration_minutes: updated.duration_minutes,
                    total_amount: updated.total_amount,
                },
            )
            .await?;

            let additional_services = store::line_items(conn, updated.id).await?;
            outbox::publish(
                conn,
                events::APPOINTMENT_FINALIZED.into(),
                AppointmentFinalizedEvent {
                    appointment: updated.clone(),
                    additional_services,
                    finalized_at: moment.at,
                },
            )
            .await?;
        }
        AppointmentStatus::Cancelled => {
            outbox::publish(
                conn,
                events::APPOINTMENT_CANCELLED.into(),
                AppointmentCancelledEvent {
                    appointment_id: updated.id,
                    owner_id: updated.owner_id,
                    reason: updated.cancelled_reason.clone().unwrap_or_default(),
                    cancelled_by_role: updated.cancelled_by_role.unwrap_or(ActorRole::Staff),
                    refund_status: updated.refund_status,
                },
            )
            .await?;
        }
        _ => {}
    }

    Ok(updated)
}

/// Brings a read's payment status up to date. Failures are logged and the
/// row is returned as read.
async fn heal_payment_status(
    conn: &mut AsyncPgConnection,
    appointment: AppointmentEntity,
    at: DateTime<Utc>,
) -> AppointmentEntity {
    let id = appointment.id;
    let fallback = appointment.clone();
    let result = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let current = store::lock(conn, id).await?;
                store::sync_payment_status(conn, current, at).await
            })
        })
        .await;

    match result {
        Ok(healed) => healed,
        Err(err) => {
            warn!(
                "Failed to refresh payment status of appointment #{}: {:?}",
                id, err
            );
            fallback
        }
    }
}
