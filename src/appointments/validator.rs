use std::collections::{HashMap, HashSet};

use chrono::{NaiveDate, NaiveTime};
use serde_json::json;

use crate::{
    appointments::{commands::CreateAppointmentReq, pricing::PriceTable, time_format},
    enums::ServiceAvailability,
    models::{AppointmentEntity, AppointmentServiceEntity, GroomingServiceEntity},
    platform::app_error::{AppError, ConflictCode, FieldError},
};

pub const DUPLICATE_SERVICE: &str = "DUPLICATE_SERVICE";
pub const PRIMARY_SERVICE_CONFLICT: &str = "PRIMARY_SERVICE_CONFLICT";
pub const SERVICE_NOT_FOUND: &str = "SERVICE_NOT_FOUND";
pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
pub const INVALID_PRICE: &str = "INVALID_PRICE";
pub const REQUIRED: &str = "REQUIRED";
pub const PAST_DATE: &str = "PAST_DATE";
pub const INVALID_VALUE: &str = "INVALID_VALUE";

/// A booking request with every required field present and parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingRequest {
    pub pet_id: i32,
    pub service_id: i32,
    pub preferred_date: NaiveDate,
    pub preferred_time: NaiveTime,
    pub additional_services: Vec<i32>,
    pub matted_coat_fee: f64,
    pub special_notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PricedService {
    pub service_id: i32,
    pub name: String,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookingQuote {
    pub primary: PricedService,
    pub add_ons: Vec<PricedService>,
}

pub type Catalog = HashMap<i32, GroomingServiceEntity>;

/// Checks presence and shape of the booking fields, before touching storage.
pub fn validate_booking_request(
    req: CreateAppointmentReq,
    today: NaiveDate,
) -> Result<BookingRequest, Vec<FieldError>> {
    let mut errors = Vec::new();

    let pet_id = req.pet_id.filter(|id| *id > 0);
    if pet_id.is_none() {
        errors.push(FieldError::new("pet_id", REQUIRED, "A pet is required"));
    }
    let service_id = req.service_id.filter(|id| *id > 0);
    if service_id.is_none() {
        errors.push(FieldError::new("service_id", REQUIRED, "A service is required"));
    }

    let preferred_date = match req.preferred_date {
        Some(date) => match ensure_not_past("preferred_date", date, today) {
            Ok(()) => Some(date),
            Err(err) => {
                errors.push(err);
                None
            }
        },
        None => {
            errors.push(FieldError::new("preferred_date", REQUIRED, "A date is required"));
            None
        }
    };

    let preferred_time = match req.preferred_time.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => match time_format::parse_time(raw) {
            Ok(time) => Some(time),
            Err(err) => {
                errors.push(FieldError::new("preferred_time", INVALID_VALUE, err.to_string()));
                None
            }
        },
        _ => {
            errors.push(FieldError::new("preferred_time", REQUIRED, "A time is required"));
            None
        }
    };

    let matted_coat_fee = req.matted_coat_fee.unwrap_or(0.0);
    if let Err(err) = ensure_amount("matted_coat_fee", matted_coat_fee) {
        errors.push(err);
    }

    match (pet_id, service_id, preferred_date, preferred_time) {
        (Some(pet_id), Some(service_id), Some(preferred_date), Some(preferred_time))
            if errors.is_empty() =>
        {
            Ok(BookingRequest {
                pet_id,
                service_id,
                preferred_date,
                preferred_time,
                additional_services: req.additional_services,
                matted_coat_fee,
                special_notes: req
                    .special_notes
                    .map(|notes| notes.trim().to_string())
                    .filter(|notes| !notes.is_empty()),
            })
        }
        _ => Err(errors),
    }
}

/// Date-only comparison; any time today is still bookable.
pub fn ensure_not_past(field: &str, date: NaiveDate, today: NaiveDate) -> Result<(), FieldError> {
    if date < today {
        return Err(FieldError::new(
            field,
            PAST_DATE,
            format!("{} is in the past", date),
        ));
    }
    Ok(())
}

pub fn ensure_amount(field: &str, amount: f64) -> Result<(), FieldError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(FieldError::new(
            field,
            INVALID_VALUE,
            "Amount must be zero or a positive number",
        ));
    }
    Ok(())
}

pub fn required_text(field: &str, value: &str) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation(field, REQUIRED, format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}

fn price_service(
    field: String,
    service_id: i32,
    catalog: &Catalog,
    pet_size: &str,
) -> Result<PricedService, FieldError> {
    let Some(service) = catalog.get(&service_id) else {
        return Err(FieldError::new(
            field,
            SERVICE_NOT_FOUND,
            format!("Service #{} does not exist", service_id),
        ));
    };

    if service.status != ServiceAvailability::Available {
        return Err(FieldError::new(
            field,
            SERVICE_UNAVAILABLE,
            format!("{} is currently unavailable", service.name),
        )
        .with_detail(json!({ "service_id": service.id, "name": service.name })));
    }

    let price = PriceTable::from(service).price_for(pet_size);
    if price <= 0.0 {
        return Err(FieldError::new(
            field,
            INVALID_PRICE,
            format!("{} has no price for a {} pet", service.name, pet_size),
        ));
    }

    Ok(PricedService {
        service_id,
        name: service.name.clone(),
        price,
    })
}

fn service_name(catalog: &Catalog, service_id: i32) -> String {
    catalog
        .get(&service_id)
        .map(|service| service.name.clone())
        .unwrap_or_else(|| format!("Service #{}", service_id))
}

/// Prices a booking and checks every requested service can be booked.
pub fn quote_booking(
    primary_id: i32,
    additional: &[i32],
    catalog: &Catalog,
    pet_size: &str,
) -> Result<BookingQuote, Vec<FieldError>> {
    let mut errors = Vec::new();

    let primary = price_service("service_id".into(), primary_id, catalog, pet_size)
        .map_err(|err| errors.push(err))
        .ok();

    let mut seen = HashSet::new();
    let mut add_ons = Vec::new();
    for (idx, service_id) in additional.iter().copied().enumerate() {
        let field = format!("additional_services[{}]", idx);
        if service_id == primary_id {
            errors.push(FieldError::new(
                field,
                PRIMARY_SERVICE_CONFLICT,
                format!(
                    "{} is already the primary service",
                    service_name(catalog, service_id)
                ),
            ));
            continue;
        }
        if !seen.insert(service_id) {
            errors.push(FieldError::new(
                field,
                DUPLICATE_SERVICE,
                format!(
                    "{} is listed more than once",
                    service_name(catalog, service_id)
                ),
            ));
            continue;
        }
        match price_service(field, service_id, catalog, pet_size) {
            Ok(priced) => add_ons.push(priced),
            Err(err) => errors.push(err),
        }
    }

    match primary {
        Some(primary) if errors.is_empty() => Ok(BookingQuote { primary, add_ons }),
        _ => Err(errors),
    }
}

/// Prices add-on services for an existing appointment.
pub fn quote_add_ons(
    appointment: &AppointmentEntity,
    existing: &[AppointmentServiceEntity],
    requested: &[i32],
    catalog: &Catalog,
    pet_size: &str,
) -> Result<Vec<PricedService>, Vec<FieldError>> {
    if requested.is_empty() {
        return Err(vec![FieldError::new(
            "service_ids",
            REQUIRED,
            "At least one service is required",
        )]);
    }

    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    let mut priced = Vec::new();

    for (idx, service_id) in requested.iter().copied().enumerate() {
        let field = format!("service_ids[{}]", idx);
        let name = service_name(catalog, service_id);

        if service_id == appointment.service_id {
            errors.push(FieldError::new(
                field,
                PRIMARY_SERVICE_CONFLICT,
                format!("{} is already the primary service", name),
            ));
            continue;
        }
        if let Some(line) = existing.iter().find(|line| line.service_id == service_id) {
            errors.push(
                FieldError::new(
                    field,
                    DUPLICATE_SERVICE,
                    format!(
                        "{} was already added on {}",
                        name,
                        line.created_at.format("%Y-%m-%d %H:%M")
                    ),
                )
                .with_detail(json!({
                    "service_id": service_id,
                    "added_at": line.created_at,
                })),
            );
            continue;
        }
        if !seen.insert(service_id) {
            errors.push(FieldError::new(
                field,
                DUPLICATE_SERVICE,
                format!("{} is listed more than once", name),
            ));
            continue;
        }
        match price_service(field, service_id, catalog, pet_size) {
            Ok(service) => priced.push(service),
            Err(err) => errors.push(err),
        }
    }

    if errors.is_empty() {
        Ok(priced)
    } else {
        Err(errors)
    }
}

fn summary(appointment: &AppointmentEntity) -> serde_json::Value {
    json!({
        "id": appointment.id,
        "pet_id": appointment.pet_id,
        "status": appointment.status,
        "preferred_date": appointment.preferred_date,
        "preferred_time": time_format::to_display(appointment.preferred_time),
    })
}

pub fn active_appointment_conflict(existing: &AppointmentEntity) -> AppError {
    AppError::conflict(
        ConflictCode::ActiveAppointmentExists,
        format!(
            "This pet already has a {} appointment on {}",
            existing.status, existing.preferred_date
        ),
        Some(summary(existing)),
    )
}

pub fn slot_conflict(existing: &AppointmentEntity) -> AppError {
    AppError::conflict(
        ConflictCode::TimeSlotUnavailable,
        format!(
            "{} at {} is already booked",
            existing.preferred_date,
            time_format::to_display(existing.preferred_time)
        ),
        Some(summary(existing)),
    )
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    use super::*;
    use crate::{
        enums::{AppointmentStatus, PaymentRecordStatus, PaymentStatus},
        models::PaymentEntity,
    };

    pub fn service(id: i32, name: &str, medium: Option<f64>) -> GroomingServiceEntity {
        GroomingServiceEntity {
            id,
            name: name.to_string(),
            status: ServiceAvailability::Available,
            price_xs: None,
            price_small: None,
            price_medium: medium,
            price_large: None,
            price_xl: None,
            price_xxl: None,
        }
    }

    /// Full Groom (#1, ₱500), Nail Trim (#2, ₱150), Ear Cleaning (#3, ₱120),
    /// De-shedding (#4, unavailable), Teeth Brushing (#5, unpriced).
    pub fn catalog() -> Catalog {
        let mut deshedding = service(4, "De-shedding", Some(300.0));
        deshedding.status = ServiceAvailability::Unavailable;
        [
            service(1, "Full Groom", Some(500.0)),
            service(2, "Nail Trim", Some(150.0)),
            service(3, "Ear Cleaning", Some(120.0)),
            deshedding,
            service(5, "Teeth Brushing", None),
        ]
        .into_iter()
        .map(|service| (service.id, service))
        .collect()
    }

    pub fn appointment(id: i32, status: AppointmentStatus) -> AppointmentEntity {
        let created = Utc.with_ymd_and_hms(2026, 10, 13, 2, 0, 0).unwrap();
        AppointmentEntity {
            id,
            pet_id: 42,
            owner_id: 7,
            service_id: 1,
            groomer_id: None,
            preferred_date: NaiveDate::from_ymd_opt(2026, 10, 15).unwrap(),
            preferred_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            actual_date: None,
            actual_time: None,
            daily_queue_number: None,
            queue_date: None,
            base_price: 500.0,
            matted_coat_fee: 0.0,
            discount_amount: 0.0,
            total_amount: 500.0,
            status,
            payment_status: PaymentStatus::Pending,
            payment_method: None,
            cancelled_reason: None,
            cancelled_by_role: None,
            cancelled_by_user_id: None,
            cancelled_at: None,
            refund_status: None,
            duration_minutes: None,
            special_notes: None,
            status_notes: None,
            created_at: created,
            updated_at: created,
        }
    }

    pub fn payment(appointment_id: i32, status: PaymentRecordStatus) -> PaymentEntity {
        let created = Utc.with_ymd_and_hms(2026, 10, 14, 3, 0, 0).unwrap();
        PaymentEntity {
            id: Uuid::new_v4(),
            appointment_id,
            amount: 500.0,
            payment_method: "cash".into(),
            status,
            provider_ref: None,
            failure_reason: None,
            paid_at: None,
            created_at: created,
            updated_at: created,
        }
    }

    pub fn line(appointment_id: i32, service_id: i32, price: f64) -> AppointmentServiceEntity {
        AppointmentServiceEntity {
            id: service_id * 10,
            appointment_id,
            service_id,
            pet_id: 42,
            price,
            payment_method: None,
            created_at: Utc.with_ymd_and_hms(2026, 10, 14, 1, 12, 0).unwrap(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{fixtures::*, *};
    use crate::enums::AppointmentStatus;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 14).unwrap()
    }

    fn request() -> CreateAppointmentReq {
        CreateAppointmentReq {
            pet_id: Some(42),
            service_id: Some(1),
            preferred_date: Some(NaiveDate::from_ymd_opt(2026, 10, 15).unwrap()),
            preferred_time: Some("10:00 AM".into()),
            ..Default::default()
        }
    }

    fn codes(errors: &[FieldError]) -> Vec<&'static str> {
        errors.iter().map(|err| err.code).collect()
    }

    #[test]
    fn complete_request_is_normalized() {
        let booking = validate_booking_request(request(), today()).unwrap();
        assert_eq!(booking.preferred_time, NaiveTime::from_hms_opt(10, 0, 0).unwrap());
        assert_eq!(booking.matted_coat_fee, 0.0);
    }

    #[test]
    fn missing_fields_are_reported_together() {
        let errors =
            validate_booking_request(CreateAppointmentReq::default(), today()).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|err| err.field.as_str()).collect();
        assert_eq!(fields, ["pet_id", "service_id", "preferred_date", "preferred_time"]);
    }

    #[test]
    fn yesterday_is_rejected_but_today_is_fine() {
        let mut req = request();
        req.preferred_date = Some(NaiveDate::from_ymd_opt(2026, 10, 13).unwrap());
        let errors = validate_booking_request(req, today()).unwrap_err();
        assert_eq!(codes(&errors), [PAST_DATE]);

        let mut req = request();
        req.preferred_date = Some(today());
        assert!(validate_booking_request(req, today()).is_ok());
    }

    #[test]
    fn negative_matted_fee_is_rejected() {
        let mut req = request();
        req.matted_coat_fee = Some(-1.0);
        let errors = validate_booking_request(req, today()).unwrap_err();
        assert_eq!(errors[0].field, "matted_coat_fee");
    }

    #[test]
    fn quotes_primary_and_add_ons_for_pet_size() {
        let quote = quote_booking(1, &[2, 3], &catalog(), "Medium").unwrap();
        assert_eq!(quote.primary.price, 500.0);
        let prices: Vec<f64> = quote.add_ons.iter().map(|s| s.price).collect();
        assert_eq!(prices, [150.0, 120.0]);
    }

    #[test]
    fn unavailable_and_unknown_services_are_named() {
        let errors = quote_booking(1, &[4, 99], &catalog(), "medium").unwrap_err();
        assert_eq!(codes(&errors), [SERVICE_UNAVAILABLE, SERVICE_NOT_FOUND]);
        assert!(errors[0].message.contains("De-shedding"));
    }

    #[test]
    fn unpriced_service_cannot_be_booked() {
        let errors = quote_booking(5, &[], &catalog(), "small").unwrap_err();
        assert_eq!(codes(&errors), [INVALID_PRICE]);
    }

    #[test]
    fn booking_add_ons_must_be_distinct() {
        let errors = quote_booking(1, &[2, 2, 1], &catalog(), "medium").unwrap_err();
        assert_eq!(codes(&errors), [DUPLICATE_SERVICE, PRIMARY_SERVICE_CONFLICT]);
        assert_eq!(errors[0].field, "additional_services[1]");
    }

    #[test]
    fn add_on_already_attached_reports_when() {
        let appointment = appointment(1, AppointmentStatus::Confirmed);
        let existing = [line(1, 2, 150.0)];
        let errors =
            quote_add_ons(&appointment, &existing, &[2], &catalog(), "medium").unwrap_err();
        assert_eq!(codes(&errors), [DUPLICATE_SERVICE]);
        assert!(errors[0].message.contains("2026-10-14 01:12"));
        assert!(errors[0].detail.is_some());
    }

    #[test]
    fn add_on_equal_to_primary_is_rejected() {
        let appointment = appointment(1, AppointmentStatus::Confirmed);
        let errors = quote_add_ons(&appointment, &[], &[1], &catalog(), "medium").unwrap_err();
        assert_eq!(codes(&errors), [PRIMARY_SERVICE_CONFLICT]);
    }

    #[test]
    fn add_ons_are_priced_per_item() {
        let appointment = appointment(1, AppointmentStatus::Confirmed);
        let priced = quote_add_ons(&appointment, &[], &[2, 3], &catalog(), "medium").unwrap();
        assert_eq!(priced.len(), 2);
        assert!(quote_add_ons(&appointment, &[], &[], &catalog(), "medium").is_err());
    }

    #[test]
    fn conflicts_carry_the_existing_appointment() {
        let existing = appointment(9, AppointmentStatus::Pending);
        match active_appointment_conflict(&existing) {
            AppError::Conflict {
                code, conflicting, ..
            } => {
                assert_eq!(code, ConflictCode::ActiveAppointmentExists);
                let conflicting = conflicting.unwrap();
                assert_eq!(conflicting["id"], 9);
                assert_eq!(conflicting["preferred_time"], "10:00 AM");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(slot_conflict(&existing).code(), Some("TIME_SLOT_UNAVAILABLE"));
    }
}
