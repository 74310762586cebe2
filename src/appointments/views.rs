//! Joined read projections returned by every appointment query.

use std::collections::{HashMap, HashSet};

use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    appointments::time_format,
    enums::ActorRole,
    models::{
        AppointmentEntity, AppointmentServiceEntity, AppointmentSessionEntity,
        GroomingServiceEntity, PetEntity, RatingEntity, RescheduleHistoryEntity, UserEntity,
    },
    platform::app_error::AppError,
    schema::{
        appointment_ratings, appointment_reschedule_history, appointment_services,
        appointment_sessions, grooming_services, pets, users,
    },
};

/// An appointment row with its times rendered for people.
#[derive(Serialize, Debug, Clone, ToSchema)]
pub struct AppointmentView {
    #[serde(flatten)]
    pub appointment: AppointmentEntity,
    pub preferred_time_display: String,
    pub actual_time_display: Option<String>,
}

impl From<AppointmentEntity> for AppointmentView {
    fn from(appointment: AppointmentEntity) -> Self {
        Self {
            preferred_time_display: time_format::to_display(appointment.preferred_time),
            actual_time_display: appointment.actual_time.map(time_format::to_display),
            appointment,
        }
    }
}

#[derive(Serialize, Debug, Clone, ToSchema)]
pub struct UserSummary {
    pub id: i32,
    pub full_name: String,
    pub role: ActorRole,
}

impl From<&UserEntity> for UserSummary {
    fn from(user: &UserEntity) -> Self {
        Self {
            id: user.id,
            full_name: user.full_name.clone(),
            role: user.role,
        }
    }
}

#[derive(Serialize, Debug, Clone, ToSchema)]
pub struct ServiceSummary {
    pub id: i32,
    pub name: String,
}

#[derive(Serialize, Debug, Clone, ToSchema)]
pub struct AdditionalServiceView {
    #[serde(flatten)]
    pub line: AppointmentServiceEntity,
    pub name: Option<String>,
}

#[derive(Serialize, Debug, Clone, ToSchema)]
pub struct RescheduleView {
    #[serde(flatten)]
    pub entry: RescheduleHistoryEntity,
    pub old_time_display: String,
    pub new_time_display: String,
}

impl From<RescheduleHistoryEntity> for RescheduleView {
    fn from(entry: RescheduleHistoryEntity) -> Self {
        Self {
            old_time_display: time_format::to_display(entry.old_time),
            new_time_display: time_format::to_display(entry.new_time),
            entry,
        }
    }
}

#[derive(Serialize, Debug, Clone, ToSchema)]
pub struct AppointmentDetail {
    #[serde(flatten)]
    pub appointment: AppointmentView,
    pub pet: Option<PetEntity>,
    pub owner: Option<UserSummary>,
    pub groomer: Option<UserSummary>,
    pub service: Option<ServiceSummary>,
    pub additional_services: Vec<AdditionalServiceView>,
    pub reschedule_history: Vec<RescheduleView>,
    pub sessions: Vec<AppointmentSessionEntity>,
    pub rating: Option<RatingEntity>,
}

fn group_by<T>(rows: Vec<T>, key: impl Fn(&T) -> i32) -> HashMap<i32, Vec<T>> {
    let mut grouped: HashMap<i32, Vec<T>> = HashMap::new();
    for row in rows {
        grouped.entry(key(&row)).or_default().push(row);
    }
    grouped
}

/// Joins reference data and child rows onto each appointment, one query per
/// table regardless of how many appointments are passed in.
pub async fn load_details(
    conn: &mut AsyncPgConnection,
    appointments: Vec<AppointmentEntity>,
) -> Result<Vec<AppointmentDetail>, AppError> {
    if appointments.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<i32> = appointments.iter().map(|a| a.id).collect();
    let pet_ids: HashSet<i32> = appointments.iter().map(|a| a.pet_id).collect();
    let user_ids: HashSet<i32> = appointments
        .iter()
        .flat_map(|a| [Some(a.owner_id), a.groomer_id])
        .flatten()
        .collect();

    let lines: Vec<AppointmentServiceEntity> = appointment_services::table
        .filter(appointment_services::appointment_id.eq_any(&ids))
        .order_by(appointment_services::created_at.asc())
        .select(AppointmentServiceEntity::as_select())
        .load(conn)
        .await?;

    let mut service_ids: HashSet<i32> = appointments.iter().map(|a| a.service_id).collect();
    service_ids.extend(lines.iter().map(|line| line.service_id));

    let services: HashMap<i32, String> = grooming_services::table
        .filter(grooming_services::id.eq_any(service_ids.into_iter().collect::<Vec<_>>()))
        .select(GroomingServiceEntity::as_select())
        .load(conn)
        .await?
        .into_iter()
        .map(|service| (service.id, service.name))
        .collect();

    let pets: HashMap<i32, PetEntity> = pets::table
        .filter(pets::id.eq_any(pet_ids.into_iter().collect::<Vec<_>>()))
        .select(PetEntity::as_select())
        .load(conn)
        .await?
        .into_iter()
        .map(|pet| (pet.id, pet))
        .collect();

    let users: HashMap<i32, UserEntity> = users::table
        .filter(users::id.eq_any(user_ids.into_iter().collect::<Vec<_>>()))
        .select(UserEntity::as_select())
        .load(conn)
        .await?
        .into_iter()
        .map(|user| (user.id, user))
        .collect();

    let history: Vec<RescheduleHistoryEntity> = appointment_reschedule_history::table
        .filter(appointment_reschedule_history::appointment_id.eq_any(&ids))
        .order_by(appointment_reschedule_history::rescheduled_at.asc())
        .select(RescheduleHistoryEntity::as_select())
        .load(conn)
        .await?;

    let sessions: Vec<AppointmentSessionEntity> = appointment_sessions::table
        .filter(appointment_sessions::appointment_id.eq_any(&ids))
        .order_by(appointment_sessions::start_time.asc())
        .select(AppointmentSessionEntity::as_select())
        .load(conn)
        .await?;

    let ratings: Vec<RatingEntity> = appointment_ratings::table
        .filter(appointment_ratings::appointment_id.eq_any(&ids))
        .select(RatingEntity::as_select())
        .load(conn)
        .await?;

    let mut lines = group_by(lines, |line| line.appointment_id);
    let mut history = group_by(history, |entry| entry.appointment_id);
    let mut sessions = group_by(sessions, |session| session.appointment_id);
    let mut ratings: HashMap<i32, RatingEntity> = ratings
        .into_iter()
        .map(|rating| (rating.appointment_id, rating))
        .collect();

    let details = appointments
        .into_iter()
        .map(|appointment| {
            let id = appointment.id;
            AppointmentDetail {
                pet: pets.get(&appointment.pet_id).cloned(),
                owner: users.get(&appointment.owner_id).map(UserSummary::from),
                groomer: appointment
                    .groomer_id
                    .and_then(|groomer_id| users.get(&groomer_id))
                    .map(UserSummary::from),
                service: services
                    .get(&appointment.service_id)
                    .map(|name| ServiceSummary {
                        id: appointment.service_id,
                        name: name.clone(),
                    }),
                additional_services: lines
                    .remove(&id)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|line| AdditionalServiceView {
                        name: services.get(&line.service_id).cloned(),
                        line,
                    })
                    .collect(),
                reschedule_history: history
                    .remove(&id)
                    .unwrap_or_default()
                    .into_iter()
                    .map(RescheduleView::from)
                    .collect(),
                sessions: sessions.remove(&id).unwrap_or_default(),
                rating: ratings.remove(&id),
                appointment: AppointmentView::from(appointment),
            }
        })
        .collect();

    Ok(details)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveTime;

    use super::*;
    use crate::{appointments::validator::fixtures::appointment, enums::AppointmentStatus};

    #[test]
    fn view_renders_twelve_hour_times() {
        let mut row = appointment(1, AppointmentStatus::Waiting);
        row.preferred_time = NaiveTime::from_hms_opt(14, 30, 0).unwrap();
        row.actual_time = Some(NaiveTime::from_hms_opt(9, 5, 0).unwrap());

        let view = AppointmentView::from(row);
        assert_eq!(view.preferred_time_display, "2:30 PM");
        assert_eq!(view.actual_time_display.as_deref(), Some("9:05 AM"));

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["preferred_time"], "14:30:00");
        assert_eq!(json["status"], "waiting");
    }

    #[test]
    fn group_by_keeps_row_order() {
        let grouped = group_by(vec![(1, "a"), (2, "b"), (1, "c")], |row| row.0);
        assert_eq!(grouped[&1], vec![(1, "a"), (1, "c")]);
        assert_eq!(grouped[&2], vec![(2, "b")]);
    }
}
