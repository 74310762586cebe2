use crate::{appointments::AppointmentService, platform::db::DbPool};

#[derive(Clone)]
pub struct AppState {
    pub db_pool: DbPool,
    pub appointments: AppointmentService,
}
