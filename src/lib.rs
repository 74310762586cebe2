pub mod api;
pub mod appointments;
pub mod consumers;
pub mod enums;
pub mod events;
pub mod models;
pub mod platform;
pub mod routes;
pub mod schema;
