//! Appointment lifecycle and queueing engine.

pub mod actor;
pub mod clock;
pub mod commands;
pub mod ledger;
pub mod lifecycle;
pub mod payment_sync;
pub mod pricing;
pub mod queue;
pub mod service;
pub mod store;
pub mod time_format;
pub mod validator;
pub mod views;

pub use actor::Actor;
pub use service::AppointmentService;
