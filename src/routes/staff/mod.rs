pub mod appointments;
pub mod queue;
