pub mod doctor;
pub mod operation;
pub mod platform;
