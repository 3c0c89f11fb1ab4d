pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod log_lines;
pub mod logging;
pub mod paths;
pub mod progress;
pub mod remote;
pub mod steps;

pub use controller::{
    AppsInput, Controller, DeleteInput, DeployInput, TrackerHandle, TrackerOptions, TrackerView,
};
pub use engine::Phase;
pub use error::{ActionError, RemoteError, ValidationError};
