pub mod controller;
pub mod deletion;
pub mod usage;

pub use controller::ProjectController;
