pub mod controller;
pub mod deletion;
pub mod health;
pub mod registry;

pub use controller::ChartGroupController;
