pub mod controller;

pub use controller::NsEmigrationController;
