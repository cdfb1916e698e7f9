pub mod controller;

pub use controller::PlatformController;
