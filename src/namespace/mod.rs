pub mod cluster;
pub mod controller;
pub mod deletion;
pub mod health;

pub use controller::NamespaceController;
