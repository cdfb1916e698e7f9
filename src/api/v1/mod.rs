pub mod chartgroup;
pub mod identity;
pub mod imagenamespace;
pub mod namespace;
pub mod nsemigration;
pub mod platform;
pub mod project;
pub mod registry;
pub mod resources;
