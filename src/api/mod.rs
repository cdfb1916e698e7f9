pub mod constants;
pub mod object;
pub mod v1;

pub use object::{BusinessObject, Finalizable, ObjectKey, Phased};
