//! Database models split into domain-specific modules.

pub mod campaign;
pub mod common;
pub mod segment;
pub mod user;

pub use campaign::*;
pub use common::*;
pub use segment::*;
pub use user::*;
