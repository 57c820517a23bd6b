//! Platform helpers shared by the persistence, configuration and clock layers

pub mod boot;
pub mod common;

pub use boot::boot_id;
pub use common::{atomic_write, lock_exclusive};
