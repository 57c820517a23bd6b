pub mod guard;
pub mod utils;
