pub mod health;
pub mod runs;

pub use health::health_handler;
pub use runs::{purge_now_handler, run_now_handler};
