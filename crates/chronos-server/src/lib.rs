//! CHRONOS server: run queue and HTTP status surface.

pub mod routes;
pub mod state;
pub mod worker;

pub use state::{AppState, RunRequest};
