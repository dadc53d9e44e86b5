//! Operator HTTP API.

pub mod routes;

pub use routes::{ApiState, operator_routes};
