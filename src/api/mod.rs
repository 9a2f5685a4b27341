//! HTTP API consumed by the dashboard.

mod handlers;
mod rest;

pub use handlers::*;
pub use rest::*;
