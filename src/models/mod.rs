mod api;

pub use api::{FilterStatus, HealthResponse};
