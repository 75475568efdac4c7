mod health;
mod proxy;

pub use health::{health_check, readiness_check};
pub use proxy::{forward, is_hop_by_hop};
