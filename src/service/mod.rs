//! Service layer: player-facing ticket operations, the crawl driver,
//! application wiring and health checks

pub mod app;
pub mod crawler;
pub mod health;
pub mod tickets;

pub use app::{AppState, ServiceError};
pub use crawler::Crawler;
pub use health::{HealthCheck, HealthStatus};
pub use tickets::{TicketRequest, TicketService};
