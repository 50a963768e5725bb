pub mod client;
pub mod endpoints;
pub mod types;

pub use client::{CacheSource, DashboardClient, Fetched};
pub use endpoints::Endpoint;
