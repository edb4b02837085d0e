pub mod client;
pub mod transport;
pub mod user;

pub use client::{ClientBuilder, FleetClient};
pub use transport::BearerAuth;
pub use user::RegionResponse;
