pub mod campaigns;
pub mod customers;
pub mod delivery;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod vendor;
pub mod webhooks;

pub use routes::create_router;
