pub mod admin;
pub mod health_checker;
pub mod http_client;
pub mod http_handler;

pub use admin::{AdminState, admin_router};
pub use health_checker::HealthChecker;
pub use http_client::HttpClientAdapter;
pub use http_handler::HttpHandler;
