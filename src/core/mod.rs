pub mod balancer;
pub mod circuit_breaker;
pub mod error;
pub mod gateway;
pub mod router;
pub mod target;
pub mod upstream;

pub use error::GatewayError;
pub use gateway::GatewayService;
pub use router::{RouteMatch, Router};
pub use upstream::{Upstream, UpstreamManager};
