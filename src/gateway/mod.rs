// Cache-aside pipeline shared by every route
pub mod endpoint;

// Local stub and reverse-proxy handlers
pub mod handlers;

// axum application and listener
pub mod server;

pub use endpoint::{CacheStatus, CachedEndpoint, EndpointResponse, X_CACHE};
pub use handlers::{EndpointHandler, ProxyHandler, StubHandler};
pub use server::{build_app, Components, GatewayServer, GatewayState, X_TRACE_ID};
