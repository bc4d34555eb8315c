//! HTTP integration: identity resolution, rate limit middleware and server.

mod app;
mod identity;
mod middleware;
mod server;

pub use app::build_router;
pub use identity::{ClientIdentity, IdentityResolver, IdentitySource};
pub use middleware::{
    enforce_rate_limit, too_many_requests, RateLimitExceededBody, RateLimitLayer,
    RATE_LIMIT_EXCEEDED,
};
pub use server::HttpServer;
