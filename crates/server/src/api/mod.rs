pub mod batch;
pub mod conversions;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod uploads;

pub use error::{ApiError, ErrorResponse};
pub use middleware::{ClientIp, RateLimiter};
pub use routes::create_router;
