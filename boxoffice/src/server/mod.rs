//! HTTP server plumbing: router, state, errors, extractors and middleware.

pub mod error;
pub mod extractors;
pub mod health;
pub mod middleware;
pub mod routes;
pub mod state;

pub use error::AppError;
pub use extractors::{AdminAuth, ClientKey};
pub use health::{BackendReadiness, ReadinessCheck};
pub use middleware::{
    CORRELATION_ID_HEADER, CorrelationId, REQUEST_ID_HEADER, correlation_id_layer,
};
pub use routes::build_router;
pub use state::AppState;
