//! HTTP surface of the exchange.
//!
//! Routes are nested under `/api/` and protected by a middleware stack:
//! Requester capture → Auth → Handler. Handlers delegate every decision
//! to the business modules.

pub mod endpoints;
pub mod error;
pub mod middleware;
pub mod router;
pub mod server;
pub mod types;

pub use router::api_router;
pub use server::{start_api_server, ApiServer, ServerError};
pub use types::{ApiContext, Authenticator, TokenDirectory};
