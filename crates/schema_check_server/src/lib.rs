//! schema_check_server: REST surface, outbox dispatcher and HTTP transports.

pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod transport;
