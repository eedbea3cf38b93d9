//! HTTP server: the embedded UI page, the command/script gates, and system info.
//!
//! Every request is independent. The only shared state is the immutable configuration and
//! the gates built from it at startup.

mod protocol;
mod routes;

pub use protocol::{ErrorBody, Health, OutputBody};
pub use routes::{build_router, run_server, serve, ServerState};
