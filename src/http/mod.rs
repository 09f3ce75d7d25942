//! HTTP transport: a rate limited route and an unlimited one.

mod server;
mod service;

pub use server::HttpServer;
pub use service::{
    client_identity, insert_decision_headers, router, AppState, UNKNOWN_IDENTITY,
    X_RATELIMIT_ALGORITHM, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
