//! HTTP/WS API surface.

mod server;
mod state;
pub mod websocket;

pub use server::{make_app, run_server};
pub use state::ServerState;

use axum::{extract::State, http::Request, middleware::Next, response::Response};
use clap::ValueEnum;
use tracing::info;

/// How much of each request to log.
#[derive(Debug, Clone, Default, PartialEq, Eq, ValueEnum)]
pub enum RequestsLoggingLevel {
    None,
    #[default]
    Path,
    Headers,
}

pub async fn log_requests(
    State(level): State<RequestsLoggingLevel>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    match level {
        RequestsLoggingLevel::None => {}
        RequestsLoggingLevel::Path => {
            info!("{} {}", request.method(), request.uri().path());
        }
        RequestsLoggingLevel::Headers => {
            info!(
                "{} {} {:?}",
                request.method(),
                request.uri().path(),
                request.headers()
            );
        }
    }
    next.run(request).await
}
