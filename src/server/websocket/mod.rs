//! WebSocket push channel: upgrade handler and frame types.

mod handler;
mod messages;

pub use handler::ws_handler;
pub use messages::{msg_types, ClientMessage, LagHint, ServerMessage};
