//! Browser dashboard for deckhand data
//!
//! A local web server with a static page, a JSON API over the store, and a
//! WebSocket that pushes live [`crate::models::DashboardStats`] and table
//! change notifications.

pub mod protocol;
mod server;
mod websocket;

pub use protocol::{ClientMessage, ServerMessage};
pub use server::{
    AppState, DEFAULT_ACTIVITY_LIMIT, MAX_ACTIVITY_LIMIT, SYNC_NOT_CONFIGURED, router,
    start_server,
};
