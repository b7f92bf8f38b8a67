//! HTTP handlers for the relay's routes.

pub mod status_handlers;
pub mod stream_handlers;
pub mod watch_page;
