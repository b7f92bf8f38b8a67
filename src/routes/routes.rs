//! Defines the relay's HTTP surface.
//!
//! ## Structure
//! Both routes go through the route classifier:
//! - `/`              — status (uptime, upstream loads, version)
//! - `/watch/{path}`  — player / download page for an object; never proxied
//! - `/{path}`        — stream an object, or proxy to the origin site
//!
//! Object paths are either `{fingerprint}{id}` (e.g. `AgADxy1234`) or a path
//! containing an id plus `?hash={fingerprint}`. Anything else is proxied.

use crate::{
    handlers::stream_handlers::stream_or_proxy,
    services::stream_service::StreamService,
};
use axum::{Router, routing::get};

/// Build and return the router for all relay routes.
///
/// `get` routes also answer `HEAD`; handlers see the real method and skip the
/// body pull for it.
pub fn routes() -> Router<StreamService> {
    Router::new()
        .route("/", get(stream_or_proxy))
        .route("/{*path}", get(stream_or_proxy))
}
