//! HTTP surface: health, room listing/creation and the WebSocket endpoint

pub mod routes;

pub use routes::build_router;
