//! HTTP server for examdesk

pub mod http;

pub use http::{run, serve, AppState, Stores, Upstreams};
