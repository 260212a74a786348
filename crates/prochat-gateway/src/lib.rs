//! Realtime delivery over WebSocket.
//!
//! Connection registry and rooms live in this process only; running more than
//! one server instance needs the registry moved to a shared pub/sub layer.

pub mod connection;
pub mod dispatcher;
pub mod registry;

pub use dispatcher::Dispatcher;
pub use registry::ConnId;
