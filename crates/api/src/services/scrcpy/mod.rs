//! Scrcpy streaming: device-side server lifecycle and the WebSocket proxy.

pub mod proxy;
pub mod queue;
pub mod session;

pub use proxy::ConnectionRegistry;
pub use session::StreamManager;
