//! Camera stream relay: WebSocket endpoints and the per-camera registry of
//! publishers and subscribers behind them.

mod handlers;
mod registry;
mod server;


pub use handlers::{CameraLockView, HealthResponse, RecognitionHook};
pub use registry::{
    ConnectionHandle, ConnectionId, ConnectionRegistry, RegistryStats, RelayOutcome, Role,
};
pub use server::{RelayServer, RelayServerBuilder};
