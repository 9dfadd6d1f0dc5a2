//! Real-time game sessions
//!
//! - [`registry`]: lazily creates one session per match id and reaps idle ones
//! - [`game`]: the per-match tick/input loop
//! - [`hub`]: fans snapshots out to connections, dropping unresponsive ones
//! - [`socket`]: pumps one WebSocket between its session and the hub

pub mod game;
pub mod hub;
pub mod registry;
pub mod socket;

pub use game::{GameSession, GameSessionHandle};
pub use hub::{BroadcastHub, Connection, ConnectionId, HubHandle, HubStats};
pub use registry::SessionRegistry;
pub use socket::{serve_connection, ConnectionContext};
