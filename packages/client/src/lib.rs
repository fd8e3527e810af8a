//! HondaCamera room client library.
//!
//! Provides the room WebSocket connection with reconnect and heartbeat,
//! the latest-photo preview selection shared between devices of a room,
//! and a typed client for the picture backend.

pub mod api;
pub mod cli;
pub mod config;
pub mod dto;
pub mod error;
pub mod formatter;
pub mod image_fetch;
pub mod photo;
pub mod reconnect;
pub mod room_socket;
pub mod roster;
pub mod selector;
pub mod session;
pub mod store;

pub use config::ClientConfig;
pub use photo::PhotoCandidate;
pub use room_socket::{ReadyState, RoomSocket};
pub use roster::{Role, RosterSnapshot};
pub use selector::LatestPhotoSelector;
pub use session::{RoomSession, SessionEvent};
