//! Data Transfer Objects (DTOs) for the HondaCamera client.
//!
//! DTOs are organized by protocol:
//! - `websocket`: room WebSocket frames
//! - `http`: picture backend request/response bodies

pub mod http;
pub mod websocket;
