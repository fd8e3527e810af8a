//! Utilities shared by the HondaCamera client binaries and libraries.

pub mod logger;
pub mod time;
