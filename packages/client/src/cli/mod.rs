//! Interactive command-line client.

mod command;
mod preview_image;
mod runner;
mod ui;

pub use command::Command;
pub use preview_image::PreviewImage;
pub use runner::{RunOptions, run_client};
