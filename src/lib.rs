pub mod cli;
pub mod config;
pub mod editor;
pub mod error;
pub mod events;
pub mod preview;
pub mod sandbox;
pub mod session;
pub mod tools;
pub mod vfs;

pub use error::{LiveboxError, Result};
