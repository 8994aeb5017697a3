pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod output;
pub mod preview;
pub mod progress;
pub mod session;
pub mod staging;
pub mod tui;
pub mod upload;
