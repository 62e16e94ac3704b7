pub mod auth;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod notifications;
pub mod storage;

pub use bridge::{AuthView, BridgeHandle, BridgeSettings, SessionBridge, SessionSource};
pub use config::Config;
